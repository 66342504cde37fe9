//! An embedded, single-writer SQL storage and execution engine: a paged
//! disk manager, a pinning page cache, a persistent free list, a typed
//! B+-tree, a fixed-width row codec, and a small SQL front end (tokenizer,
//! parser, validator, planner) driving Volcano-style pull iterators.
//!
//! [`Engine`] is the public entry point: open a database file by path,
//! then [`Engine::exec`] DDL/DML statements or [`Engine::query`] `SELECT`s.

pub mod btree;
pub mod byteio;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod database;
pub mod disk;
pub mod engine;
pub mod error;
pub mod frame_manager;
pub mod freelist;
pub mod page;
pub mod plan;
pub mod row;
pub mod schema;
pub mod sql;
pub mod text;

pub use config::DbOptions;
pub use engine::{Engine, ResultSet};
pub use error::{DbError, EngineError, QueryError};
pub use row::{Row, Value};
