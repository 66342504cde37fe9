//! Typed error taxonomy. `QueryError` covers caller-visible mistakes in a
//! statement; `EngineError` covers violations of an internal invariant.
//! `DbError` is the union returned from every public entry point.

use std::path::PathBuf;

use thiserror::Error;

use crate::page::PageId;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("column name '{0}' is reserved")]
    ReservedColumn(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("key already exists")]
    DuplicatePrimaryKey,

    #[error("cannot coerce value for column '{column}' to {expected}")]
    TypeMismatch { column: String, expected: &'static str },

    #[error("operator '{op}' is not permitted on column '{column}'")]
    OperatorNotPermitted { op: &'static str, column: String },

    #[error("row width {actual} exceeds the maximum of {max} bytes")]
    RowTooWide { actual: usize, max: usize },

    #[error("table name '{0}' exceeds the maximum length of {1}")]
    TableNameTooLong(String, usize),

    #[error("references to the master table are not permitted")]
    MasterTableForbidden,

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("incorrect file size: expected {expected} bytes, got {actual} bytes")]
    Disk { expected: u64, actual: u64 },

    #[error("invalid header format: bad magic number {0}")]
    InvalidMagic(u8),

    #[error(
        "incompatible nodes: key_sizes = {key_size_a},{key_size_b}, slot_sizes = {slot_size_a},{slot_size_b}"
    )]
    NodeIncompatible {
        key_size_a: u8,
        key_size_b: u8,
        slot_size_a: u16,
        slot_size_b: u16,
    },

    #[error("page cache is at capacity ({capacity} frames, all pinned)")]
    CacheCapacity { capacity: usize },

    #[error("cannot unpin page {0:?}: not pinned or not resident")]
    CacheUnpin(PageId),

    #[error("byte I/O out of range: {action} needs {needed} bytes, slice has {got}")]
    ByteIo {
        action: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("cursor is past the end of the tree")]
    EndOfTree,

    #[error("database at {0:?} is not open")]
    NotOpen(PathBuf),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;
pub type EngineResult<T> = Result<T, EngineError>;
pub type DbResult<T> = Result<T, DbError>;
