//! Process-global database registry and the `exec`/`query` entry points.
//! Cloned handles to the same canonical path share one mutable database,
//! realized with `Rc<RefCell<Database>>` behind a `thread_local!` registry
//! rather than `Arc<Mutex<..>>` behind a `static` — the latter would require
//! `Database` to be `Send`, which it isn't: `Update`/`Erase` plan iterators
//! share one cursor with their underlying scan via `Rc<RefCell<Cursor>>`
//! (see `plan/builder.rs`), and threading that through `Arc<Mutex<..>>`
//! instead would mean re-locking the same mutex from the same call stack.
//! The engine is single-threaded and synchronous by design, so a
//! thread-local registry satisfies "one shared database per canonical path,
//! reference counted, closed on last release" without needing cross-thread
//! safety the rest of the storage layer doesn't have either.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::info;

use crate::catalog::Catalog;
use crate::config::{DbOptions, MASTER_TABLE_NAME};
use crate::database::Database;
use crate::error::DbError;
use crate::plan::PlanIter;
use crate::row::{value_bytes, Row, Value};
use crate::sql::ast::Statement;
use crate::text::Text;

thread_local! {
    static REGISTRY: RefCell<HashMap<PathBuf, Rc<RefCell<Database>>>> = RefCell::new(HashMap::new());
}

fn canonical_db_path(path: &Path) -> Result<PathBuf, DbError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let canon_parent = parent.canonicalize()?;
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "database path has no file name"))?;
    Ok(canon_parent.join(file_name))
}

/// A handle onto one open database. Cloning the handle (via [`Engine::open`]
/// on the same path from elsewhere in the process) shares the same
/// underlying [`Database`]; the last handle to drop closes it.
pub struct Engine {
    path: PathBuf,
    inner: Rc<RefCell<Database>>,
}

impl Engine {
    pub fn open(path: impl AsRef<Path>) -> Result<Engine, DbError> {
        Self::open_with_options(path, DbOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: DbOptions) -> Result<Engine, DbError> {
        let canonical = canonical_db_path(path.as_ref())?;
        let inner = REGISTRY.with(|registry| -> Result<Rc<RefCell<Database>>, DbError> {
            let mut registry = registry.borrow_mut();
            if let Some(existing) = registry.get(&canonical) {
                return Ok(existing.clone());
            }
            let db = Database::open(&canonical, options)?;
            let rc = Rc::new(RefCell::new(db));
            registry.insert(canonical.clone(), rc.clone());
            info!("engine: opened {canonical:?}");
            Ok(rc)
        })?;
        Ok(Engine { path: canonical, inner })
    }

    fn catalog_and_fm(&self) -> (Rc<RefCell<Catalog>>, Rc<RefCell<crate::frame_manager::FrameManager>>) {
        let db = self.inner.borrow();
        (db.catalog(), db.frame_manager())
    }

    /// Parses and runs exactly one statement, returning its affected/
    /// produced row count. `Create`/`Drop` additionally update the master
    /// table through a privileged path once the plan itself succeeds.
    pub fn exec(&self, sql: &str) -> Result<usize, DbError> {
        self.exec_inner(sql).map_err(|e| {
            log::warn!("engine: exec failed: {e}");
            e
        })
    }

    fn exec_inner(&self, sql: &str) -> Result<usize, DbError> {
        let stmt = crate::sql::parse_statement(sql)?;
        let table_name = match &stmt {
            Statement::CreateTable { table, .. } => Some(table.clone()),
            Statement::DropTable { table } => Some(table.clone()),
            _ => None,
        };
        let is_create = matches!(stmt, Statement::CreateTable { .. });
        let is_drop = matches!(stmt, Statement::DropTable { .. });

        let (catalog, fm) = self.catalog_and_fm();
        let checked = {
            let mut cat = catalog.borrow_mut();
            crate::sql::validate(stmt, &mut *cat, false)?
        };

        let original_sql = if is_create { Some(sql) } else { None };
        let mut plan = crate::plan::build(checked, catalog.clone(), fm, original_sql)?;
        while plan.next()? {}

        // `Create`/`Drop` report 0: they install or remove a catalog entry,
        // not rows. Their single successful `next()` call drives the
        // one-shot install/remove, not a user-visible row count.
        let count = if is_create || is_drop { 0 } else { plan.count() };

        if is_create {
            Self::insert_master_row(&catalog, &table_name.expect("CreateTable carries a table name"), sql)?;
        } else if is_drop {
            Self::delete_master_row(&catalog, &table_name.expect("DropTable carries a table name"))?;
        }

        Ok(count)
    }

    /// Parses and plans a statement without draining it, handing back a
    /// pull-based result set for the caller to iterate.
    pub fn query(&self, sql: &str) -> Result<ResultSet, DbError> {
        self.query_inner(sql).map_err(|e| {
            log::warn!("engine: query failed: {e}");
            e
        })
    }

    fn query_inner(&self, sql: &str) -> Result<ResultSet, DbError> {
        let stmt = crate::sql::parse_statement(sql)?;
        let (catalog, fm) = self.catalog_and_fm();
        let checked = {
            let mut cat = catalog.borrow_mut();
            crate::sql::validate(stmt, &mut *cat, false)?
        };
        let plan = crate::plan::build(checked, catalog, fm, None)?;
        Ok(ResultSet { plan })
    }

    fn insert_master_row(catalog: &Rc<RefCell<Catalog>>, table: &str, original_sql: &str) -> Result<(), DbError> {
        let cat = catalog.borrow();
        let master = cat.get(MASTER_TABLE_NAME).expect("master table always present");
        let master_schema = master.schema.clone();
        let master_tree = master.tree.clone();
        let root = cat.require(table)?.tree.borrow().root();
        drop(cat);

        let row = Row::new(
            master_schema.clone(),
            vec![
                Value::Text(Text::from_str_padded(table, master_schema.columns[0].size)),
                Value::Text(Text::from_str_padded(original_sql.trim(), master_schema.columns[1].size)),
                Value::Int(root.0 as i32),
                Value::Int(0),
            ],
        );
        master_tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize())?;
        Ok(())
    }

    fn delete_master_row(catalog: &Rc<RefCell<Catalog>>, table: &str) -> Result<(), DbError> {
        let cat = catalog.borrow();
        let master = cat.get(MASTER_TABLE_NAME).expect("master table always present");
        let master_schema = master.schema.clone();
        let master_tree = master.tree.clone();
        drop(cat);

        let key = value_bytes(
            &Value::Text(Text::from_str_padded(table, master_schema.columns[0].size)),
            master_schema.columns[0].size,
        );
        master_tree.borrow_mut().erase(&key)?;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            if Rc::strong_count(&self.inner) == 2 {
                if let Some(db) = registry.remove(&self.path) {
                    if let Err(e) = db.borrow_mut().close() {
                        log::warn!("engine: error closing {:?}: {e}", self.path);
                    }
                    info!("engine: closed {:?}", self.path);
                }
            }
        });
    }
}

/// A plan still being drained, returned from [`Engine::query`].
pub struct ResultSet {
    plan: Box<dyn PlanIter>,
}

impl ResultSet {
    pub fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        if self.plan.next()? {
            Ok(Some(self.plan.current()?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_insert_select_round_trips_through_the_engine() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e.db");
        let engine = Engine::open(&path).unwrap();
        engine.exec("CREATE TABLE t (id INT, v INT, PRIMARY KEY (id));").unwrap();
        engine.exec("INSERT INTO t VALUES (1, 10), (2, 20);").unwrap();

        let mut result = engine.query("SELECT * FROM t WHERE id >= 1;").unwrap();
        let mut rows = Vec::new();
        while let Some(row) = result.next_row().unwrap() {
            rows.push(row);
        }
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn handles_to_the_same_path_share_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = Engine::open(&path).unwrap();
        a.exec("CREATE TABLE t (id INT, PRIMARY KEY (id));").unwrap();

        let b = Engine::open(&path).unwrap();
        let mut result = b.query("SELECT * FROM t;").unwrap();
        assert!(result.next_row().unwrap().is_none());
    }

    #[test]
    fn reopening_after_close_recovers_inserted_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");
        {
            let engine = Engine::open(&path).unwrap();
            engine.exec("CREATE TABLE t (id INT, v INT, PRIMARY KEY (id));").unwrap();
            engine.exec("INSERT INTO t VALUES (1, 99);").unwrap();
        }
        let engine = Engine::open(&path).unwrap();
        let mut result = engine.query("SELECT * FROM t;").unwrap();
        let row = result.next_row().unwrap().unwrap();
        assert_eq!(row.values[1], Value::Int(99));
    }
}
