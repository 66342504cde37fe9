//! In-memory table registry. The master table itself is just another
//! entry here (see `database.rs`), not a special case built into `Catalog`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::btree::BPlusTree;
use crate::error::{EngineError, QueryError};
use crate::frame_manager::FrameManager;
use crate::page::PageId;
use crate::schema::Schema;
use crate::sql::CatalogLookup;

/// One open table: its schema, the stored `CREATE TABLE` text (persisted
/// verbatim so a reopen can reparse it instead of serializing `Schema`
/// itself), its B+-tree, and the next value `rowid` autogeneration will
/// hand out.
pub struct Table {
    pub name: String,
    pub schema: Arc<Schema>,
    pub sql: String,
    pub tree: Rc<RefCell<BPlusTree>>,
    pub next_rowid: i32,
}

/// Tables open in this session, keyed by name. Construction of a `Catalog`
/// itself never touches disk — `database.rs` populates it from the master
/// table (or creates the master table's own entry) on open.
#[derive(Default)]
pub struct Catalog {
    tables: HashMap<String, Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog { tables: HashMap::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Allocates a fresh root leaf and registers a new table. Used both for
    /// `CREATE TABLE` and for reconstructing the master table itself on a
    /// fresh database.
    pub fn create_table(
        &mut self,
        fm: Rc<RefCell<FrameManager>>,
        name: String,
        schema: Arc<Schema>,
        sql: String,
    ) -> Result<(), EngineError> {
        let key_type = schema.key_type();
        let row_size = schema.row_size as u16;
        let tree = BPlusTree::new(fm, key_type, key_type.size() as u8, row_size, PageId::NONE)?;
        self.insert(Table {
            name,
            schema,
            sql,
            tree: Rc::new(RefCell::new(tree)),
            next_rowid: 0,
        });
        Ok(())
    }

    /// Reattaches a table whose root page and `next_rowid` are already known
    /// — the path taken when reopening an existing database file.
    pub fn attach_table(
        &mut self,
        fm: Rc<RefCell<FrameManager>>,
        name: String,
        schema: Arc<Schema>,
        sql: String,
        root: PageId,
        next_rowid: i32,
    ) -> Result<(), EngineError> {
        let key_type = schema.key_type();
        let row_size = schema.row_size as u16;
        let tree = BPlusTree::new(fm, key_type, key_type.size() as u8, row_size, root)?;
        self.insert(Table {
            name,
            schema,
            sql,
            tree: Rc::new(RefCell::new(tree)),
            next_rowid,
        });
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), EngineError> {
        if let Some(table) = self.tables.remove(name) {
            table.tree.borrow_mut().destroy()?;
        }
        Ok(())
    }
}

impl CatalogLookup for Catalog {
    fn schema(&self, table: &str) -> Option<Arc<Schema>> {
        self.tables.get(table).map(|t| t.schema.clone())
    }

    fn next_rowid(&mut self, table: &str) -> i32 {
        let entry = self
            .tables
            .get_mut(table)
            .expect("validator only calls next_rowid after confirming the table exists");
        let value = entry.next_rowid;
        entry.next_rowid += 1;
        value
    }
}

impl Catalog {
    pub fn require(&self, name: &str) -> Result<&Table, QueryError> {
        self.get(name).ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }
}
