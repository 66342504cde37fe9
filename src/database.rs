//! Opens and closes one database file: header I/O, frame manager
//! construction, and catalog bootstrap from the master table.

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use zerocopy::{AsBytes, FromBytes};

use crate::catalog::Catalog;
use crate::config::{DbOptions, MASTER_SQL_COLUMN_WIDTH, MASTER_TABLE_NAME, MAX_TABLE_NAME_LEN};
use crate::cursor::Cursor;
use crate::error::{DbError, EngineError};
use crate::frame_manager::FrameManager;
use crate::page::{DatabaseHeader, Magic, PageId};
use crate::row::{value_bytes, Row, Value};
use crate::schema::{ColumnType, Schema};
use crate::sql::validator::CheckedQuery;
use crate::sql::{parse_statement, validate};
use crate::text::Text;

fn master_schema() -> Arc<Schema> {
    Schema::new(
        vec!["table_name".into(), "sql".into(), "root".into(), "next_rowid".into()],
        vec![
            ColumnType::Text(MAX_TABLE_NAME_LEN),
            ColumnType::Text(MASTER_SQL_COLUMN_WIDTH),
            ColumnType::Int,
            ColumnType::Int,
        ],
        "table_name",
    )
    .expect("master schema is well-formed by construction")
}

fn text_value(v: &Value) -> String {
    match v {
        Value::Text(t) => t.trimmed_str().to_string(),
        _ => panic!("master table column is not TEXT"),
    }
}

fn int_value(v: &Value) -> i32 {
    match v {
        Value::Int(n) => *n,
        _ => panic!("master table column is not INT"),
    }
}

/// One open database: the frame manager every table's B+-tree shares, and
/// the in-memory catalog of attached tables including the master table.
pub struct Database {
    fm: Rc<RefCell<FrameManager>>,
    catalog: Rc<RefCell<Catalog>>,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path, options: DbOptions) -> Result<Database, DbError> {
        let base_offset = DatabaseHeader::SIZE as u64;
        let file_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let header = if file_len >= base_offset {
            Self::read_header(path)?
        } else {
            let header = DatabaseHeader::new();
            Self::write_header_at(path, &header)?;
            header
        };
        if header.magic != Magic::Database as u8 {
            return Err(EngineError::InvalidMagic(header.magic).into());
        }

        let fm = FrameManager::open(
            path,
            base_offset,
            options.page_size,
            options.cache_capacity,
            header.first_free_list_block(),
        )?;
        let fm = Rc::new(RefCell::new(fm));

        let mut catalog = Catalog::new();
        let schema = master_schema();
        if header.master_root().is_none() {
            catalog.create_table(fm.clone(), MASTER_TABLE_NAME.to_string(), schema.clone(), String::new())?;
        } else {
            catalog.attach_table(
                fm.clone(),
                MASTER_TABLE_NAME.to_string(),
                schema.clone(),
                String::new(),
                header.master_root(),
                0,
            )?;
        }

        let master_tree = catalog.get(MASTER_TABLE_NAME).expect("just attached").tree.clone();
        let rows = Self::scan_all(master_tree, schema)?;
        for row in rows {
            let name = text_value(&row.values[0]);
            let sql = text_value(&row.values[1]);
            let root = PageId(int_value(&row.values[2]) as u32);
            let next_rowid = int_value(&row.values[3]);

            let stmt = parse_statement(&sql)?;
            let checked = validate(stmt, &mut catalog, true)?;
            let table_schema = match checked {
                CheckedQuery::CreateTable { schema, .. } => schema,
                _ => panic!("master table only ever stores CREATE TABLE text"),
            };
            catalog.attach_table(fm.clone(), name, table_schema, sql, root, next_rowid)?;
        }

        Ok(Database { fm, catalog: Rc::new(RefCell::new(catalog)), path: path.to_path_buf() })
    }

    fn scan_all(tree: Rc<RefCell<crate::btree::BPlusTree>>, schema: Arc<Schema>) -> Result<Vec<Row>, DbError> {
        let mut cursor = Cursor::open_first(tree, schema)?;
        let mut rows = Vec::new();
        while cursor.step()? {
            if let Some(row) = cursor.materialize_current()? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn catalog(&self) -> Rc<RefCell<Catalog>> {
        self.catalog.clone()
    }

    pub fn frame_manager(&self) -> Rc<RefCell<FrameManager>> {
        self.fm.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists every user table's current root and `next_rowid` into the
    /// master table, then the master table's own root into the header.
    pub fn close(&mut self) -> Result<(), DbError> {
        let (master_schema, master_tree, user_tables) = {
            let catalog = self.catalog.borrow();
            let master = catalog.get(MASTER_TABLE_NAME).expect("master table always present");
            let snapshot: Vec<(String, PageId, i32)> = catalog
                .tables()
                .filter(|t| t.name != MASTER_TABLE_NAME)
                .map(|t| (t.name.clone(), t.tree.borrow().root(), t.next_rowid))
                .collect();
            (master.schema.clone(), master.tree.clone(), snapshot)
        };

        let root_col = master_schema.columns[master_schema.column_index("root").unwrap()].clone();
        let rowid_col = master_schema.columns[master_schema.column_index("next_rowid").unwrap()].clone();
        let name_size = master_schema.primary().size;

        for (name, root, next_rowid) in user_tables {
            let key = value_bytes(&Value::Text(Text::from_str_padded(&name, name_size)), name_size);
            let mut cursor = Cursor::open_at(master_tree.clone(), master_schema.clone(), &key)?;
            if cursor.current_key()?.as_deref() != Some(key.as_slice()) {
                continue;
            }
            cursor.write_field(root_col.offset, &value_bytes(&Value::Int(root.0 as i32), root_col.size))?;
            cursor.write_field(rowid_col.offset, &value_bytes(&Value::Int(next_rowid), rowid_col.size))?;
        }

        let mut header = DatabaseHeader::new();
        header.page_count = self.fm.borrow().page_count().into();
        header.first_free_list_block = self.fm.borrow().first_free_list_block().0.into();
        header.master_root = master_tree.borrow().root().0.into();

        self.fm.borrow().flush_all()?;
        Self::write_header_at(&self.path, &header)?;
        Ok(())
    }

    fn read_header(path: &Path) -> Result<DatabaseHeader, DbError> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut buf = vec![0u8; DatabaseHeader::SIZE];
        file.read_exact(&mut buf)?;
        DatabaseHeader::read_from(&buf[..]).ok_or(EngineError::InvalidMagic(0).into())
    }

    fn write_header_at(path: &Path, header: &DatabaseHeader) -> Result<(), DbError> {
        let mut file = OpenOptions::new().write(true).create(true).open(path)?;
        file.write_all(header.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_open_bootstraps_an_empty_master_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.db");
        let db = Database::open(&path, DbOptions::default()).unwrap();
        let catalog = db.catalog();
        assert!(catalog.borrow().get(MASTER_TABLE_NAME).is_some());
        assert_eq!(catalog.borrow().tables().count(), 1);
    }

    #[test]
    fn close_then_reopen_recovers_created_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roundtrip.db");
        {
            let mut db = Database::open(&path, DbOptions::default()).unwrap();
            let fm = db.frame_manager();
            let catalog = db.catalog();
            let schema = Schema::new(vec!["id".into(), "v".into()], vec![ColumnType::Int, ColumnType::Int], "id").unwrap();
            catalog
                .borrow_mut()
                .create_table(fm.clone(), "widgets".into(), schema.clone(), "CREATE TABLE widgets (id INT, v INT, PRIMARY KEY (id));".into())
                .unwrap();
            {
                let master_tree = catalog.borrow().get(MASTER_TABLE_NAME).unwrap().tree.clone();
                let master_schema = master_schema();
                let row = Row::new(
                    master_schema.clone(),
                    vec![
                        Value::Text(Text::from_str_padded("widgets", MAX_TABLE_NAME_LEN)),
                        Value::Text(Text::from_str_padded(
                            "CREATE TABLE widgets (id INT, v INT, PRIMARY KEY (id));",
                            MASTER_SQL_COLUMN_WIDTH,
                        )),
                        Value::Int(catalog.borrow().get("widgets").unwrap().tree.borrow().root().0 as i32),
                        Value::Int(0),
                    ],
                );
                master_tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize()).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open(&path, DbOptions::default()).unwrap();
        let catalog = db.catalog();
        assert!(catalog.borrow().get("widgets").is_some());
        assert_eq!(catalog.borrow().get("widgets").unwrap().schema.columns.len(), 2);
    }
}
