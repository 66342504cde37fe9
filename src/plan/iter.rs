//! Volcano-style pull iterators. `current()` returns a materialized
//! [`Row`] rather than a borrowed `RowView` so `Box<dyn PlanIter>` stays
//! object-safe.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::cursor::Cursor;
use crate::error::{DbError, EngineError, QueryError};
use crate::row::{value_bytes, Row, Value};
use crate::schema::Schema;
use crate::sql::ast::Arith;
use crate::sql::validator::{CheckedAssignment, CheckedCondition, CheckedExpr};

/// A single step of a statement's execution plan. `next` advances to the
/// next qualifying row, returning `false` once exhausted; `current` reads
/// the row the last successful `next` produced. `count` is the running
/// total of rows this iterator has produced or affected, surfaced to the
/// caller as the statement's row count.
pub trait PlanIter {
    fn next(&mut self) -> Result<bool, DbError>;
    fn current(&self) -> Result<Row, DbError>;
    fn count(&self) -> usize;
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Real(x), Value::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn apply_arith(op: Arith, a: &Value, b: &Value) -> Result<Value<'static>, QueryError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if matches!(op, Arith::Div) && *y == 0 {
                return Err(QueryError::DivisionByZero);
            }
            Ok(Value::Int(match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
                Arith::Div => x / y,
            }))
        }
        (Value::Real(x), Value::Real(y)) => Ok(Value::Real(match op {
            Arith::Add => x + y,
            Arith::Sub => x - y,
            Arith::Mul => x * y,
            // IEEE-754 division by zero yields ±inf/NaN rather than trapping,
            // unlike the Int case above, so no guard is needed here.
            Arith::Div => x / y,
        })),
        _ => unreachable!("validator only produces Arith over matching numeric columns"),
    }
}

/// A full, unordered scan of a table: opens its own cursor at the first
/// row and pulls one slot per call.
pub struct TableScan {
    cursor: Rc<RefCell<Cursor>>,
    count: usize,
}

impl TableScan {
    pub fn new(cursor: Rc<RefCell<Cursor>>) -> Self {
        TableScan { cursor, count: 0 }
    }

    pub fn shared_cursor(&self) -> Rc<RefCell<Cursor>> {
        self.cursor.clone()
    }
}

impl PlanIter for TableScan {
    fn next(&mut self) -> Result<bool, DbError> {
        let has_row = self.cursor.borrow_mut().step()?;
        if has_row {
            self.count += 1;
        }
        Ok(has_row)
    }

    fn current(&self) -> Result<Row, DbError> {
        Ok(self
            .cursor
            .borrow()
            .materialize_current()?
            .ok_or(EngineError::EndOfTree)?)
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// A range-bounded scan: the plan builder already positions the cursor at
/// the lower bound (or the first row, if unbounded below); this iterator's
/// own job is skipping a non-inclusive lower-bound match and stopping once
/// the upper bound is exceeded.
pub struct IndexScan {
    cursor: Rc<RefCell<Cursor>>,
    key_type_size: usize,
    lower: Option<(Value<'static>, bool)>,
    upper: Option<(Value<'static>, bool)>,
    skipped_lower: bool,
    count: usize,
}

impl IndexScan {
    pub fn new(
        cursor: Rc<RefCell<Cursor>>,
        key_type_size: usize,
        lower: Option<(Value<'static>, bool)>,
        upper: Option<(Value<'static>, bool)>,
    ) -> Self {
        IndexScan { cursor, key_type_size, lower, upper, skipped_lower: false, count: 0 }
    }

    pub fn shared_cursor(&self) -> Rc<RefCell<Cursor>> {
        self.cursor.clone()
    }
}

impl PlanIter for IndexScan {
    fn next(&mut self) -> Result<bool, DbError> {
        if !self.cursor.borrow_mut().step()? {
            return Ok(false);
        }

        if !self.skipped_lower {
            self.skipped_lower = true;
            if let Some((value, inclusive)) = &self.lower {
                if !inclusive {
                    let current = self.cursor.borrow().current_key()?;
                    if current.as_deref() == Some(value_bytes(value, self.key_type_size).as_slice()) {
                        if !self.cursor.borrow_mut().step()? {
                            return Ok(false);
                        }
                    }
                }
            }
        }

        if let Some((value, inclusive)) = &self.upper {
            let current = self.cursor.borrow().current_key()?.ok_or(EngineError::EndOfTree)?;
            let bound = value_bytes(value, self.key_type_size);
            let past = match current.as_slice().cmp(bound.as_slice()) {
                Ordering::Greater => true,
                Ordering::Equal => !inclusive,
                Ordering::Less => false,
            };
            if past {
                return Ok(false);
            }
        }

        self.count += 1;
        Ok(true)
    }

    fn current(&self) -> Result<Row, DbError> {
        Ok(self
            .cursor
            .borrow()
            .materialize_current()?
            .ok_or(EngineError::EndOfTree)?)
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Pulls its child until a compiled predicate accepts a row.
pub struct Filter {
    child: Box<dyn PlanIter>,
    conditions: Vec<CheckedCondition>,
    count: usize,
}

impl Filter {
    pub fn new(child: Box<dyn PlanIter>, conditions: Vec<CheckedCondition>) -> Self {
        Filter { child, conditions, count: 0 }
    }

    fn accepts(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| {
            let field = &row.values[c.column];
            let ord = compare_values(field, &c.value);
            match c.op {
                crate::sql::ast::Operator::Eq => ord == Ordering::Equal,
                crate::sql::ast::Operator::Neq => ord != Ordering::Equal,
                crate::sql::ast::Operator::Gt => ord == Ordering::Greater,
                crate::sql::ast::Operator::Ge => ord != Ordering::Less,
                crate::sql::ast::Operator::Lt => ord == Ordering::Less,
                crate::sql::ast::Operator::Le => ord != Ordering::Greater,
            }
        })
    }
}

impl PlanIter for Filter {
    fn next(&mut self) -> Result<bool, DbError> {
        loop {
            if !self.child.next()? {
                return Ok(false);
            }
            let row = self.child.current()?;
            if self.accepts(&row) {
                self.count += 1;
                return Ok(true);
            }
        }
    }

    fn current(&self) -> Result<Row, DbError> {
        self.child.current()
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Narrows each row from the child's schema to a selected column subset.
pub struct Project {
    child: Box<dyn PlanIter>,
    schema: Arc<Schema>,
    count: usize,
}

impl Project {
    pub fn new(child: Box<dyn PlanIter>, schema: Arc<Schema>) -> Self {
        Project { child, schema, count: 0 }
    }
}

impl PlanIter for Project {
    fn next(&mut self) -> Result<bool, DbError> {
        let has_row = self.child.next()?;
        if has_row {
            self.count += 1;
        }
        Ok(has_row)
    }

    fn current(&self) -> Result<Row, DbError> {
        let row = self.child.current()?;
        let values = self
            .schema
            .columns
            .iter()
            .map(|c| {
                let src = row
                    .schema
                    .column_index(&c.name)
                    .expect("projected column exists in the source schema");
                row.values[src].clone()
            })
            .collect();
        Ok(Row::new(self.schema.clone(), values))
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Yields pre-materialized rows from a `VALUES` clause one at a time.
pub struct Values {
    rows: Vec<Row>,
    position: Option<usize>,
    count: usize,
}

impl Values {
    pub fn new(rows: Vec<Row>) -> Self {
        Values { rows, position: None, count: 0 }
    }
}

impl PlanIter for Values {
    fn next(&mut self) -> Result<bool, DbError> {
        let next_pos = self.position.map_or(0, |p| p + 1);
        self.position = Some(next_pos);
        let has_row = next_pos < self.rows.len();
        if has_row {
            self.count += 1;
        }
        Ok(has_row)
    }

    fn current(&self) -> Result<Row, DbError> {
        let pos = self.position.ok_or(EngineError::EndOfTree)?;
        self.rows.get(pos).cloned().ok_or_else(|| EngineError::EndOfTree.into())
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Pulls rows from its child (typically a `Values`) and inserts each one.
pub struct Insert {
    child: Box<dyn PlanIter>,
    cursor: Rc<RefCell<Cursor>>,
    count: usize,
}

impl Insert {
    pub fn new(child: Box<dyn PlanIter>, cursor: Rc<RefCell<Cursor>>) -> Self {
        Insert { child, cursor, count: 0 }
    }
}

impl PlanIter for Insert {
    fn next(&mut self) -> Result<bool, DbError> {
        if !self.child.next()? {
            return Ok(false);
        }
        let row = self.child.current()?;
        let key = row.primary_key_bytes();
        let bytes = row.serialize();
        let inserted = self.cursor.borrow_mut().insert(&key, &bytes)?;
        if !inserted {
            return Err(QueryError::DuplicatePrimaryKey.into());
        }
        self.count += 1;
        Ok(true)
    }

    fn current(&self) -> Result<Row, DbError> {
        Ok(self
            .cursor
            .borrow()
            .materialize_current()?
            .ok_or(EngineError::EndOfTree)?)
    }

    fn count(&self) -> usize {
        self.count
    }
}

fn eval_expr(expr: &CheckedExpr, row: &Row) -> Result<Value<'static>, QueryError> {
    match expr {
        CheckedExpr::Literal(v) => Ok(v.clone()),
        CheckedExpr::Column(idx) => Ok(row.values[*idx].clone()),
        CheckedExpr::Arith(idx, op, rhs) => apply_arith(*op, &row.values[*idx], rhs),
    }
}

/// Pulls rows from its child scan and writes a compiled set of field
/// updates onto the scan's own cursor slot. The cursor is the same one the
/// underlying `TableScan`/`IndexScan` owns (see `plan/builder.rs`), so the
/// write lands on the row the scan just produced.
pub struct Update {
    child: Box<dyn PlanIter>,
    cursor: Rc<RefCell<Cursor>>,
    assignments: Vec<CheckedAssignment>,
    count: usize,
}

impl Update {
    pub fn new(child: Box<dyn PlanIter>, cursor: Rc<RefCell<Cursor>>, assignments: Vec<CheckedAssignment>) -> Self {
        Update { child, cursor, assignments, count: 0 }
    }
}

impl PlanIter for Update {
    fn next(&mut self) -> Result<bool, DbError> {
        if !self.child.next()? {
            return Ok(false);
        }
        let row = self.child.current()?;
        for assignment in &self.assignments {
            let new_value = eval_expr(&assignment.expr, &row)?;
            let column = &row.schema.columns[assignment.column];
            let bytes = value_bytes(&new_value, column.size);
            self.cursor.borrow_mut().write_field(column.offset, &bytes)?;
        }
        self.count += 1;
        Ok(true)
    }

    fn current(&self) -> Result<Row, DbError> {
        self.child.current()
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Pulls rows from its child scan and erases each one via the scan's own
/// cursor. `Cursor::erase_current` repositions to the erased row's in-order
/// successor so the shared scan stays valid.
pub struct Erase {
    child: Box<dyn PlanIter>,
    cursor: Rc<RefCell<Cursor>>,
    count: usize,
}

impl Erase {
    pub fn new(child: Box<dyn PlanIter>, cursor: Rc<RefCell<Cursor>>) -> Self {
        Erase { child, cursor, count: 0 }
    }
}

impl PlanIter for Erase {
    fn next(&mut self) -> Result<bool, DbError> {
        if !self.child.next()? {
            return Ok(false);
        }
        let erased = self.cursor.borrow_mut().erase_current()?;
        if erased {
            self.count += 1;
        }
        Ok(erased)
    }

    fn current(&self) -> Result<Row, DbError> {
        self.child.current()
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// One-shot: installs a table into the catalog on its first `next`, then
/// reports exhausted. The privileged master-table write that records the
/// new table's `CREATE TABLE` text happens in `engine.rs` after this
/// iterator runs, not here — `Create` only owns the in-memory catalog entry.
pub struct Create {
    catalog: Rc<RefCell<Catalog>>,
    fm: Rc<RefCell<crate::frame_manager::FrameManager>>,
    table: String,
    schema: Arc<Schema>,
    sql: String,
    done: bool,
    count: usize,
}

impl Create {
    pub fn new(
        catalog: Rc<RefCell<Catalog>>,
        fm: Rc<RefCell<crate::frame_manager::FrameManager>>,
        table: String,
        schema: Arc<Schema>,
        sql: String,
    ) -> Self {
        Create { catalog, fm, table, schema, sql, done: false, count: 0 }
    }
}

impl PlanIter for Create {
    fn next(&mut self) -> Result<bool, DbError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        self.catalog.borrow_mut().create_table(
            self.fm.clone(),
            self.table.clone(),
            self.schema.clone(),
            self.sql.clone(),
        )?;
        self.count += 1;
        Ok(true)
    }

    fn current(&self) -> Result<Row, DbError> {
        Err(EngineError::EndOfTree.into())
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// One-shot table removal, symmetric with [`Create`].
pub struct Drop {
    catalog: Rc<RefCell<Catalog>>,
    table: String,
    done: bool,
    count: usize,
}

impl Drop {
    pub fn new(catalog: Rc<RefCell<Catalog>>, table: String) -> Self {
        Drop { catalog, table, done: false, count: 0 }
    }
}

impl PlanIter for Drop {
    fn next(&mut self) -> Result<bool, DbError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        self.catalog.borrow_mut().drop_table(&self.table)?;
        self.count += 1;
        Ok(true)
    }

    fn current(&self) -> Result<Row, DbError> {
        Err(EngineError::EndOfTree.into())
    }

    fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use crate::frame_manager::FrameManager;
    use crate::schema::ColumnType;
    use tempfile::NamedTempFile;

    fn test_schema() -> Arc<Schema> {
        Schema::new(vec!["id".into(), "v".into()], vec![ColumnType::Int, ColumnType::Int], "id").unwrap()
    }

    fn fresh_fm() -> Rc<RefCell<FrameManager>> {
        let tmp = NamedTempFile::new().unwrap();
        let disk = DiskManager::open(tmp.path(), 0, 4096).unwrap();
        let cache = crate::cache::PageCache::new(disk, 64);
        let free_list = crate::freelist::FreeList::new(cache.clone(), crate::page::PageId::NONE);
        Rc::new(RefCell::new(FrameManager::from_parts(cache, free_list)))
    }

    #[test]
    fn table_scan_yields_rows_in_key_order() {
        let fm = fresh_fm();
        let schema = test_schema();
        let tree = Rc::new(RefCell::new(
            crate::btree::BPlusTree::new(fm, schema.key_type(), 4, schema.row_size as u16, crate::page::PageId::NONE).unwrap(),
        ));
        for i in [3, 1, 2] {
            let row = Row::new(schema.clone(), vec![Value::Int(i), Value::Int(i * 10)]);
            tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize()).unwrap();
        }
        let cursor = Rc::new(RefCell::new(Cursor::open_first(tree, schema).unwrap()));
        let mut scan = TableScan::new(cursor);
        let mut seen = Vec::new();
        while scan.next().unwrap() {
            let row = scan.current().unwrap();
            seen.push(match row.values[0] {
                Value::Int(n) => n,
                _ => unreachable!(),
            });
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(scan.count(), 3);
    }

    #[test]
    fn filter_skips_rows_that_fail_the_predicate() {
        let fm = fresh_fm();
        let schema = test_schema();
        let tree = Rc::new(RefCell::new(
            crate::btree::BPlusTree::new(fm, schema.key_type(), 4, schema.row_size as u16, crate::page::PageId::NONE).unwrap(),
        ));
        for i in 1..=5 {
            let row = Row::new(schema.clone(), vec![Value::Int(i), Value::Int(i * 10)]);
            tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize()).unwrap();
        }
        let cursor = Rc::new(RefCell::new(Cursor::open_first(tree, schema).unwrap()));
        let scan = Box::new(TableScan::new(cursor));
        let mut filter = Filter::new(
            scan,
            vec![CheckedCondition { column: 0, op: crate::sql::ast::Operator::Gt, value: Value::Int(2) }],
        );
        let mut seen = 0;
        while filter.next().unwrap() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn erase_removes_rows_and_stays_stable_across_deletes() {
        let fm = fresh_fm();
        let schema = test_schema();
        let tree = Rc::new(RefCell::new(
            crate::btree::BPlusTree::new(fm, schema.key_type(), 4, schema.row_size as u16, crate::page::PageId::NONE).unwrap(),
        ));
        for i in 1..=4 {
            let row = Row::new(schema.clone(), vec![Value::Int(i), Value::Int(i * 10)]);
            tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize()).unwrap();
        }
        let cursor = Rc::new(RefCell::new(Cursor::open_first(tree.clone(), schema.clone()).unwrap()));
        let scan = Box::new(TableScan::new(cursor.clone()));
        let mut erase = Erase::new(scan, cursor);
        let mut erased = 0;
        while erase.next().unwrap() {
            erased += 1;
        }
        assert_eq!(erased, 4);
        assert!(tree.borrow().get(&1i32.to_ne_bytes()).unwrap().is_none());
        assert!(tree.borrow().get(&4i32.to_ne_bytes()).unwrap().is_none());
    }

    #[test]
    fn int_division_by_zero_is_a_query_error_not_a_panic() {
        let err = apply_arith(Arith::Div, &Value::Int(10), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, QueryError::DivisionByZero));
    }

    #[test]
    fn real_division_by_zero_yields_infinity() {
        let result = apply_arith(Arith::Div, &Value::Real(1.0), &Value::Real(0.0)).unwrap();
        assert_eq!(result, Value::Real(f64::INFINITY));
    }
}
