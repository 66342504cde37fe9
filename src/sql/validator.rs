//! AST + catalog -> typed, checked query, built on this crate's by-value
//! `Value`/`Schema` types.

use std::sync::Arc;

use crate::config::ROWID_COLUMN;
use crate::error::QueryError;
use crate::row::{Row, Value};
use crate::schema::{ColumnType, Schema};
use crate::sql::ast::{Arith, Assignment, ColumnDef, Condition, Expr, Literal, Operator, Statement};
use crate::text::Text;

/// What the validator needs from the catalog. Implemented by
/// [`crate::catalog::Catalog`]; kept as a trait here so this module doesn't
/// depend on the catalog's storage details.
pub trait CatalogLookup {
    fn schema(&self, table: &str) -> Option<Arc<Schema>>;
    fn exists(&self, table: &str) -> bool {
        self.schema(table).is_some()
    }
    /// Returns the next auto-generated `rowid` value for `table` and
    /// advances its counter. Only called for tables with no user-declared
    /// primary key.
    fn next_rowid(&mut self, table: &str) -> i32;
}

#[derive(Debug, Clone)]
pub struct CheckedCondition {
    pub column: usize,
    pub op: Operator,
    pub value: Value<'static>,
}

#[derive(Debug, Clone)]
pub enum CheckedExpr {
    Literal(Value<'static>),
    Column(usize),
    Arith(usize, Arith, Value<'static>),
}

#[derive(Debug, Clone)]
pub struct CheckedAssignment {
    pub column: usize,
    pub expr: CheckedExpr,
}

#[derive(Debug)]
pub enum CheckedQuery {
    CreateTable {
        table: String,
        schema: Arc<Schema>,
    },
    DropTable {
        table: String,
    },
    Select {
        table: String,
        schema: Arc<Schema>,
        columns: Vec<String>,
        conditions: Vec<CheckedCondition>,
    },
    Insert {
        table: String,
        schema: Arc<Schema>,
        rows: Vec<Row>,
    },
    Update {
        table: String,
        schema: Arc<Schema>,
        assignments: Vec<CheckedAssignment>,
        conditions: Vec<CheckedCondition>,
    },
    Delete {
        table: String,
        schema: Arc<Schema>,
        conditions: Vec<CheckedCondition>,
    },
}

pub fn validate(
    statement: Statement,
    catalog: &mut dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    match statement {
        Statement::CreateTable { table, columns, primary } => validate_create(table, columns, primary, catalog),
        Statement::DropTable { table } => validate_drop(table, catalog, master_enabled),
        Statement::Select { table, columns, conditions } => {
            validate_select(table, columns, conditions, catalog, master_enabled)
        }
        Statement::Insert { table, columns, rows } => {
            validate_insert(table, columns, rows, catalog, master_enabled)
        }
        Statement::Update { table, assignments, conditions } => {
            validate_update(table, assignments, conditions, catalog, master_enabled)
        }
        Statement::Delete { table, conditions } => validate_delete(table, conditions, catalog, master_enabled),
    }
}

fn guard_master(table: &str, master_enabled: bool) -> Result<(), QueryError> {
    if !master_enabled && table == crate::config::MASTER_TABLE_NAME {
        Err(QueryError::MasterTableForbidden)
    } else {
        Ok(())
    }
}

fn resolve_table(table: &str, catalog: &dyn CatalogLookup, master_enabled: bool) -> Result<Arc<Schema>, QueryError> {
    guard_master(table, master_enabled)?;
    catalog.schema(table).ok_or_else(|| QueryError::UnknownTable(table.to_string()))
}

fn validate_create(
    table: String,
    columns: Vec<ColumnDef>,
    primary: Option<String>,
    catalog: &dyn CatalogLookup,
) -> Result<CheckedQuery, QueryError> {
    if table.len() > crate::config::MAX_TABLE_NAME_LEN {
        return Err(QueryError::TableNameTooLong(table, crate::config::MAX_TABLE_NAME_LEN));
    }
    if catalog.exists(&table) {
        return Err(QueryError::TableExists(table));
    }

    let mut seen = std::collections::HashSet::new();
    for col in &columns {
        if col.name == ROWID_COLUMN {
            return Err(QueryError::ReservedColumn(col.name.clone()));
        }
        if !seen.insert(col.name.clone()) {
            return Err(QueryError::DuplicateColumn(col.name.clone()));
        }
    }

    let mut names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let mut types: Vec<ColumnType> = columns.iter().map(|c| c.ty).collect();
    let primary_name = match primary {
        Some(name) => name,
        None => {
            names.push(ROWID_COLUMN.to_string());
            types.push(ColumnType::Int);
            ROWID_COLUMN.to_string()
        }
    };

    let row_size: usize = types.iter().map(|t| t.size()).sum();
    if row_size > crate::config::MAX_ROW_WIDTH {
        return Err(QueryError::RowTooWide { actual: row_size, max: crate::config::MAX_ROW_WIDTH });
    }

    let schema = Schema::new(names, types, &primary_name)?;
    Ok(CheckedQuery::CreateTable { table, schema })
}

fn validate_drop(
    table: String,
    catalog: &dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    resolve_table(&table, catalog, master_enabled)?;
    Ok(CheckedQuery::DropTable { table })
}

fn validate_select(
    table: String,
    columns: Option<Vec<String>>,
    conditions: Vec<Condition>,
    catalog: &dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    let schema = resolve_table(&table, catalog, master_enabled)?;
    let columns = match columns {
        Some(names) => {
            for name in &names {
                if schema.column_index(name).is_none() {
                    return Err(QueryError::UnknownColumn(name.clone()));
                }
            }
            names
        }
        None => schema.columns.iter().map(|c| c.name.clone()).collect(),
    };
    let conditions = validate_conditions(conditions, &schema)?;
    Ok(CheckedQuery::Select { table, schema, columns, conditions })
}

fn validate_conditions(conditions: Vec<Condition>, schema: &Schema) -> Result<Vec<CheckedCondition>, QueryError> {
    conditions
        .into_iter()
        .map(|c| validate_condition(c, schema))
        .collect()
}

fn validate_condition(condition: Condition, schema: &Schema) -> Result<CheckedCondition, QueryError> {
    let index = schema
        .column_index(&condition.column)
        .ok_or_else(|| QueryError::UnknownColumn(condition.column.clone()))?;
    let column = &schema.columns[index];
    let value = coerce_literal(&condition.value, column.ty, &column.name)?;
    Ok(CheckedCondition { column: index, op: condition.op, value })
}

fn validate_insert(
    table: String,
    columns: Option<Vec<String>>,
    value_rows: Vec<Vec<Literal>>,
    catalog: &mut dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    let schema = resolve_table(&table, catalog, master_enabled)?;
    let use_rowid = schema.primary().name == ROWID_COLUMN;

    let target_columns: Vec<usize> = match columns {
        Some(names) => names
            .iter()
            .map(|name| {
                let index = schema.column_index(name).ok_or_else(|| QueryError::UnknownColumn(name.clone()))?;
                if use_rowid && index == schema.primary_index {
                    return Err(QueryError::ReservedColumn(name.clone()));
                }
                Ok(index)
            })
            .collect::<Result<_, QueryError>>()?,
        None => (0..schema.columns.len())
            .filter(|&i| !(use_rowid && i == schema.primary_index))
            .collect(),
    };

    let mut rows = Vec::with_capacity(value_rows.len());
    for literals in value_rows {
        if literals.len() != target_columns.len() {
            return Err(QueryError::Syntax(format!(
                "expected {} values, got {}",
                target_columns.len(),
                literals.len()
            )));
        }
        let mut slots: Vec<Option<Value<'static>>> = vec![None; schema.columns.len()];
        for (&slot, literal) in target_columns.iter().zip(literals.iter()) {
            let column = &schema.columns[slot];
            slots[slot] = Some(coerce_literal(literal, column.ty, &column.name)?);
        }
        if use_rowid {
            slots[schema.primary_index] = Some(Value::Int(catalog.next_rowid(&table)));
        }
        let values: Vec<Value<'static>> = slots.into_iter().map(|v| v.expect("every column slot filled")).collect();
        rows.push(Row::new(schema.clone(), values));
    }

    Ok(CheckedQuery::Insert { table, schema, rows })
}

fn validate_update(
    table: String,
    assignments: Vec<Assignment>,
    conditions: Vec<Condition>,
    catalog: &dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    let schema = resolve_table(&table, catalog, master_enabled)?;

    let assignments = assignments
        .into_iter()
        .map(|a| validate_assignment(a, &schema))
        .collect::<Result<_, QueryError>>()?;
    let conditions = validate_conditions(conditions, &schema)?;
    Ok(CheckedQuery::Update { table, schema, assignments, conditions })
}

fn validate_assignment(assignment: Assignment, schema: &Schema) -> Result<CheckedAssignment, QueryError> {
    let index = schema
        .column_index(&assignment.column)
        .ok_or_else(|| QueryError::UnknownColumn(assignment.column.clone()))?;
    if index == schema.primary_index {
        return Err(QueryError::ReservedColumn(assignment.column));
    }
    let target = &schema.columns[index];

    let expr = match assignment.expr {
        Expr::Literal(lit) => CheckedExpr::Literal(coerce_literal(&lit, target.ty, &target.name)?),
        Expr::Column(name) => {
            let src = schema.column_index(&name).ok_or_else(|| QueryError::UnknownColumn(name.clone()))?;
            if schema.columns[src].ty != target.ty {
                return Err(QueryError::TypeMismatch { column: name, expected: target.ty.name() });
            }
            CheckedExpr::Column(src)
        }
        Expr::Arith(name, op, lit) => {
            if matches!(target.ty, ColumnType::Text(_)) {
                return Err(QueryError::OperatorNotPermitted { op: arith_name(op), column: target.name.clone() });
            }
            let src = schema.column_index(&name).ok_or_else(|| QueryError::UnknownColumn(name.clone()))?;
            if schema.columns[src].ty != target.ty {
                return Err(QueryError::TypeMismatch { column: name, expected: target.ty.name() });
            }
            let value = coerce_literal(&lit, target.ty, &target.name)?;
            CheckedExpr::Arith(src, op, value)
        }
    };
    Ok(CheckedAssignment { column: index, expr })
}

fn arith_name(op: Arith) -> &'static str {
    match op {
        Arith::Add => "+",
        Arith::Sub => "-",
        Arith::Mul => "*",
        Arith::Div => "/",
    }
}

fn validate_delete(
    table: String,
    conditions: Vec<Condition>,
    catalog: &dyn CatalogLookup,
    master_enabled: bool,
) -> Result<CheckedQuery, QueryError> {
    let schema = resolve_table(&table, catalog, master_enabled)?;
    let conditions = validate_conditions(conditions, &schema)?;
    Ok(CheckedQuery::Delete { table, schema, conditions })
}

fn coerce_literal(literal: &Literal, ty: ColumnType, column: &str) -> Result<Value<'static>, QueryError> {
    match (ty, literal) {
        (ColumnType::Int, Literal::Int(n)) => Ok(Value::Int(*n)),
        (ColumnType::Int, Literal::Real(r)) => Ok(Value::Int(*r as i32)),
        (ColumnType::Real, Literal::Real(r)) => Ok(Value::Real(*r)),
        (ColumnType::Real, Literal::Int(n)) => Ok(Value::Real(*n as f64)),
        (ColumnType::Text(size), Literal::Text(s)) => {
            if s.len() > size {
                return Err(QueryError::TypeMismatch { column: column.to_string(), expected: "TEXT within declared width" });
            }
            Ok(Value::Text(Text::from_str_padded(s, size)))
        }
        (ColumnType::Text(_), _) => Err(QueryError::TypeMismatch { column: column.to_string(), expected: "TEXT" }),
        (_, Literal::Text(_)) => Err(QueryError::TypeMismatch { column: column.to_string(), expected: ty.name() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::parse_statement;
    use std::collections::HashMap;

    struct FakeCatalog {
        schemas: HashMap<String, Arc<Schema>>,
        rowids: HashMap<String, i32>,
    }
    impl CatalogLookup for FakeCatalog {
        fn schema(&self, table: &str) -> Option<Arc<Schema>> {
            self.schemas.get(table).cloned()
        }
        fn next_rowid(&mut self, table: &str) -> i32 {
            let counter = self.rowids.entry(table.to_string()).or_insert(0);
            let value = *counter;
            *counter += 1;
            value
        }
    }

    fn catalog_with(table: &str, schema: Arc<Schema>) -> FakeCatalog {
        let mut schemas = HashMap::new();
        schemas.insert(table.to_string(), schema);
        FakeCatalog { schemas, rowids: HashMap::new() }
    }

    #[test]
    fn create_without_primary_key_adds_rowid() {
        let stmt = parse_statement("CREATE TABLE t (v INT);").unwrap();
        let mut catalog = FakeCatalog { schemas: HashMap::new(), rowids: HashMap::new() };
        let query = validate(stmt, &mut catalog, false).unwrap();
        match query {
            CheckedQuery::CreateTable { schema, .. } => {
                assert_eq!(schema.primary().name, ROWID_COLUMN);
                assert_eq!(schema.columns.len(), 2);
            }
            other => panic!("expected CreateTable, got {other:?}"),
        }
    }

    #[test]
    fn insert_without_explicit_columns_skips_auto_rowid() {
        let schema = Schema::new(vec!["v".into(), "rowid".into()], vec![ColumnType::Int, ColumnType::Int], "rowid").unwrap();
        let mut catalog = catalog_with("t", schema);
        let stmt = parse_statement("INSERT INTO t VALUES (7);").unwrap();
        let query = validate(stmt, &mut catalog, false).unwrap();
        match query {
            CheckedQuery::Insert { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].values[rows[0].schema.column_index("v").unwrap()], Value::Int(7));
                assert_eq!(rows[0].values[rows[0].schema.primary_index], Value::Int(0));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn update_rejects_arithmetic_on_text_column() {
        let schema = Schema::new(vec!["id".into(), "s".into()], vec![ColumnType::Int, ColumnType::Text(8)], "id").unwrap();
        let mut catalog = catalog_with("t", schema);
        let stmt = parse_statement("UPDATE t SET s = s + 1;").unwrap();
        let err = validate(stmt, &mut catalog, false).unwrap_err();
        assert!(matches!(err, QueryError::OperatorNotPermitted { .. }));
    }

    #[test]
    fn update_rejects_assignment_to_primary_key() {
        let schema = Schema::new(vec!["id".into(), "v".into()], vec![ColumnType::Int, ColumnType::Int], "id").unwrap();
        let mut catalog = catalog_with("t", schema);
        let stmt = parse_statement("UPDATE t SET id = 5;").unwrap();
        let err = validate(stmt, &mut catalog, false).unwrap_err();
        assert!(matches!(err, QueryError::ReservedColumn(_)));
    }

    #[test]
    fn master_table_rejected_without_privilege() {
        let schema = Schema::new(
            vec!["table_name".into(), "sql".into(), "root".into(), "next_rowid".into()],
            vec![ColumnType::Text(32), ColumnType::Text(256), ColumnType::Int, ColumnType::Int],
            "table_name",
        )
        .unwrap();
        let mut catalog = catalog_with(crate::config::MASTER_TABLE_NAME, schema);
        let stmt = parse_statement("SELECT * FROM __master__;").unwrap();
        let err = validate(stmt, &mut catalog, false).unwrap_err();
        assert!(matches!(err, QueryError::MasterTableForbidden));
    }
}
