//! Lowers a validated query into an execution plan. The predicate-to-range
//! reduction in `build_scan` is the one piece of real query-planning logic
//! in this engine.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::cursor::Cursor;
use crate::error::DbError;
use crate::frame_manager::FrameManager;
use crate::plan::iter::{compare_values, Create, Drop, Erase, Filter, IndexScan, Insert, PlanIter, Project, TableScan, Update, Values};
use crate::row::{value_bytes, Value};
use crate::schema::Schema;
use crate::sql::ast::Operator;
use crate::sql::validator::{CheckedCondition, CheckedQuery};

/// Builds the plan for one validated query. `original_sql` is the verbatim
/// source text of a `CREATE TABLE` statement — `engine.rs` supplies it so
/// the `Create` iterator can hand the catalog the same text the master
/// table will persist; every other query variant ignores it.
pub fn build(
    query: CheckedQuery,
    catalog: Rc<RefCell<Catalog>>,
    fm: Rc<RefCell<FrameManager>>,
    original_sql: Option<&str>,
) -> Result<Box<dyn PlanIter>, DbError> {
    match query {
        CheckedQuery::CreateTable { table, schema } => {
            let sql = original_sql.unwrap_or_default().to_string();
            Ok(Box::new(Create::new(catalog, fm, table, schema, sql)))
        }
        CheckedQuery::DropTable { table } => Ok(Box::new(Drop::new(catalog, table))),
        CheckedQuery::Select { table, schema, columns, conditions } => {
            let (scan, _cursor, filters) = build_scan(&table, &schema, conditions, &catalog)?;
            let mut plan = wrap_filter(scan, filters);
            if needs_projection(&schema, &columns) {
                let projected = schema.project(&columns)?;
                plan = Box::new(Project::new(plan, projected));
            }
            Ok(plan)
        }
        CheckedQuery::Insert { table, schema, rows } => {
            let tree = {
                let cat = catalog.borrow();
                cat.require(&table)?.tree.clone()
            };
            let cursor = Rc::new(RefCell::new(Cursor::open_first(tree, schema)?));
            let values: Box<dyn PlanIter> = Box::new(Values::new(rows));
            Ok(Box::new(Insert::new(values, cursor)))
        }
        CheckedQuery::Update { table, schema, assignments, conditions } => {
            let (scan, cursor, filters) = build_scan(&table, &schema, conditions, &catalog)?;
            let plan = wrap_filter(scan, filters);
            Ok(Box::new(Update::new(plan, cursor, assignments)))
        }
        CheckedQuery::Delete { table, schema, conditions } => {
            let (scan, cursor, filters) = build_scan(&table, &schema, conditions, &catalog)?;
            let plan = wrap_filter(scan, filters);
            Ok(Box::new(Erase::new(plan, cursor)))
        }
    }
}

fn wrap_filter(scan: Box<dyn PlanIter>, filters: Vec<CheckedCondition>) -> Box<dyn PlanIter> {
    if filters.is_empty() {
        scan
    } else {
        Box::new(Filter::new(scan, filters))
    }
}

fn needs_projection(schema: &Arc<Schema>, columns: &[String]) -> bool {
    columns.len() != schema.columns.len() || columns.iter().zip(schema.columns.iter()).any(|(name, col)| name != &col.name)
}

/// Implements SPEC step 1-3 of predicate-to-scan lowering: a single pass
/// over `conditions` separates out everything that can shape an
/// `IndexScan`'s range from everything that must stay a post-scan filter.
fn build_scan(
    table: &str,
    schema: &Arc<Schema>,
    conditions: Vec<CheckedCondition>,
    catalog: &Rc<RefCell<Catalog>>,
) -> Result<(Box<dyn PlanIter>, Rc<RefCell<Cursor>>, Vec<CheckedCondition>), DbError> {
    let tree = {
        let cat = catalog.borrow();
        cat.require(table)?.tree.clone()
    };

    let primary = schema.primary_index;
    let mut equality: Option<Value<'static>> = None;
    let mut lower: Option<(Value<'static>, bool)> = None;
    let mut upper: Option<(Value<'static>, bool)> = None;
    let mut filters = Vec::new();

    for cond in conditions {
        if cond.column != primary {
            filters.push(cond);
            continue;
        }
        match cond.op {
            Operator::Eq => {
                if equality.is_none() {
                    equality = Some(cond.value);
                } else {
                    filters.push(cond);
                }
            }
            Operator::Neq => filters.push(cond),
            Operator::Gt => tighten_lower(&mut lower, cond.value, false),
            Operator::Ge => tighten_lower(&mut lower, cond.value, true),
            Operator::Lt => tighten_upper(&mut upper, cond.value, false),
            Operator::Le => tighten_upper(&mut upper, cond.value, true),
        }
    }

    let key_size = schema.key_type().size();

    if let Some(eq) = equality {
        // An equality scan already pins lb = ub = value; any other range
        // bound on the primary column can't narrow it further, so it falls
        // back to a filter instead of being silently dropped.
        if let Some((value, inclusive)) = lower.take() {
            filters.push(CheckedCondition {
                column: primary,
                op: if inclusive { Operator::Ge } else { Operator::Gt },
                value,
            });
        }
        if let Some((value, inclusive)) = upper.take() {
            filters.push(CheckedCondition {
                column: primary,
                op: if inclusive { Operator::Le } else { Operator::Lt },
                value,
            });
        }
        let key_bytes = value_bytes(&eq, key_size);
        let cursor = Rc::new(RefCell::new(Cursor::open_at(tree, schema.clone(), &key_bytes)?));
        let scan = IndexScan::new(cursor.clone(), key_size, Some((eq.clone(), true)), Some((eq, true)));
        return Ok((Box::new(scan), cursor, filters));
    }

    if lower.is_none() && upper.is_none() {
        let cursor = Rc::new(RefCell::new(Cursor::open_first(tree, schema.clone())?));
        let scan = TableScan::new(cursor.clone());
        return Ok((Box::new(scan), cursor, filters));
    }

    let cursor = match &lower {
        Some((value, _)) => Rc::new(RefCell::new(Cursor::open_at(tree, schema.clone(), &value_bytes(value, key_size))?)),
        None => Rc::new(RefCell::new(Cursor::open_first(tree, schema.clone())?)),
    };
    let scan = IndexScan::new(cursor.clone(), key_size, lower, upper);
    Ok((Box::new(scan), cursor, filters))
}

/// Keeps the tightest (largest) lower bound seen so far; a tie prefers the
/// non-inclusive bound since it excludes strictly more rows.
fn tighten_lower(lower: &mut Option<(Value<'static>, bool)>, value: Value<'static>, inclusive: bool) {
    let adopt = match lower {
        None => true,
        Some((current, current_inclusive)) => match compare_values(&value, current) {
            Ordering::Greater => true,
            Ordering::Equal => *current_inclusive && !inclusive,
            Ordering::Less => false,
        },
    };
    if adopt {
        *lower = Some((value, inclusive));
    }
}

/// Keeps the tightest (smallest) upper bound seen so far; a tie prefers the
/// non-inclusive bound.
fn tighten_upper(upper: &mut Option<(Value<'static>, bool)>, value: Value<'static>, inclusive: bool) {
    let adopt = match upper {
        None => true,
        Some((current, current_inclusive)) => match compare_values(&value, current) {
            Ordering::Less => true,
            Ordering::Equal => *current_inclusive && !inclusive,
            Ordering::Greater => false,
        },
    };
    if adopt {
        *upper = Some((value, inclusive));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;
    use crate::disk::DiskManager;
    use crate::row::{Row, Value};
    use crate::schema::ColumnType;
    use crate::sql::validator::CheckedCondition;
    use tempfile::NamedTempFile;

    fn fresh_fm() -> Rc<RefCell<FrameManager>> {
        let tmp = NamedTempFile::new().unwrap();
        let disk = DiskManager::open(tmp.path(), 0, DbOptions::default().page_size).unwrap();
        let cache = crate::cache::PageCache::new(disk, 64);
        let free_list = crate::freelist::FreeList::new(cache.clone(), crate::page::PageId::NONE);
        Rc::new(RefCell::new(FrameManager::from_parts(cache, free_list)))
    }

    fn populated_catalog(fm: Rc<RefCell<FrameManager>>) -> (Rc<RefCell<Catalog>>, Arc<Schema>) {
        let schema = Schema::new(vec!["id".into(), "v".into()], vec![ColumnType::Int, ColumnType::Int], "id").unwrap();
        let mut catalog = Catalog::new();
        catalog.create_table(fm, "t".into(), schema.clone(), "CREATE TABLE t (id INT, v INT, PRIMARY KEY (id));".into()).unwrap();
        {
            let entry = catalog.get("t").unwrap();
            for i in 0..10 {
                let row = Row::new(schema.clone(), vec![Value::Int(i), Value::Int(i * 10)]);
                entry.tree.borrow_mut().insert(&row.primary_key_bytes(), &row.serialize()).unwrap();
            }
        }
        (Rc::new(RefCell::new(catalog)), schema)
    }

    #[test]
    fn range_conditions_lower_into_an_index_scan_with_no_filter() {
        let fm = fresh_fm();
        let (catalog, schema) = populated_catalog(fm.clone());
        let conditions = vec![
            CheckedCondition { column: 0, op: Operator::Ge, value: Value::Int(3) },
            CheckedCondition { column: 0, op: Operator::Lt, value: Value::Int(7) },
        ];
        let (_scan, _cursor, filters) = build_scan("t", &schema, conditions, &catalog).unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn equality_plus_range_spills_the_range_to_a_filter() {
        let fm = fresh_fm();
        let (catalog, schema) = populated_catalog(fm.clone());
        let conditions = vec![
            CheckedCondition { column: 0, op: Operator::Eq, value: Value::Int(5) },
            CheckedCondition { column: 0, op: Operator::Gt, value: Value::Int(1) },
        ];
        let (_scan, _cursor, filters) = build_scan("t", &schema, conditions, &catalog).unwrap();
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn full_scan_drains_all_rows_in_order() {
        let fm = fresh_fm();
        let (catalog, schema) = populated_catalog(fm.clone());
        let query = CheckedQuery::Select {
            table: "t".into(),
            schema: schema.clone(),
            columns: schema.columns.iter().map(|c| c.name.clone()).collect(),
            conditions: Vec::new(),
        };
        let mut plan = build(query, catalog.clone(), fm, None).unwrap();
        let mut seen = Vec::new();
        while plan.next().unwrap() {
            let row = plan.current().unwrap();
            seen.push(match row.values[0] {
                Value::Int(n) => n,
                _ => unreachable!(),
            });
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
