//! End-to-end scenarios driven only through the public `Engine` API.

use tempfile::tempdir;
use wisp::{Engine, Value};

fn rows_of(engine: &Engine, sql: &str) -> Vec<Vec<Value<'static>>> {
    let mut result = engine.query(sql).unwrap();
    let mut rows = Vec::new();
    while let Some(row) = result.next_row().unwrap() {
        rows.push(row.values);
    }
    rows
}

#[test]
fn s1_create_insert_select() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("s1.db")).unwrap();

    assert_eq!(engine.exec("CREATE TABLE t (n INT, s TEXT(4));").unwrap(), 0);
    assert_eq!(
        engine.exec(r#"INSERT INTO t VALUES (1,"one"),(2,"two"),(3,"thre");"#).unwrap(),
        3
    );

    let mut result = engine.query("SELECT * FROM t;").unwrap();
    let mut lines = Vec::new();
    while let Some(row) = result.next_row().unwrap() {
        let rendered: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        lines.push(rendered.join(" | "));
    }
    assert_eq!(lines, vec!["1 | one", "2 | two", "3 | thre"]);
}

#[test]
fn s2_index_scan_range() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("s2.db")).unwrap();

    engine.exec("CREATE TABLE u (id INT, v REAL, PRIMARY KEY (id));").unwrap();
    engine.exec("INSERT INTO u VALUES (10,1.5),(20,2.5),(30,3.5),(40,4.5);").unwrap();

    let rows = rows_of(&engine, "SELECT v FROM u WHERE id >= 20 AND id < 40;");
    assert_eq!(rows, vec![vec![Value::Real(2.5)], vec![Value::Real(3.5)]]);
}

#[test]
fn s3_update_arithmetic() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("s3.db")).unwrap();

    engine.exec("CREATE TABLE w (k INT, n INT, PRIMARY KEY (k));").unwrap();
    engine.exec("INSERT INTO w VALUES (1,10),(2,20);").unwrap();
    assert_eq!(engine.exec("UPDATE w SET n = n + 5 WHERE k = 2;").unwrap(), 1);

    let rows = rows_of(&engine, "SELECT n FROM w WHERE k = 2;");
    assert_eq!(rows, vec![vec![Value::Int(25)]]);
}

#[test]
fn s4_delete_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s4.db");
    {
        let engine = Engine::open(&path).unwrap();
        engine.exec("CREATE TABLE x (k INT, PRIMARY KEY (k));").unwrap();
        engine.exec("INSERT INTO x VALUES (1),(2),(3);").unwrap();
        assert_eq!(engine.exec("DELETE FROM x WHERE k = 2;").unwrap(), 1);
    }

    let engine = Engine::open(&path).unwrap();
    let rows = rows_of(&engine, "SELECT * FROM x;");
    assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(3)]]);
}

#[test]
fn s5_duplicate_primary_key_rejected() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("s5.db")).unwrap();

    engine.exec("CREATE TABLE y (k INT, PRIMARY KEY (k));").unwrap();
    engine.exec("INSERT INTO y VALUES (1);").unwrap();
    assert!(engine.exec("INSERT INTO y VALUES (1);").is_err());

    let rows = rows_of(&engine, "SELECT * FROM y;");
    assert_eq!(rows, vec![vec![Value::Int(1)]]);
}

/// A scaled-down stand-in for S6: the full scenario drives a tree to depth 4
/// (N≈300000), too slow for a routine test run. This exercises the same
/// shape — ordered insert, full scan, random-access select, ordered
/// delete — over enough keys to force several splits.
#[test]
fn s6_split_and_drain_stress_small() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("s6.db")).unwrap();
    engine.exec("CREATE TABLE z (k INT, PRIMARY KEY (k));").unwrap();

    const N: i32 = 2000;
    for k in 0..N {
        engine.exec(&format!("INSERT INTO z VALUES ({k});")).unwrap();
    }

    let rows = rows_of(&engine, "SELECT * FROM z;");
    let seen: Vec<i32> = rows
        .into_iter()
        .map(|r| match r[0] {
            Value::Int(n) => n,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(seen, (0..N).collect::<Vec<_>>());

    for k in (0..N).step_by(7) {
        let hit = rows_of(&engine, &format!("SELECT * FROM z WHERE k = {k};"));
        assert_eq!(hit, vec![vec![Value::Int(k)]]);
    }

    for k in 0..N {
        assert_eq!(engine.exec(&format!("DELETE FROM z WHERE k = {k};")).unwrap(), 1);
    }
    assert!(rows_of(&engine, "SELECT * FROM z;").is_empty());
}
