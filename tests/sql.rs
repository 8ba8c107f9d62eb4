//! End-to-end statement tests over the public API

use vexdb::{Database, Error, Value};

fn ints(result: &vexdb::QueryResult) -> Vec<i32> {
    result
        .rows
        .iter()
        .map(|r| match &r[0] {
            Value::Integer(v) => *v,
            other => panic!("expected INTEGER, got {:?}", other),
        })
        .collect()
}

#[test]
fn insert_and_order_by() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("INSERT INTO t VALUES (11),(13),(12)").unwrap();
    let result = conn.query("SELECT a FROM t ORDER BY a").unwrap();
    assert_eq!(result.columns, vec!["a"]);
    assert_eq!(ints(&result), vec![11, 12, 13]);

    let result = conn.query("SELECT a FROM t ORDER BY a DESC").unwrap();
    assert_eq!(ints(&result), vec![13, 12, 11]);
}

#[test]
fn min_over_timestamps_skips_nulls() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE ts(t TIMESTAMP)").unwrap();
    conn.query(
        "INSERT INTO ts VALUES ('2008-01-01 00:00:01'),(NULL),('2007-01-01 00:00:01')",
    )
    .unwrap();
    let result = conn.query("SELECT MIN(t) FROM ts").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].to_string(), "2007-01-01 00:00:01");

    let result = conn.query("SELECT MAX(t) FROM ts").unwrap();
    assert_eq!(result.rows[0][0].to_string(), "2008-01-01 00:00:01");
}

#[test]
fn sum_on_timestamp_is_rejected() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE ts(t TIMESTAMP)").unwrap();
    assert!(matches!(
        conn.query("SELECT SUM(t) FROM ts"),
        Err(Error::DisallowedAggregate { .. })
    ));
    assert!(matches!(
        conn.query("SELECT t + t FROM ts"),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn prepared_insert_overflows_tinyint() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a TINYINT)").unwrap();
    conn.query("PREPARE p AS INSERT INTO t VALUES ($1)").unwrap();
    assert!(matches!(
        conn.query("EXECUTE p(10000)"),
        Err(Error::OutOfRange { .. })
    ));
    conn.query("EXECUTE p(100)").unwrap();
    let result = conn.query("SELECT a FROM t").unwrap();
    assert_eq!(result.rows, vec![vec![Value::TinyInt(100)]]);
}

#[test]
fn age_decomposes_intervals() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    let result = conn
        .query("SELECT AGE(TIMESTAMP '2001-04-10', TIMESTAMP '1957-06-13')")
        .unwrap();
    assert_eq!(
        result.rows[0][0],
        Value::Varchar("43 years 9 mons 27 days".into())
    );
    let result = conn
        .query("SELECT AGE(TIMESTAMP '2019-06-11 12:00:00', TIMESTAMP '2019-07-11 11:00:00')")
        .unwrap();
    assert_eq!(result.rows[0][0], Value::Varchar("-29 days -23:00:00".into()));
}

#[test]
fn leap_year_boundaries() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE d(x DATE)").unwrap();
    conn.query("INSERT INTO d VALUES ('1992-02-29')").unwrap();
    assert!(matches!(
        conn.query("INSERT INTO d VALUES ('1900-02-29')"),
        Err(Error::InvalidFormat { .. })
    ));
    assert!(matches!(
        conn.query("INSERT INTO d VALUES ('1993-02-29')"),
        Err(Error::InvalidFormat { .. })
    ));
    let result = conn.query("SELECT x FROM d").unwrap();
    assert_eq!(result.rows[0][0].to_string(), "1992-02-29");
}

#[test]
fn unresolved_parameters_fail_binding() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    assert!(matches!(
        conn.query("PREPARE s AS SELECT $1"),
        Err(Error::UnresolvedParameterType(1))
    ));
    assert!(matches!(
        conn.query("PREPARE s AS SELECT $1 = $2"),
        Err(Error::UnresolvedParameterType(_))
    ));
    conn.query("PREPARE s AS SELECT CAST($1 AS INTEGER)").unwrap();
    let result = conn.query("EXECUTE s(41)").unwrap();
    assert_eq!(result.rows[0][0], Value::Integer(41));
}

#[test]
fn prepare_rejects_meta_statements() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    assert!(conn.query("PREPARE p AS CREATE TABLE t(a INTEGER)").is_err());
    assert!(conn.query("PREPARE p AS EXPLAIN SELECT 1").is_err());
}

#[test]
fn deallocate_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("DEALLOCATE nothing_here").unwrap();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("PREPARE p AS SELECT a FROM t").unwrap();
    conn.query("DEALLOCATE p").unwrap();
    conn.query("DEALLOCATE p").unwrap();
    assert!(matches!(
        conn.query("EXECUTE p"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn drop_with_dependent_prepared_statement() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("PREPARE p AS SELECT a FROM t").unwrap();

    assert!(matches!(
        conn.query("DROP TABLE t"),
        Err(Error::DependencyExists { .. })
    ));
    conn.query("DROP TABLE t CASCADE").unwrap();
    // The dependent prepared statement went with the table.
    assert!(matches!(conn.query("EXECUTE p"), Err(Error::NotFound(_))));
    // And the table really is gone.
    assert!(matches!(
        conn.query("SELECT a FROM t"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn rename_rolls_back() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE test(a INTEGER, b INTEGER)").unwrap();
    conn.query("INSERT INTO test VALUES (1, 2)").unwrap();

    conn.query("BEGIN").unwrap();
    conn.query("ALTER TABLE test RENAME COLUMN a TO k").unwrap();
    let result = conn.query("SELECT k FROM test").unwrap();
    assert_eq!(ints(&result), vec![1]);
    assert!(matches!(
        conn.query("SELECT a FROM test"),
        Err(Error::UnknownColumn(_))
    ));
    conn.query("ROLLBACK").unwrap();

    let result = conn.query("SELECT a FROM test").unwrap();
    assert_eq!(ints(&result), vec![1]);
}

#[test]
fn explicit_transaction_aborts_after_execution_error() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER NOT NULL)").unwrap();

    conn.query("BEGIN").unwrap();
    conn.query("INSERT INTO t VALUES (1)").unwrap();
    assert!(matches!(
        conn.query("INSERT INTO t VALUES (NULL)"),
        Err(Error::NotNull(_))
    ));
    // Only ROLLBACK is accepted now.
    assert!(matches!(
        conn.query("SELECT a FROM t"),
        Err(Error::TransactionAborted)
    ));
    assert!(matches!(
        conn.query("COMMIT"),
        Err(Error::TransactionAborted)
    ));
    conn.query("ROLLBACK").unwrap();
    let result = conn.query("SELECT a FROM t").unwrap();
    assert!(result.rows.is_empty());
}

#[test]
fn bind_errors_do_not_abort_transactions() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a TINYINT)").unwrap();

    conn.query("BEGIN").unwrap();
    conn.query("INSERT INTO t VALUES (1)").unwrap();
    // Out-of-range constants are caught while planning; no partial state
    // is committed and the transaction stays usable.
    assert!(matches!(
        conn.query("INSERT INTO t VALUES (10000)"),
        Err(Error::OutOfRange { .. })
    ));
    assert!(matches!(
        conn.query("SELECT nope FROM t"),
        Err(Error::UnknownColumn(_))
    ));
    conn.query("COMMIT").unwrap();
    assert_eq!(conn.query("SELECT a FROM t").unwrap().rows.len(), 1);
}

#[test]
fn group_by_with_null_keys() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE g(k INTEGER, v INTEGER)").unwrap();
    conn.query("INSERT INTO g VALUES (1, 10), (1, 20), (NULL, 5), (NULL, 7), (2, 1)")
        .unwrap();
    let result = conn
        .query("SELECT k, SUM(v), COUNT(*) FROM g GROUP BY k ORDER BY k")
        .unwrap();
    // NULL sorts first ascending and forms its own group.
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.rows[0][0], Value::Null);
    assert_eq!(result.rows[0][1], Value::BigInt(12));
    assert_eq!(result.rows[0][2], Value::BigInt(2));
    assert_eq!(result.rows[1][0], Value::Integer(1));
    assert_eq!(result.rows[1][1], Value::BigInt(30));
    assert_eq!(result.rows[2][0], Value::Integer(2));
}

#[test]
fn aggregate_over_empty_table_yields_one_row() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE e(a INTEGER)").unwrap();
    let result = conn.query("SELECT COUNT(*), SUM(a), MIN(a) FROM e").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0], Value::BigInt(0));
    assert_eq!(result.rows[0][1], Value::Null);
    assert_eq!(result.rows[0][2], Value::Null);
}

#[test]
fn where_update_delete_limit() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER, b VARCHAR)").unwrap();
    for i in 0..10 {
        conn.query(&format!("INSERT INTO t VALUES ({}, 'row')", i))
            .unwrap();
    }

    let result = conn.query("SELECT a FROM t WHERE a >= 5 AND a < 8 ORDER BY a").unwrap();
    assert_eq!(ints(&result), vec![5, 6, 7]);

    let result = conn.query("UPDATE t SET b = 'big' WHERE a >= 8").unwrap();
    assert_eq!(result.rows_changed, 2);
    let result = conn
        .query("SELECT a FROM t WHERE b = 'big' ORDER BY a")
        .unwrap();
    assert_eq!(ints(&result), vec![8, 9]);

    let result = conn.query("DELETE FROM t WHERE a < 5").unwrap();
    assert_eq!(result.rows_changed, 5);
    let result = conn.query("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(result.rows[0][0], Value::BigInt(5));

    let result = conn.query("SELECT a FROM t ORDER BY a LIMIT 2 OFFSET 1").unwrap();
    assert_eq!(ints(&result), vec![6, 7]);
}

#[test]
fn nulls_order_first_asc_last_desc() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("INSERT INTO t VALUES (2),(NULL),(1)").unwrap();
    let asc = conn.query("SELECT a FROM t ORDER BY a").unwrap();
    assert_eq!(asc.rows[0][0], Value::Null);
    assert_eq!(asc.rows[2][0], Value::Integer(2));
    let desc = conn.query("SELECT a FROM t ORDER BY a DESC").unwrap();
    assert_eq!(desc.rows[0][0], Value::Integer(2));
    assert_eq!(desc.rows[2][0], Value::Null);
}

#[test]
fn default_values_and_not_null() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER NOT NULL, b INTEGER DEFAULT 4)")
        .unwrap();
    conn.query("INSERT INTO t(a) VALUES (1)").unwrap();
    let result = conn.query("SELECT b FROM t").unwrap();
    assert_eq!(ints(&result), vec![4]);
    assert!(matches!(
        conn.query("INSERT INTO t(a) VALUES (NULL)"),
        Err(Error::NotNull(_))
    ));
}

#[test]
fn scalar_subquery_unnests() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("INSERT INTO t VALUES (1),(5),(3)").unwrap();
    let result = conn
        .query("SELECT a FROM t WHERE a = (SELECT MAX(a) FROM t)")
        .unwrap();
    assert_eq!(ints(&result), vec![5]);
}

#[test]
fn joins_match_on_keys() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE l(id INTEGER, v VARCHAR)").unwrap();
    conn.query("CREATE TABLE r(id INTEGER, w VARCHAR)").unwrap();
    conn.query("INSERT INTO l VALUES (1, 'a'), (2, 'b'), (3, 'c')")
        .unwrap();
    conn.query("INSERT INTO r VALUES (2, 'x'), (3, 'y'), (4, 'z')")
        .unwrap();
    let result = conn
        .query("SELECT l.v, r.w FROM l JOIN r ON l.id = r.id ORDER BY v")
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0], vec![Value::Varchar("b".into()), Value::Varchar("x".into())]);
    assert_eq!(result.rows[1], vec![Value::Varchar("c".into()), Value::Varchar("y".into())]);

    let result = conn
        .query("SELECT l.v FROM l, r WHERE l.id = r.id AND r.w = 'y'")
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Varchar("c".into())]]);
}

#[test]
fn interrupt_cancels_and_rolls_back() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("INSERT INTO t VALUES (1)").unwrap();

    let token = conn.interrupt_token();
    token.store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(matches!(
        conn.query("SELECT a FROM t"),
        Err(Error::Interrupted)
    ));
    token.store(false, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(ints(&conn.query("SELECT a FROM t").unwrap()), vec![1]);
}

#[test]
fn prepared_statement_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    conn.query("INSERT INTO t VALUES (1),(2),(3)").unwrap();
    let handle = conn.prepare("SELECT a FROM t WHERE a >= $1 ORDER BY a").unwrap();
    let first = conn.execute(&handle, &[Value::Integer(2)]).unwrap();
    let second = conn.execute(&handle, &[Value::Integer(2)]).unwrap();
    assert_eq!(first.rows, second.rows);
    assert_eq!(ints(&first), vec![2, 3]);

    // Wrong arity is a bind-level error.
    assert!(conn.execute(&handle, &[]).is_err());
}

#[test]
fn uncommitted_changes_are_invisible_to_others() {
    let db = Database::in_memory().unwrap();
    let writer = db.connect();
    let reader = db.connect();
    writer.query("CREATE TABLE t(a INTEGER)").unwrap();

    writer.query("BEGIN").unwrap();
    writer.query("INSERT INTO t VALUES (1)").unwrap();
    assert!(reader.query("SELECT a FROM t").unwrap().rows.is_empty());

    writer.query("COMMIT").unwrap();
    assert_eq!(ints(&reader.query("SELECT a FROM t").unwrap()), vec![1]);
}

#[test]
fn snapshot_isolation_for_readers() {
    let db = Database::in_memory().unwrap();
    let writer = db.connect();
    let reader = db.connect();
    writer.query("CREATE TABLE t(a INTEGER)").unwrap();
    writer.query("INSERT INTO t VALUES (1)").unwrap();

    reader.query("BEGIN").unwrap();
    assert_eq!(ints(&reader.query("SELECT a FROM t").unwrap()), vec![1]);
    writer.query("INSERT INTO t VALUES (2)").unwrap();
    // The explicit transaction keeps its snapshot.
    assert_eq!(ints(&reader.query("SELECT a FROM t").unwrap()), vec![1]);
    reader.query("COMMIT").unwrap();
    assert_eq!(
        ints(&reader.query("SELECT a FROM t ORDER BY a").unwrap()),
        vec![1, 2]
    );
}

#[test]
fn explain_renders_a_plan() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(a INTEGER)").unwrap();
    let result = conn.query("EXPLAIN SELECT a FROM t WHERE a > 1").unwrap();
    assert_eq!(result.columns, vec!["explain"]);
    assert!(!result.rows.is_empty());
}

#[test]
fn varchar_width_overflow() {
    let db = Database::in_memory().unwrap();
    let conn = db.connect();
    conn.query("CREATE TABLE t(s VARCHAR(3))").unwrap();
    conn.query("INSERT INTO t VALUES ('abc')").unwrap();
    assert!(matches!(
        conn.query("INSERT INTO t VALUES ('abcd')"),
        Err(Error::TypeOverflow { .. })
    ));
}
