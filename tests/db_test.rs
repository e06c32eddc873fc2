//! SQLite executor tests

use std::time::Duration;

use nl2sql_engine::db::{DatasetExecutor, SqliteExecutor};
use nl2sql_engine::models::{Cell, ExecutionOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn open(dir: &tempfile::TempDir) -> SqliteExecutor {
    let path = dir.path().join("nested").join("sales.db");
    SqliteExecutor::open(path.to_str().unwrap(), 2, Duration::from_secs(5)).unwrap()
}

#[test]
fn test_open_creates_parent_directory_and_pings() {
    let dir = tempfile::tempdir().unwrap();
    let executor = open(&dir);
    assert!(executor.ping().is_ok());
    assert!(dir.path().join("nested").exists());
}

#[test]
fn test_seed_and_introspect() {
    let dir = tempfile::tempdir().unwrap();
    let executor = open(&dir);
    assert_eq!(executor.seed_sales(25, &mut StdRng::seed_from_u64(1)).unwrap(), 25);

    assert_eq!(executor.list_tables().unwrap(), vec!["sales".to_string()]);

    let columns = executor.table_schema("sales").unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "date", "amount", "product", "region", "quantity", "customer_type"]);
    assert!(columns[0].primary_key);
    assert!(!columns[2].nullable);
}

#[test]
fn test_execute_returns_typed_cells() {
    let dir = tempfile::tempdir().unwrap();
    let executor = open(&dir);
    executor.seed_sales(5, &mut StdRng::seed_from_u64(2)).unwrap();

    match executor.execute("SELECT COUNT(*) AS n, NULL AS nothing, 'x' AS t, 1.5 AS r FROM sales") {
        ExecutionOutcome::Table(result) => {
            assert_eq!(result.columns, ["n", "nothing", "t", "r"]);
            assert_eq!(
                result.rows[0],
                vec![Cell::Integer(5), Cell::Null, Cell::Text("x".to_string()), Cell::Real(1.5)]
            );
        }
        ExecutionOutcome::Error(e) => panic!("query failed: {e}"),
    }
}

#[test]
fn test_execute_reports_errors_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let executor = open(&dir);
    executor.initialize().unwrap();

    match executor.execute("SELECT nope FROM sales") {
        ExecutionOutcome::Error(e) => assert!(e.contains("no such column")),
        ExecutionOutcome::Table(_) => panic!("expected an error"),
    }
}

#[test]
fn test_reseeding_replaces_rows() {
    let dir = tempfile::tempdir().unwrap();
    let executor = open(&dir);
    executor.seed_sales(10, &mut StdRng::seed_from_u64(3)).unwrap();
    executor.seed_sales(4, &mut StdRng::seed_from_u64(4)).unwrap();

    match executor.execute("SELECT COUNT(*) FROM sales") {
        ExecutionOutcome::Table(result) => assert_eq!(result.scalar(), Some(&Cell::Integer(4))),
        ExecutionOutcome::Error(e) => panic!("query failed: {e}"),
    }
}
