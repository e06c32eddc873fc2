//! Input sanitization and result heuristic tests

use nl2sql_engine::models::{Cell, QueryResult};
use nl2sql_engine::validation::{sanitize_question, InputValidator, ResultValidator, MAX_QUESTION_CHARS};

fn rows(values: &[&str]) -> QueryResult {
    QueryResult {
        columns: vec!["region".to_string()],
        rows: values.iter().map(|v| vec![Cell::Text((*v).to_string())]).collect(),
    }
}

#[test]
fn test_validate_question_valid() {
    assert!(InputValidator::validate_question("total sales by region").is_ok());
}

#[test]
fn test_validate_question_empty() {
    assert!(InputValidator::validate_question("").is_err());
    assert!(InputValidator::validate_question("   ").is_err());
}

#[test]
fn test_validate_question_too_long() {
    assert!(InputValidator::validate_question(&"a".repeat(MAX_QUESTION_CHARS + 1)).is_err());
    assert!(InputValidator::validate_question(&"a".repeat(MAX_QUESTION_CHARS)).is_ok());
}

#[test]
fn test_validate_question_null_byte() {
    assert!(InputValidator::validate_question("north\0sales").is_err());
}

#[test]
fn test_sanitize_collapses_whitespace_and_controls() {
    assert_eq!(sanitize_question("  north\tsales\r\n "), "north sales");
    assert_eq!(sanitize_question("ventas en España"), "ventas en España");
}

#[test]
fn test_empty_filter_result_is_discounted() {
    let validator = ResultValidator::new();
    let report = validator.validate(
        "north sales",
        "SELECT * FROM sales WHERE region = 'north';",
        &rows(&[]),
    );
    assert!((report.confidence - 0.7).abs() < 1e-9);
    assert!(report.is_valid);
    assert!(report.warnings.iter().any(|w| w == "Query returned no results"));
    assert!(!report.suggestions.is_empty());
}

#[test]
fn test_missing_limit_for_top_question() {
    let validator = ResultValidator::new();
    let report = validator.validate(
        "top products",
        "SELECT product, SUM(amount) FROM sales GROUP BY product;",
        &rows(&["Laptop"]),
    );
    assert!((report.confidence - 0.9).abs() < 1e-9);
    assert!(report.suggestions.iter().any(|s| s.contains("ORDER BY")));
}

#[test]
fn test_missing_average() {
    let validator = ResultValidator::new();
    let report = validator.validate("average sale", "SELECT SUM(amount) FROM sales;", &rows(&["1"]));
    assert!((report.confidence - 0.8).abs() < 1e-9);
}

#[test]
fn test_duplicate_rows_are_reported() {
    let validator = ResultValidator::new();
    let report = validator.validate("regions", "SELECT region FROM sales;", &rows(&["North", "North", "South"]));
    assert_eq!(report.data_quality.row_count, 3);
    assert_eq!(report.data_quality.duplicate_rows, 1);
}

#[test]
fn test_summary_text() {
    let validator = ResultValidator::new();
    assert_eq!(validator.summary_text(), "No validation history available");
    validator.validate("north sales", "SELECT * FROM sales WHERE LOWER(region) = 'north';", &rows(&["North"]));
    let text = validator.summary_text();
    assert!(text.starts_with("Validation Summary (Last 1 queries):"));
    assert!(text.contains("Valid Queries: 1/1 (100.0%)"));
}
