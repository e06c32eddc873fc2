//! Rule-based conversion tests

use nl2sql_engine::patterns::{PatternMatcher, QueryShape, DEFAULT_SQL};
use proptest::prelude::*;

fn convert(question: &str) -> String {
    let matcher = PatternMatcher::new().unwrap();
    matcher.convert(&question.to_lowercase()).map(|m| m.sql).unwrap_or_else(|| DEFAULT_SQL.to_string())
}

#[test]
fn test_total_sales_is_a_plain_sum() {
    let sql = convert("show total sales");
    assert_eq!(sql, "SELECT SUM(amount) AS total_sales FROM sales;");
    assert!(!sql.contains("GROUP BY"));
}

#[test]
fn test_region_filter_has_no_limit() {
    let sql = convert("north sales");
    assert_eq!(sql, "SELECT * FROM sales WHERE LOWER(region) = 'north' ORDER BY date DESC;");
    assert!(!sql.contains("LIMIT"));
}

#[test]
fn test_top_products_limits_exactly() {
    let matcher = PatternMatcher::new().unwrap();
    let m = matcher.convert("top 5 products").unwrap();
    assert_eq!(m.rule, "top_products");
    assert_eq!(
        m.sql,
        "SELECT product, SUM(amount) AS total_sales FROM sales GROUP BY product ORDER BY total_sales DESC LIMIT 5;"
    );
}

#[test]
fn test_compound_filter_beats_single_filters() {
    let matcher = PatternMatcher::new().unwrap();
    let m = matcher.convert("laptops in the south").unwrap();
    assert_eq!(m.rule, "product_region");
    assert!(m.sql.contains("LOWER(product) = 'laptop' AND LOWER(region) = 'south'"));
}

#[test]
fn test_amount_comparison_beats_aggregates() {
    let matcher = PatternMatcher::new().unwrap();
    let m = matcher.convert("total sales over 1000").unwrap();
    assert_eq!(m.rule, "filter_amount_gt");
    assert_eq!(m.sql, "SELECT * FROM sales WHERE amount > 1000 ORDER BY amount DESC;");
}

#[test]
fn test_grouping_beats_total() {
    let matcher = PatternMatcher::new().unwrap();
    assert_eq!(matcher.convert("total sales by region").unwrap().rule, "sales_by_region");
    assert_eq!(matcher.convert("sales per product").unwrap().rule, "sales_by_product");
}

#[test]
fn test_relative_windows() {
    assert_eq!(
        convert("sales last 30 days"),
        "SELECT * FROM sales WHERE date >= date('now', '-30 days') ORDER BY date DESC;"
    );
    assert!(convert("sales in the last 3 months").contains("'-3 months'"));
}

#[test]
fn test_modal_may_is_not_a_month() {
    let matcher = PatternMatcher::new().unwrap();
    let m = matcher.convert("may i see all data").unwrap();
    assert_eq!(m.rule, "all_data");
    assert_eq!(m.sql, "SELECT * FROM sales ORDER BY date DESC;");

    assert_eq!(matcher.convert("sales in may").unwrap().rule, "month_any_year");
    assert!(matcher.convert("may sales").unwrap().sql.contains("strftime('%m', date) = '05'"));
}

#[test]
fn test_all_data_has_no_limit() {
    let sql = convert("show all data");
    assert_eq!(sql, "SELECT * FROM sales ORDER BY date DESC;");
}

#[test]
fn test_unmatched_question_uses_default() {
    let matcher = PatternMatcher::new().unwrap();
    assert!(matcher.convert("what is the weather like").is_none());
    assert_eq!(convert("what is the weather like"), DEFAULT_SQL);
}

#[test]
fn test_count_phrasing() {
    let matcher = PatternMatcher::new().unwrap();
    let m = matcher.convert("count of sales").unwrap();
    assert_eq!(m.shape, QueryShape::Aggregate(nl2sql_engine::patterns::Aggregate::Count));
}

#[test]
fn test_suggestion_questions_all_match_a_rule() {
    let matcher = PatternMatcher::new().unwrap();
    for question in [
        "Show total sales",
        "Sales by product",
        "Sales by region",
        "Top 5 products",
        "Average sales",
        "How many sales",
        "Recent 10 sales",
        "Sales in North",
        "Sales of Laptop",
        "Sales over 1000",
        "Sales last 30 days",
        "Laptop in South",
        "Show all data",
    ] {
        assert!(matcher.convert(&question.to_lowercase()).is_some(), "no rule for {question}");
    }
}

proptest! {
    #[test]
    fn test_conversion_is_deterministic(question in "[a-z0-9 ']{0,60}") {
        let matcher = PatternMatcher::new().unwrap();
        let first = matcher.convert(&question).map(|m| m.sql);
        let second = matcher.convert(&question).map(|m| m.sql);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_rendered_sql_is_single_statement(question in "[a-z0-9 ']{0,60}") {
        let matcher = PatternMatcher::new().unwrap();
        if let Some(m) = matcher.convert(&question) {
            prop_assert!(m.sql.starts_with("SELECT "));
            prop_assert!(m.sql.ends_with(';'));
            prop_assert_eq!(m.sql.matches(';').count(), 1);
        }
    }
}
