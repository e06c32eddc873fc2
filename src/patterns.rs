//! Deterministic question-to-query rules.
//!
//! Rules are tried strictly in declaration order and the first one whose
//! regex matches (and whose captures build a valid shape) wins. Compound
//! intents are declared before their single-dimension counterparts, amount
//! comparisons before aggregates, and the catch-all `all_data` rule last.
//!
//! Rules never format captured text straight into SQL: each one builds a
//! [`QueryShape`] with typed parameters, and only the shape renders SQL.

use std::fmt;

use anyhow::{Context, Result};
use chrono::Month;
use regex::{Captures, Regex};
use tracing::debug;

use crate::schema::sales;

/// Query used when nothing else produced a candidate
pub const DEFAULT_SQL: &str = "SELECT * FROM sales ORDER BY date DESC LIMIT 10;";

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december";

/// Categorical column a rule can filter or group on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// `sales.product`
    Product,
    /// `sales.region`
    Region,
}

impl Dimension {
    /// Column name
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Product => sales::PRODUCT,
            Self::Region => sales::REGION,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Amount comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `amount < threshold`
    LessThan,
    /// `amount > threshold`
    GreaterThan,
}

/// Whole-table aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `SUM(amount)`
    Sum,
    /// `AVG(amount)`
    Average,
    /// `COUNT(*)`
    Count,
}

/// Unit of a relative date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    /// Days
    Days,
    /// Months
    Months,
}

/// The closed set of queries the rules can produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    /// Every row, sorted, optionally limited
    OrderLimit {
        /// Sort column
        column: &'static str,
        /// Direction
        order: SortOrder,
        /// Row limit
        limit: Option<u32>,
    },
    /// Rows whose categorical columns equal the given values, case-insensitively
    FilterEquals {
        /// (column, lowercased value) pairs, all of which must hold
        filters: Vec<(Dimension, String)>,
    },
    /// Rows whose categorical column takes any of several values
    FilterIn {
        /// Filtered column
        dimension: Dimension,
        /// Lowercased accepted values
        values: Vec<String>,
    },
    /// Rows dated within the last `amount` units
    RecentWindow {
        /// Window length
        amount: u32,
        /// Window unit
        unit: WindowUnit,
    },
    /// Rows whose amount compares against a threshold
    AmountCompare {
        /// Operator
        comparison: Comparison,
        /// Threshold
        threshold: u64,
    },
    /// A single aggregate over all rows
    Aggregate(Aggregate),
    /// Summed amount per dimension value, highest first
    AggregateGroup {
        /// Grouping column
        dimension: Dimension,
        /// Row limit
        limit: Option<u32>,
    },
    /// Summed amount per calendar month
    MonthlyTotals,
    /// Rows from one month of one year
    MonthOfYear {
        /// Year
        year: i32,
        /// Month
        month: Month,
    },
    /// Rows from one month of any year
    MonthAnyYear {
        /// Month
        month: Month,
    },
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = sales::TABLE;
        let date = sales::DATE;
        let amount = sales::AMOUNT;
        match self {
            Self::OrderLimit { column, order, limit } => {
                write!(f, "SELECT * FROM {table} ORDER BY {column} {}", order.keyword())?;
                if let Some(limit) = limit {
                    write!(f, " LIMIT {limit}")?;
                }
                write!(f, ";")
            }
            Self::FilterEquals { filters } => {
                let predicates: Vec<String> = filters
                    .iter()
                    .map(|(dimension, value)| format!("LOWER({}) = {}", dimension.column(), quote_literal(value)))
                    .collect();
                write!(
                    f,
                    "SELECT * FROM {table} WHERE {} ORDER BY {date} DESC;",
                    predicates.join(" AND ")
                )
            }
            Self::FilterIn { dimension, values } => {
                let literals: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                write!(
                    f,
                    "SELECT * FROM {table} WHERE LOWER({}) IN ({}) ORDER BY {date} DESC;",
                    dimension.column(),
                    literals.join(", ")
                )
            }
            Self::RecentWindow { amount: n, unit } => {
                let unit = match unit {
                    WindowUnit::Days => "days",
                    WindowUnit::Months => "months",
                };
                write!(
                    f,
                    "SELECT * FROM {table} WHERE {date} >= date('now', '-{n} {unit}') ORDER BY {date} DESC;"
                )
            }
            Self::AmountCompare { comparison, threshold } => {
                let (operator, order) = match comparison {
                    Comparison::LessThan => ("<", SortOrder::Asc),
                    Comparison::GreaterThan => (">", SortOrder::Desc),
                };
                write!(
                    f,
                    "SELECT * FROM {table} WHERE {amount} {operator} {threshold} ORDER BY {amount} {};",
                    order.keyword()
                )
            }
            Self::Aggregate(aggregate) => {
                let projection = match aggregate {
                    Aggregate::Sum => format!("SUM({amount}) AS total_sales"),
                    Aggregate::Average => format!("AVG({amount}) AS average_sale"),
                    Aggregate::Count => "COUNT(*) AS total_count".to_string(),
                };
                write!(f, "SELECT {projection} FROM {table};")
            }
            Self::AggregateGroup { dimension, limit } => {
                let column = dimension.column();
                write!(
                    f,
                    "SELECT {column}, SUM({amount}) AS total_sales FROM {table} GROUP BY {column} ORDER BY total_sales DESC"
                )?;
                if let Some(limit) = limit {
                    write!(f, " LIMIT {limit}")?;
                }
                write!(f, ";")
            }
            Self::MonthlyTotals => write!(
                f,
                "SELECT strftime('%Y-%m', {date}) AS month, SUM({amount}) AS total_sales FROM {table} GROUP BY month ORDER BY month;"
            ),
            Self::MonthOfYear { year, month } => write!(
                f,
                "SELECT * FROM {table} WHERE strftime('%Y-%m', {date}) = '{year:04}-{:02}' ORDER BY {date} DESC;",
                month.number_from_month()
            ),
            Self::MonthAnyYear { month } => write!(
                f,
                "SELECT * FROM {table} WHERE strftime('%m', {date}) = '{:02}' ORDER BY {date} DESC;",
                month.number_from_month()
            ),
        }
    }
}

impl QueryShape {
    /// Render the shape as a SQLite statement
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// A named rule: regex trigger plus shape builder
pub struct PatternRule {
    /// Stable rule name
    pub name: &'static str,
    regex: Regex,
    build: Builder,
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// The winning rule for a question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Name of the rule that fired
    pub rule: &'static str,
    /// Typed query
    pub shape: QueryShape,
    /// Rendered SQL
    pub sql: String,
}

/// Ordered rule list
#[derive(Debug)]
pub struct PatternMatcher {
    rules: Vec<PatternRule>,
}

type Builder = fn(&Captures<'_>) -> Option<QueryShape>;

fn define(name: &'static str, pattern: impl Into<String>, build: Builder) -> (&'static str, String, Builder) {
    (name, pattern.into(), build)
}

fn number(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

fn text(caps: &Captures<'_>, group: usize) -> Option<String> {
    caps.get(group).map(|m| m.as_str().to_lowercase())
}

fn month(caps: &Captures<'_>, group: usize) -> Option<Month> {
    caps.get(group)?.as_str().parse().ok()
}

fn build_product_region(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::FilterEquals {
        filters: vec![(Dimension::Product, text(caps, 1)?), (Dimension::Region, text(caps, 2)?)],
    })
}

fn build_either(dimension: Dimension, caps: &Captures<'_>) -> Option<QueryShape> {
    let first = text(caps, 1)?;
    let second = text(caps, 2)?;
    if first == second {
        return Some(QueryShape::FilterEquals { filters: vec![(dimension, first)] });
    }
    Some(QueryShape::FilterIn { dimension, values: vec![first, second] })
}

fn build_products_in(caps: &Captures<'_>) -> Option<QueryShape> {
    build_either(Dimension::Product, caps)
}

fn build_regions_in(caps: &Captures<'_>) -> Option<QueryShape> {
    build_either(Dimension::Region, caps)
}

fn build_last_days(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::RecentWindow { amount: number(caps, 1)?, unit: WindowUnit::Days })
}

fn build_last_months(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::RecentWindow { amount: number(caps, 1)?, unit: WindowUnit::Months })
}

fn build_lowest(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::OrderLimit {
        column: sales::AMOUNT,
        order: SortOrder::Asc,
        limit: Some(number(caps, 1).unwrap_or(10)),
    })
}

fn build_highest(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::OrderLimit {
        column: sales::AMOUNT,
        order: SortOrder::Desc,
        limit: Some(number(caps, 1).unwrap_or(10)),
    })
}

fn build_product(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::FilterEquals { filters: vec![(Dimension::Product, text(caps, 1)?)] })
}

fn build_region(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::FilterEquals { filters: vec![(Dimension::Region, text(caps, 1)?)] })
}

fn build_amount_lt(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::AmountCompare {
        comparison: Comparison::LessThan,
        threshold: caps.get(1)?.as_str().parse().ok()?,
    })
}

fn build_amount_gt(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::AmountCompare {
        comparison: Comparison::GreaterThan,
        threshold: caps.get(1)?.as_str().parse().ok()?,
    })
}

fn build_top_products(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::AggregateGroup {
        dimension: Dimension::Product,
        limit: Some(number(caps, 1).unwrap_or(5)),
    })
}

fn build_by_product(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::AggregateGroup { dimension: Dimension::Product, limit: None })
}

fn build_by_region(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::AggregateGroup { dimension: Dimension::Region, limit: None })
}

fn build_monthly(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::MonthlyTotals)
}

fn build_total(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::Aggregate(Aggregate::Sum))
}

fn build_average(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::Aggregate(Aggregate::Average))
}

fn build_count(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::Aggregate(Aggregate::Count))
}

fn build_month_year(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::MonthOfYear {
        month: month(caps, 1)?,
        year: caps.get(2)?.as_str().parse().ok()?,
    })
}

fn build_month_any_year(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::MonthAnyYear {
        month: month(caps, 1).or_else(|| month(caps, 2))?,
    })
}

fn build_recent(caps: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::OrderLimit {
        column: sales::DATE,
        order: SortOrder::Desc,
        limit: Some(number(caps, 1).unwrap_or(10)),
    })
}

fn build_all_data(_: &Captures<'_>) -> Option<QueryShape> {
    Some(QueryShape::OrderLimit { column: sales::DATE, order: SortOrder::Desc, limit: None })
}

impl PatternMatcher {
    /// Compile the rule list
    pub fn new() -> Result<Self> {
        let products = sales::PRODUCTS
            .iter()
            .map(|(name, _, _)| name.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");
        let months = MONTHS;
        let regions = sales::REGIONS
            .iter()
            .map(|r| r.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");

        let definitions = vec![
            // Compound intents first
            define(
                "products_in",
                format!(r"\b({products})s?\s+(?:or|and)\s+({products})s?\b"),
                build_products_in,
            ),
            define(
                "regions_in",
                format!(r"\b({regions})\s+(?:or|and)\s+(?:the\s+)?({regions})\b"),
                build_regions_in,
            ),
            define(
                "product_region",
                format!(r"\b({products})s?\s+(?:in|from)\s+(?:the\s+)?({regions})\b"),
                build_product_region,
            ),
            define("last_n_days", r"\blast\s+(\d+)\s+days?\b", build_last_days),
            define("last_n_months", r"\blast\s+(\d+)\s+months?\b", build_last_months),
            define(
                "lowest_sales",
                r"\b(?:lowest|minimum|smallest|cheapest|bottom)\s+(?:(\d+)\s+)?sales?\b",
                build_lowest,
            ),
            define(
                "highest_sales",
                r"\b(?:highest|maximum|largest|biggest|most\s+expensive|top)\s+(?:(\d+)\s+)?sales?\b",
                build_highest,
            ),
            define("filter_product_sales", format!(r"\b({products})s?\s+sales?\b"), build_product),
            define("filter_product", format!(r"\b(?:of|for)\s+({products})s?\b"), build_product),
            define(
                "filter_region_sales",
                format!(r"\b({regions})(?:\s+region)?\s+sales?\b"),
                build_region,
            ),
            define(
                "filter_region",
                format!(r"\b(?:in|from)\s+(?:the\s+)?({regions})\b"),
                build_region,
            ),
            // Amount comparisons before aggregates
            define(
                "filter_amount_lt",
                r"(?:\bbelow|\bunder|\bless\s+than|<)\s*\$?(\d+)",
                build_amount_lt,
            ),
            define(
                "filter_amount_gt",
                r"(?:\bover|\babove|\bgreater\s+than|\bmore\s+than|>)\s*\$?(\d+)",
                build_amount_gt,
            ),
            define(
                "top_products",
                r"\b(?:top|best)\s+(?:(\d+)\s+)?products?\b",
                build_top_products,
            ),
            define(
                "sales_by_product",
                r"\bsales?\s+(?:by|per|for\s+each)\s+product\b|\bproducts?\s+sales?\b|\bbreakdown\s+by\s+product\b",
                build_by_product,
            ),
            define(
                "sales_by_region",
                r"\bsales?\s+(?:by|per|for\s+each)\s+region\b|\bregions?\s+sales?\b|\bbreakdown\s+by\s+region\b",
                build_by_region,
            ),
            define(
                "monthly",
                r"\b(?:by|per|for\s+each)\s+month\b|\bmonthly\b",
                build_monthly,
            ),
            define(
                "total_sales",
                r"\b(?:total|sum)\s+(?:of\s+)?(?:sales?|revenue|amount)\b",
                build_total,
            ),
            define(
                "average",
                r"\b(?:average|avg|mean)\s+(?:of\s+)?(?:sales?|amount|revenue)\b",
                build_average,
            ),
            define(
                "count",
                r"\bhow\s+many\s+(?:sales?|records|rows)\b|\b(?:count|number)\s+of\s+(?:sales?|records|rows)\b",
                build_count,
            ),
            define("month_year", format!(r"\b({months})\s+(\d{{4}})\b"), build_month_year),
            // A bare month name needs a preposition before it or a sales noun after it ("may" is also a verb)
            define(
                "month_any_year",
                format!(
                    r"\b(?:in|during|for|from|of)\s+({months})\b|\b({months})\s+(?:sales?|data|orders|records|revenue)\b"
                ),
                build_month_any_year,
            ),
            define(
                "recent",
                r"\b(?:recent|latest|newest)\b(?:\s+(\d+))?",
                build_recent,
            ),
            // Catch-all
            define(
                "all_data",
                r"\b(?:all|everything|data|records)\b",
                build_all_data,
            ),
        ];

        let mut rules = Vec::with_capacity(definitions.len());
        for (name, pattern, build) in definitions {
            let regex = Regex::new(&pattern).with_context(|| format!("Failed to compile pattern rule {name}"))?;
            rules.push(PatternRule { name, regex, build });
        }

        debug!(rules = rules.len(), "Pattern rules loaded");
        Ok(Self { rules })
    }

    /// Names of the rules in evaluation order
    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.name)
    }

    /// First matching rule for a lowercased question
    #[must_use]
    pub fn convert(&self, question_lower: &str) -> Option<PatternMatch> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(question_lower)?;
            let shape = (rule.build)(&caps)?;
            let sql = shape.render();
            debug!(rule = rule.name, sql = %sql, "Pattern matched");
            Some(PatternMatch { rule: rule.name, shape, sql })
        })
    }
}
