use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::debug;

use crate::models::{Cell, QueryResult};

/// Longest question accepted, in characters
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Confidence below which a result is considered invalid
pub const VALIDITY_THRESHOLD: f64 = 0.5;

const EMPTY_RESULT_FACTOR: f64 = 0.7;
const AGGREGATE_FACTOR: f64 = 0.8;
const FILTER_FACTOR: f64 = 0.85;
const LIMIT_FACTOR: f64 = 0.9;
const GROUPING_FACTOR: f64 = 0.85;
const COUNT_FACTOR: f64 = 0.9;

const HISTORY_CAPACITY: usize = 100;
const SUMMARY_WINDOW: usize = 10;

/// Input validation for questions before they reach the engine
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Reject questions that are blank or too long
    pub fn validate_question(question: &str) -> Result<()> {
        if question.trim().is_empty() {
            return Err(anyhow!("Question cannot be empty"));
        }

        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(anyhow!("Question too long (max {MAX_QUESTION_CHARS} characters)"));
        }

        if question.contains('\0') {
            return Err(anyhow!("Question contains invalid characters"));
        }

        Ok(())
    }
}

/// Strip control characters, collapse whitespace and cap the length
#[must_use]
pub fn sanitize_question(question: &str) -> String {
    let cleaned: String = question
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_QUESTION_CHARS)
        .collect()
}

/// Null and duplicate checks over a result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataQuality {
    /// Rows returned
    pub row_count: usize,
    /// Columns returned
    pub column_count: usize,
    /// Columns holding at least one NULL
    pub null_columns: Vec<String>,
    /// Rows identical to an earlier row
    pub duplicate_rows: usize,
    /// Human-readable findings
    pub issues: Vec<String>,
}

/// Rule-based opinion on an executed candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Whether confidence stayed at or above the threshold
    pub is_valid: bool,
    /// Product of all discount factors, in `[0, 1]`
    pub confidence: f64,
    /// Problems that lowered confidence or look dangerous
    pub warnings: Vec<String>,
    /// Style hints that do not affect confidence
    pub suggestions: Vec<String>,
    /// Data quality findings
    pub data_quality: DataQuality,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    is_valid: bool,
    confidence: f64,
    has_warnings: bool,
}

/// Aggregate view over recent validations
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationSummary {
    /// Validations considered
    pub total: usize,
    /// How many were valid
    pub valid: usize,
    /// Mean confidence
    pub average_confidence: f64,
    /// How many carried warnings
    pub with_warnings: usize,
}

/// Heuristic result checks layered on top of the model's verdict
#[derive(Debug, Default)]
pub struct ResultValidator {
    history: Mutex<VecDeque<HistoryEntry>>,
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn normalize_spaces(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

impl ResultValidator {
    /// Create a validator with empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a result against the question's apparent intent
    pub fn validate(&self, question: &str, sql: &str, result: &QueryResult) -> ValidationReport {
        let mut confidence = 1.0;
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        let question_lower = normalize_spaces(question);
        let question_words = words(question);
        let sql_lower = normalize_spaces(sql);
        let sql_words = words(sql);
        let asks = |terms: &[&str]| terms.iter().any(|t| question_words.contains(*t));

        if result.is_empty() {
            confidence *= EMPTY_RESULT_FACTOR;
            warnings.push("Query returned no results".to_string());
            suggestions.push("Try broadening your search criteria or check if data exists".to_string());
        }

        if asks(&["total", "sum"]) && !sql_lower.contains("sum(") {
            confidence *= AGGREGATE_FACTOR;
            warnings.push("Question asked for a total but the query doesn't use SUM()".to_string());
        }

        if asks(&["average", "avg", "mean"]) && !sql_lower.contains("avg(") {
            confidence *= AGGREGATE_FACTOR;
            warnings.push("Question asked for an average but the query doesn't use AVG()".to_string());
        }

        let asks_count = question_words.contains("count")
            || question_lower.contains("how many")
            || question_lower.contains("number of");
        if asks_count && !sql_lower.contains("count(") && result.row_count() > 10 {
            confidence *= COUNT_FACTOR;
            warnings.push("Question asked for a count but many rows came back".to_string());
        }

        if asks(&["where", "in", "from", "only"]) && !sql_words.contains("where") {
            confidence *= FILTER_FACTOR;
            warnings.push("Question implied filtering but the query has no WHERE clause".to_string());
        }

        if asks(&["top", "best", "highest", "lowest"]) && !sql_words.contains("limit") {
            confidence *= LIMIT_FACTOR;
            warnings.push("Question asked for top results but the query has no LIMIT".to_string());
        }

        let asks_grouping = ["by product", "by region", "by month", "per product", "per region", "per month", "breakdown"]
            .iter()
            .any(|p| question_lower.contains(p))
            || asks(&["each", "monthly"]);
        if asks_grouping && !sql_lower.contains("group by") {
            confidence *= GROUPING_FACTOR;
            warnings.push("Question implied grouping but the query has no GROUP BY".to_string());
        }

        if sql_lower.contains("select *") {
            suggestions.push("Consider selecting specific columns instead of SELECT *".to_string());
        }
        if sql_lower.contains("group by") && !sql_lower.contains("order by") {
            suggestions.push("Consider adding ORDER BY to sort grouped results".to_string());
        }
        if ["delete", "drop", "truncate", "update"].iter().any(|op| sql_words.contains(*op)) {
            warnings.push("Query contains potentially destructive operations".to_string());
        }

        let data_quality = check_data_quality(result);

        let is_valid = confidence >= VALIDITY_THRESHOLD;
        if !is_valid {
            warnings.push("Low confidence in query results".to_string());
        }

        debug!(confidence, is_valid, warnings = warnings.len(), "Result validated");

        let report = ValidationReport {
            is_valid,
            confidence,
            warnings,
            suggestions,
            data_quality,
        };
        self.remember(&report);
        report
    }

    fn remember(&self, report: &ValidationReport) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(HistoryEntry {
            is_valid: report.is_valid,
            confidence: report.confidence,
            has_warnings: !report.warnings.is_empty(),
        });
    }

    /// Statistics over the most recent validations
    #[must_use]
    pub fn summary(&self) -> Option<ValidationSummary> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.is_empty() {
            return None;
        }
        let recent: Vec<&HistoryEntry> = history.iter().rev().take(SUMMARY_WINDOW).collect();
        let total = recent.len();
        #[allow(clippy::cast_precision_loss)]
        let average_confidence = recent.iter().map(|e| e.confidence).sum::<f64>() / total as f64;
        Some(ValidationSummary {
            total,
            valid: recent.iter().filter(|e| e.is_valid).count(),
            average_confidence,
            with_warnings: recent.iter().filter(|e| e.has_warnings).count(),
        })
    }

    /// Printable form of [`summary`](Self::summary)
    #[must_use]
    pub fn summary_text(&self) -> String {
        let Some(summary) = self.summary() else {
            return "No validation history available".to_string();
        };
        #[allow(clippy::cast_precision_loss)]
        let valid_pct = summary.valid as f64 / summary.total as f64 * 100.0;
        let mut out = String::new();
        let _ = writeln!(out, "Validation Summary (Last {} queries):", summary.total);
        let _ = writeln!(out, "  Valid Queries: {}/{} ({valid_pct:.1}%)", summary.valid, summary.total);
        let _ = writeln!(out, "  Average Confidence: {:.1}%", summary.average_confidence * 100.0);
        let _ = write!(out, "  Queries with Warnings: {}", summary.with_warnings);
        out
    }
}

fn check_data_quality(result: &QueryResult) -> DataQuality {
    let mut quality = DataQuality {
        row_count: result.row_count(),
        column_count: result.columns.len(),
        ..DataQuality::default()
    };

    for (index, column) in result.columns.iter().enumerate() {
        if result.rows.iter().any(|row| row.get(index).is_some_and(Cell::is_null)) {
            quality.null_columns.push(column.clone());
        }
    }
    if !quality.null_columns.is_empty() {
        quality.issues.push(format!("NULL values found in: {}", quality.null_columns.join(", ")));
    }

    let mut seen = HashSet::new();
    for row in &result.rows {
        let key: Vec<String> = row.iter().map(ToString::to_string).collect();
        if !seen.insert(key) {
            quality.duplicate_rows += 1;
        }
    }
    if quality.duplicate_rows > 0 {
        quality.issues.push(format!("Found {} duplicate rows", quality.duplicate_rows));
    }

    quality
}
