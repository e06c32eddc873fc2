//! Data models for conversion requests, query results and verification
//!
//! This module contains the values that flow between the components of the
//! engine: what the caller asks for, what the dataset returns, and the
//! per-attempt records the orchestrator hands back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A question to convert, plus whether the resulting query should be run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    question: String,
    /// Run the candidate against the dataset (`false` means generate only)
    pub execute: bool,
}

impl ConversionRequest {
    /// Create a request; the question is fixed for the lifetime of the request
    pub fn new(question: impl Into<String>, execute: bool) -> Self {
        Self {
            question: question.into(),
            execute,
        }
    }

    /// The original question text
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }
}

/// A single value in a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// SQL NULL
    Null,
    /// Integer value
    Integer(i64),
    /// Floating point value
    Real(f64),
    /// Text value
    Text(String),
    /// Binary value (rendered as its length)
    Blob(Vec<u8>),
}

impl Cell {
    /// True for SQL NULL
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Cell {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(v) => Self::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Self::Blob(v.to_vec()),
        }
    }
}

/// Tabular result of a successfully executed query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in select order
    pub columns: Vec<String>,
    /// Row values, one `Vec` per row, aligned with `columns`
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    /// Number of rows returned
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were returned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first row, if any
    #[must_use]
    pub fn scalar(&self) -> Option<&Cell> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// What the dataset executor hands back: a table, or the error text
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The query ran and produced a table (possibly empty)
    Table(QueryResult),
    /// The query failed; the text is the executor's error message
    Error(String),
}

/// Column metadata as reported by the dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Declared type, as written in the table definition
    pub declared_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

/// A generated or templated query for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    /// The query text
    pub sql: String,
    /// 1-based generation attempt that produced it; 0 for pattern and default candidates
    pub attempt: u32,
    /// Where the candidate came from
    pub source: CandidateSource,
}

/// Producer of a candidate query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// The language model
    Generator,
    /// A deterministic pattern rule
    Pattern,
    /// The safe default query
    Default,
}

/// The judge's correctness decision for one executed candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the result answers the question
    pub is_correct: bool,
    /// One-sentence explanation
    pub reason: String,
    /// What to change, when incorrect
    pub suggested_fix: Option<String>,
}

impl Verdict {
    /// Optimistic pass used when the judge cannot be reached
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            is_correct: true,
            reason: reason.into(),
            suggested_fix: None,
        }
    }
}

/// One entry per attempt, appended in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// 1-based attempt number, 0 for the pattern fallback
    pub attempt: u32,
    /// Candidate query, if one was produced
    pub sql: Option<String>,
    /// Rows returned when execution succeeded
    pub row_count: Option<usize>,
    /// Generation or execution error text
    pub error: Option<String>,
    /// Final correctness decision for this attempt
    pub is_correct: bool,
    /// Explanation for the decision
    pub reason: String,
    /// Suggested change, if any
    pub suggested_fix: Option<String>,
    /// Heuristic confidence from the result validator
    pub confidence: Option<f64>,
    /// Heuristic warnings from the result validator
    pub warnings: Vec<String>,
}

impl VerificationRecord {
    /// Record for an attempt that failed before producing a table
    pub fn failed(attempt: u32, sql: Option<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            attempt,
            sql,
            row_count: None,
            reason: error.clone(),
            error: Some(error),
            is_correct: false,
            suggested_fix: None,
            confidence: None,
            warnings: Vec::new(),
        }
    }
}

/// Terminal status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// Generate-only request produced a candidate
    SqlGenerated,
    /// The executed result was judged correct
    VerifiedCorrect,
    /// Every attempt was used without a verified result
    MaxRetriesReached,
    /// The dataset could not be reached at the start of the request
    DbConnectionFailed,
}

impl FinalStatus {
    /// The status tag as exposed to callers
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SqlGenerated => "sql_generated",
            Self::VerifiedCorrect => "verified_correct",
            Self::MaxRetriesReached => "max_retries_reached",
            Self::DbConnectionFailed => "db_connection_failed",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request bookkeeping returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    /// Number of generation attempts made
    pub attempts: u32,
    /// One record per attempt, in order
    pub verification_history: Vec<VerificationRecord>,
    /// Terminal status; set exactly once by the orchestrator
    pub final_status: FinalStatus,
    /// The question as asked
    pub original_question: String,
}

impl ConversionMetadata {
    /// Fresh metadata for a request; status starts as `max_retries_reached`
    /// until the orchestrator decides otherwise
    pub fn new(original_question: impl Into<String>) -> Self {
        Self {
            attempts: 0,
            verification_history: Vec::new(),
            final_status: FinalStatus::MaxRetriesReached,
            original_question: original_question.into(),
        }
    }

    /// Append an attempt record
    pub fn record(&mut self, record: VerificationRecord) {
        self.verification_history.push(record);
    }
}

/// Everything `convert_and_execute` returns
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    /// The final query text (never empty)
    pub sql: String,
    /// Last successful result, if any
    pub result: Option<QueryResult>,
    /// Attempt history and status
    pub metadata: ConversionMetadata,
}

/// Output format for rendered query results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Comma-separated values format
    Csv,
    /// Plain text table
    Txt,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Get the file extension for this format
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Txt => "txt",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "txt" | "text" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown output format: {other}")),
        }
    }
}
