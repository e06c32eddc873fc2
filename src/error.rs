//! Error types for the nl2sql-engine library.
//!
//! The first five variants are the conversion taxonomy: every one of them is
//! recovered inside the orchestrator's retry loop and never reaches a caller
//! of `convert`/`convert_and_execute`. The remaining variants cover the
//! infrastructure the engine talks to.

use thiserror::Error;

/// Errors that can occur while converting and executing a question.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Inference endpoint unreachable or returned nothing usable
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Model response could not be reduced to a plausible query
    #[error("Could not extract a query from the model response: {0}")]
    ExtractionFailure(String),

    /// Dataset executor returned an error text instead of a table
    #[error("Query execution failed: {0}")]
    ExecutionError(String),

    /// Judge endpoint unreachable; treated as an optimistic pass
    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// Retry loop exhausted without a verified-correct result
    #[error("No verified result after {0} attempts")]
    MaxRetriesReached(u32),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV rendering errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl ConversionError {
    /// Short, stable label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GenerationUnavailable(_) => "generation_unavailable",
            Self::ExtractionFailure(_) => "extraction_failure",
            Self::ExecutionError(_) => "execution_error",
            Self::VerificationUnavailable(_) => "verification_unavailable",
            Self::MaxRetriesReached(_) => "max_retries_reached",
            Self::Database(_) => "database",
            Self::Pool(_) => "pool",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Csv(_) => "csv",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for Result with ConversionError
pub type Result<T> = std::result::Result<T, ConversionError>;

impl From<anyhow::Error> for ConversionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(
            ConversionError::ExecutionError("no such column".to_string()).kind(),
            "execution_error"
        );
        assert_eq!(ConversionError::MaxRetriesReached(5).kind(), "max_retries_reached");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ConversionError::ExtractionFailure("no SELECT found".to_string());
        assert!(err.to_string().contains("no SELECT found"));
    }
}
