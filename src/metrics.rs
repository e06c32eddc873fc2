use anyhow::Result;
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::FinalStatus;

/// Metric names exported through the `metrics` facade
pub mod names {
    /// Finished conversions, labelled by `status`
    pub const CONVERSIONS_TOTAL: &str = "nl2sql_conversions_total";
    /// Generation attempts
    pub const ATTEMPTS_TOTAL: &str = "nl2sql_attempts_total";
    /// Attempts per finished conversion
    pub const ATTEMPTS_PER_CONVERSION: &str = "nl2sql_attempts_per_conversion";
    /// Generation calls that produced no candidate
    pub const GENERATION_FAILURES_TOTAL: &str = "nl2sql_generation_failures_total";
    /// Candidates rejected by the dataset executor
    pub const EXECUTION_ERRORS_TOTAL: &str = "nl2sql_execution_errors_total";
    /// Executed candidates judged incorrect
    pub const VERIFICATION_REJECTIONS_TOTAL: &str = "nl2sql_verification_rejections_total";
    /// Requests answered by a pattern rule or the safe default
    pub const PATTERN_FALLBACKS_TOTAL: &str = "nl2sql_pattern_fallbacks_total";
    /// Wall time of a conversion
    pub const CONVERSION_DURATION: &str = "nl2sql_conversion_duration_seconds";
    /// Result validator confidence
    pub const VALIDATION_CONFIDENCE: &str = "nl2sql_validation_confidence";
    /// Characters in the last schema context
    pub const CONTEXT_SIZE: &str = "nl2sql_context_size_chars";
}

/// Conversion metrics.
///
/// Every event bumps a local tally and is mirrored into the global `metrics`
/// recorder, so counts can be read back without an exporter installed.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    conversions: [AtomicU64; 4],
    attempts: AtomicU64,
    generation_failures: AtomicU64,
    execution_errors: AtomicU64,
    verification_rejections: AtomicU64,
    pattern_fallbacks: AtomicU64,
}

/// Point-in-time copy of the local tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Conversions ending in `sql_generated`
    pub sql_generated: u64,
    /// Conversions ending in `verified_correct`
    pub verified_correct: u64,
    /// Conversions ending in `max_retries_reached`
    pub max_retries_reached: u64,
    /// Conversions ending in `db_connection_failed`
    pub db_connection_failed: u64,
    /// Generation attempts
    pub attempts: u64,
    /// Generation calls without a candidate
    pub generation_failures: u64,
    /// Execution errors
    pub execution_errors: u64,
    /// Incorrect verdicts
    pub verification_rejections: u64,
    /// Pattern or default answers
    pub pattern_fallbacks: u64,
}

impl MetricsSnapshot {
    /// Total finished conversions
    #[must_use]
    pub const fn conversions(&self) -> u64 {
        self.sql_generated + self.verified_correct + self.max_retries_reached + self.db_connection_failed
    }
}

const fn status_index(status: FinalStatus) -> usize {
    match status {
        FinalStatus::SqlGenerated => 0,
        FinalStatus::VerifiedCorrect => 1,
        FinalStatus::MaxRetriesReached => 2,
        FinalStatus::DbConnectionFailed => 3,
    }
}

impl MetricsCollector {
    /// Install a no-op global recorder
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;
        Ok(())
    }

    /// Record one generation attempt
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        counter!(names::ATTEMPTS_TOTAL).increment(1);
    }

    /// Record a generation call that yielded no usable candidate
    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::GENERATION_FAILURES_TOTAL).increment(1);
    }

    /// Record a candidate the executor rejected
    pub fn record_execution_error(&self) {
        self.execution_errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::EXECUTION_ERRORS_TOTAL).increment(1);
    }

    /// Record an executed candidate that was judged incorrect
    pub fn record_verification_rejection(&self) {
        self.verification_rejections.fetch_add(1, Ordering::Relaxed);
        counter!(names::VERIFICATION_REJECTIONS_TOTAL).increment(1);
    }

    /// Record an answer that came from a pattern rule or the safe default
    pub fn record_pattern_fallback(&self, rule: &str) {
        self.pattern_fallbacks.fetch_add(1, Ordering::Relaxed);
        counter!(names::PATTERN_FALLBACKS_TOTAL, "rule" => rule.to_string()).increment(1);
    }

    /// Record the result validator's confidence
    pub fn record_validation(&self, confidence: f64) {
        histogram!(names::VALIDATION_CONFIDENCE).record(confidence);
    }

    /// Record the size of a freshly built schema context
    #[allow(clippy::cast_precision_loss)]
    pub fn record_context_size(&self, chars: usize) {
        gauge!(names::CONTEXT_SIZE).set(chars as f64);
    }

    /// Record a finished conversion
    pub fn record_conversion(&self, status: FinalStatus, attempts: u32, duration: Duration) {
        self.conversions[status_index(status)].fetch_add(1, Ordering::Relaxed);
        counter!(names::CONVERSIONS_TOTAL, "status" => status.as_str()).increment(1);
        histogram!(names::ATTEMPTS_PER_CONVERSION).record(f64::from(attempts));
        histogram!(names::CONVERSION_DURATION).record(duration.as_secs_f64());
    }

    /// Copy the local tallies
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        MetricsSnapshot {
            sql_generated: load(&self.conversions[0]),
            verified_correct: load(&self.conversions[1]),
            max_retries_reached: load(&self.conversions[2]),
            db_connection_failed: load(&self.conversions[3]),
            attempts: load(&self.attempts),
            generation_failures: load(&self.generation_failures),
            execution_errors: load(&self.execution_errors),
            verification_rejections: load(&self.verification_rejections),
            pattern_fallbacks: load(&self.pattern_fallbacks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_tallies_by_status() {
        let collector = MetricsCollector::default();
        collector.record_conversion(FinalStatus::VerifiedCorrect, 2, Duration::from_millis(5));
        collector.record_conversion(FinalStatus::VerifiedCorrect, 1, Duration::from_millis(5));
        collector.record_conversion(FinalStatus::DbConnectionFailed, 0, Duration::ZERO);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.verified_correct, 2);
        assert_eq!(snapshot.db_connection_failed, 1);
        assert_eq!(snapshot.conversions(), 3);
    }

    #[test]
    fn test_metrics_initialization() {
        // Fails if a recorder is already installed, which is fine here
        let _ = MetricsCollector::init();
    }
}
