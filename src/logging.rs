use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::models::{FinalStatus, VerificationRecord};

/// Initialize structured logging.
///
/// Console output goes to stderr (text or JSON per `format`). When a log file
/// is given, a daily-rotated JSON file layer is added; the returned guard must
/// be held until shutdown so buffered lines are flushed.
pub fn init_logging(log_level: Option<&str>, log_file: Option<&Path>, format: &str) -> Result<Option<WorkerGuard>> {
    // Set up environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = log_level.unwrap_or("info");
            EnvFilter::try_new(level)
        })
        .map_err(|e| anyhow::anyhow!("Failed to create log filter: {}", e))?;

    let registry = Registry::default().with(env_filter);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_thread_names(true);
    let console_layer = if format == "json" {
        console_layer.json().boxed()
    } else {
        console_layer.boxed()
    };

    let guard = if let Some(log_path) = log_file {
        let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("nl2sql.log");
        let file_appender = rolling::daily(directory, file_name);
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .json();

        registry
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
        Some(guard)
    } else {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
        None
    };

    info!("Logging system initialized");
    Ok(guard)
}

/// Receives the orchestrator's per-attempt events.
///
/// Injected into the orchestrator so callers can capture the event stream
/// (tests record it; the CLI just traces it).
pub trait ConversionLog: Send + Sync {
    /// A request started
    fn request_started(&self, question: &str, execute: bool);

    /// An attempt produced a candidate
    fn candidate_generated(&self, attempt: u32, sql: &str);

    /// An attempt finished and was recorded
    fn attempt_recorded(&self, record: &VerificationRecord);

    /// A request ended
    fn request_finished(&self, question: &str, status: FinalStatus, attempts: u32);
}

/// Default [`ConversionLog`] that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConversionLog;

impl ConversionLog for TracingConversionLog {
    fn request_started(&self, question: &str, execute: bool) {
        info!(question, execute, "Conversion started");
    }

    fn candidate_generated(&self, attempt: u32, sql: &str) {
        debug!(attempt, sql, "Candidate generated");
    }

    fn attempt_recorded(&self, record: &VerificationRecord) {
        if record.is_correct {
            info!(
                attempt = record.attempt,
                rows = record.row_count,
                reason = %record.reason,
                "Attempt verified"
            );
        } else {
            warn!(
                attempt = record.attempt,
                rows = record.row_count,
                error = record.error.as_deref(),
                reason = %record.reason,
                "Attempt rejected"
            );
        }
    }

    fn request_finished(&self, question: &str, status: FinalStatus, attempts: u32) {
        info!(question, status = %status, attempts, "Conversion finished");
    }
}

/// Performance timing utilities
pub struct OperationTimer {
    operation: String,
    start: std::time::Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: std::time::Instant::now(),
        }
    }

    /// Elapsed time so far
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    /// Log and return the elapsed time in milliseconds
    pub fn finish(self) -> u128 {
        let duration = self.start.elapsed().as_millis();
        info!(operation = %self.operation, duration_ms = duration, "Operation completed");
        duration
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let duration = self.start.elapsed().as_millis();
            debug!(operation = %self.operation, duration_ms = duration, "Operation finished");
        }
    }
}
