//! Retry loop tests with a mocked inference backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockall::mock;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use nl2sql_engine::db::{DatasetExecutor, SqliteExecutor};
use nl2sql_engine::error::{ConversionError, Result};
use nl2sql_engine::inference::{GenerateRequest, InferenceBackend};
use nl2sql_engine::logging::ConversionLog;
use nl2sql_engine::metrics::MetricsCollector;
use nl2sql_engine::models::{
    ColumnInfo, ConversionOutcome, ConversionRequest, ExecutionOutcome, FinalStatus, VerificationRecord,
};
use nl2sql_engine::orchestrator::{ConversionOrchestrator, OrchestratorSettings};

mock! {
    pub Backend {}

    impl InferenceBackend for Backend {
        fn is_available(&self) -> bool;
        fn list_models(&self) -> Result<Vec<String>>;
        fn generate(&self, request: &GenerateRequest) -> Result<String>;
    }
}

mock! {
    pub Dataset {}

    impl DatasetExecutor for Dataset {
        fn ping(&self) -> Result<()>;
        fn execute(&self, sql: &str) -> ExecutionOutcome;
        fn list_tables(&self) -> Result<Vec<String>>;
        fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>>;
    }
}

const FIRST_SQL: &str = "SELECT * FROM sales WHERE region = 'north';";
const FIXED_SQL: &str = "SELECT * FROM sales WHERE LOWER(region) = 'north';";

fn seeded() -> (TempDir, Arc<dyn DatasetExecutor>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    let executor = SqliteExecutor::open(path.to_str().unwrap(), 2, Duration::from_secs(5)).unwrap();
    executor.seed_sales(200, &mut StdRng::seed_from_u64(42)).unwrap();
    (dir, Arc::new(executor))
}

fn orchestrator(executor: Arc<dyn DatasetExecutor>, backend: MockBackend, max_retries: u32) -> ConversionOrchestrator {
    ConversionOrchestrator::builder(executor, Arc::new(backend))
        .settings(OrchestratorSettings { max_retries, top_k: 3 })
        .build()
        .unwrap()
}

fn is_verification(request: &GenerateRequest) -> bool {
    request.prompt.starts_with("VERIFICATION TASK")
}

/// Backend that answers generation with `sql` and verification with `verdict`
fn scripted(sql: &'static str, verdict: &'static str) -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().returning(move |request| {
        if is_verification(request) {
            Ok(verdict.to_string())
        } else {
            Ok(format!("```sql\n{sql}\n```"))
        }
    });
    backend
}

#[test]
fn test_corrective_prompt_echoes_rejected_attempt() {
    let (_dir, executor) = seeded();
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&prompts);

    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().returning(move |request| {
        if is_verification(request) {
            return Ok(if request.prompt.contains(&format!("GENERATED SQL:\n{FIXED_SQL}")) {
                "CORRECT: YES\nREASON: Only North rows are returned\nFIX: none".to_string()
            } else {
                "CORRECT: NO\nREASON: No rows matched the lowercase literal\nFIX: Use LOWER(region)".to_string()
            });
        }
        captured.lock().unwrap().push(request.prompt.clone());
        let prompt = &request.prompt;
        Ok(if prompt.contains("PREVIOUS QUERY") { FIXED_SQL } else { FIRST_SQL }.to_string())
    });

    let orchestrator = orchestrator(executor, backend, 5);
    let outcome = orchestrator.convert_and_execute(ConversionRequest::new("north sales", true));

    assert_eq!(outcome.metadata.final_status, FinalStatus::VerifiedCorrect);
    assert_eq!(outcome.metadata.attempts, 2);
    assert_eq!(outcome.sql, FIXED_SQL);
    assert!(outcome.result.as_ref().is_some_and(|r| !r.is_empty()));

    let first = &outcome.metadata.verification_history[0];
    assert!(!first.is_correct);
    assert_eq!(first.row_count, Some(0));
    assert!((first.confidence.unwrap() - 0.7).abs() < 1e-9);
    assert!(first.warnings.iter().any(|w| w == "Query returned no results"));

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains(&format!("PREVIOUS QUERY: {FIRST_SQL}")));
    assert!(prompts[1].contains("PROBLEM: No rows matched the lowercase literal"));
    assert!(prompts[1].contains("SUGGESTED FIX: Use LOWER(region)"));
    assert!(prompts[1].contains("USER QUESTION: north sales"));
}

#[test]
fn test_execution_error_is_fed_back() {
    let (_dir, executor) = seeded();
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&prompts);

    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().returning(move |request| {
        if is_verification(request) {
            return Ok("CORRECT: YES\nREASON: Totals match\nFIX: none".to_string());
        }
        captured.lock().unwrap().push(request.prompt.clone());
        Ok(if request.prompt.contains("FAILED QUERY") {
            "SELECT SUM(amount) AS total_sales FROM sales;"
        } else {
            "SELECT SUM(total) FROM sales;"
        }
        .to_string())
    });

    let outcome = orchestrator(executor, backend, 5).convert_and_execute(ConversionRequest::new("total sales", true));
    assert_eq!(outcome.metadata.final_status, FinalStatus::VerifiedCorrect);
    assert_eq!(outcome.metadata.attempts, 2);

    let first = &outcome.metadata.verification_history[0];
    assert!(first.error.as_deref().is_some_and(|e| e.contains("no such column")));
    let prompts = prompts.lock().unwrap();
    assert!(prompts[1].contains("FAILED QUERY: SELECT SUM(total) FROM sales;"));
    assert!(prompts[1].contains("ERROR: "));
    assert!(prompts[1].contains("no such column: total"));
}

#[test]
fn test_exhaustion_keeps_last_successful_result() {
    let (_dir, executor) = seeded();

    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().returning(move |request| {
        if is_verification(request) {
            return Ok("CORRECT: NO\nREASON: Wrong region\nFIX: Filter on north".to_string());
        }
        Ok(if request.prompt.contains("PREVIOUS QUERY") {
            "SELECT nope FROM sales;"
        } else {
            "SELECT * FROM sales WHERE LOWER(region) = 'south';"
        }
        .to_string())
    });

    let outcome = orchestrator(executor, backend, 2).convert_and_execute(ConversionRequest::new("north sales", true));

    assert_eq!(outcome.metadata.final_status, FinalStatus::MaxRetriesReached);
    assert_eq!(outcome.sql, "SELECT nope FROM sales;");
    let history = &outcome.metadata.verification_history;
    assert_eq!(history.len(), 2);
    assert!(history[1].error.is_some());
    let rows = history[0].row_count.unwrap();
    assert!(rows > 0);
    assert_eq!(outcome.result.as_ref().map(|r| r.row_count()), Some(rows));
}

#[test]
fn test_validator_can_veto_a_passing_verdict() {
    let (_dir, executor) = seeded();
    // Empty result, missing SUM and missing GROUP BY push confidence below 0.5
    let backend = scripted("SELECT * FROM sales WHERE amount < 0;", "CORRECT: YES\nREASON: Looks fine\nFIX: none");
    let outcome = orchestrator(executor, backend, 2)
        .convert_and_execute(ConversionRequest::new("total sales per region in north", true));

    assert_eq!(outcome.metadata.final_status, FinalStatus::MaxRetriesReached);
    assert_eq!(outcome.metadata.attempts, 2);
    for record in &outcome.metadata.verification_history {
        assert!(!record.is_correct);
        assert!(record.reason.starts_with("Heuristic checks failed"));
    }
}

#[test]
fn test_generate_only_returns_first_candidate() {
    let (_dir, executor) = seeded();
    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend
        .expect_generate()
        .times(1)
        .returning(|_| Ok("SQL: SELECT AVG(amount) FROM sales;".to_string()));

    let outcome = orchestrator(executor, backend, 5).convert_and_execute(ConversionRequest::new("average sale", false));
    assert_eq!(outcome.metadata.final_status, FinalStatus::SqlGenerated);
    assert_eq!(outcome.metadata.attempts, 1);
    assert_eq!(outcome.sql, "SELECT AVG(amount) FROM sales;");
    assert!(outcome.result.is_none());
}

#[test]
fn test_unreachable_endpoint_falls_back_to_patterns() {
    let (_dir, executor) = seeded();
    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(false);
    backend.expect_generate().never();

    let orchestrator = orchestrator(executor, backend, 5);
    let sql = orchestrator.convert("north sales");
    assert_eq!(sql, "SELECT * FROM sales WHERE LOWER(region) = 'north' ORDER BY date DESC;");
    assert!(!orchestrator.convert("gibberish question").is_empty());

    let outcome = orchestrator.convert_and_execute(ConversionRequest::new("north sales", true));
    assert_eq!(outcome.metadata.attempts, 0);
    assert_eq!(outcome.metadata.final_status, FinalStatus::VerifiedCorrect);
    assert_eq!(outcome.sql, sql);
    let record = &outcome.metadata.verification_history[0];
    assert_eq!(record.attempt, 0);
    assert!(record.reason.contains("filter_region_sales"));
    assert_eq!(orchestrator.metrics().snapshot().pattern_fallbacks, 3);
}

#[test]
fn test_generation_failures_exhaust_retries_then_fall_back() {
    let (_dir, executor) = seeded();
    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend
        .expect_generate()
        .times(3)
        .returning(|_| Err(ConversionError::GenerationUnavailable("timed out".to_string())));

    let orchestrator = orchestrator(executor, backend, 3);
    let outcome = orchestrator.convert_and_execute(ConversionRequest::new("show total sales", true));

    assert_eq!(outcome.metadata.attempts, 3);
    assert_eq!(outcome.sql, "SELECT SUM(amount) AS total_sales FROM sales;");
    assert_eq!(outcome.metadata.verification_history.len(), 4);
    assert!(outcome.metadata.verification_history[..3].iter().all(|r| r.sql.is_none() && r.error.is_some()));

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.generation_failures, 3);
    assert_eq!(snapshot.pattern_fallbacks, 1);
}

#[test]
fn test_unreachable_dataset_stops_before_generation() {
    let mut dataset = MockDataset::new();
    dataset
        .expect_ping()
        .returning(|| Err(ConversionError::Other("connection refused".to_string())));
    dataset.expect_execute().never();

    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().never();

    let outcome = orchestrator(Arc::new(dataset), backend, 5)
        .convert_and_execute(ConversionRequest::new("north sales", true));
    assert_eq!(outcome.metadata.final_status, FinalStatus::DbConnectionFailed);
    assert_eq!(outcome.metadata.final_status.as_str(), "db_connection_failed");
    assert_eq!(outcome.metadata.attempts, 0);
    assert!(outcome.result.is_none());
    assert!(!outcome.sql.is_empty());
}

#[test]
fn test_empty_question_uses_default_query() {
    let (_dir, executor) = seeded();
    let mut backend = MockBackend::new();
    backend.expect_is_available().return_const(true);
    backend.expect_generate().never();

    let orchestrator = orchestrator(executor, backend, 5);
    assert_eq!(orchestrator.convert("  \n "), "SELECT * FROM sales ORDER BY date DESC LIMIT 10;");
}

#[derive(Default)]
struct RecordingLog {
    events: Mutex<Vec<String>>,
}

impl ConversionLog for RecordingLog {
    fn request_started(&self, question: &str, execute: bool) {
        self.events.lock().unwrap().push(format!("start {question} {execute}"));
    }

    fn candidate_generated(&self, attempt: u32, _sql: &str) {
        self.events.lock().unwrap().push(format!("candidate {attempt}"));
    }

    fn attempt_recorded(&self, record: &VerificationRecord) {
        self.events.lock().unwrap().push(format!("record {} {}", record.attempt, record.is_correct));
    }

    fn request_finished(&self, _question: &str, status: FinalStatus, attempts: u32) {
        self.events.lock().unwrap().push(format!("finish {status} {attempts}"));
    }
}

#[test]
fn test_injected_log_receives_every_event() {
    let (_dir, executor) = seeded();
    let log = Arc::new(RecordingLog::default());
    let backend = scripted(FIXED_SQL, "CORRECT: YES\nREASON: ok\nFIX: none");

    let orchestrator = ConversionOrchestrator::builder(executor, Arc::new(backend))
        .conversion_log(Arc::clone(&log) as Arc<dyn ConversionLog>)
        .metrics(Arc::new(MetricsCollector::default()))
        .build()
        .unwrap();
    orchestrator.convert_and_execute(ConversionRequest::new("north sales", true));

    let events = log.events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            "start north sales true".to_string(),
            "candidate 1".to_string(),
            "record 1 true".to_string(),
            "finish verified_correct 1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_spawned_conversion_calls_back_then_resolves() {
    let (_dir, executor) = seeded();
    let backend = scripted(FIXED_SQL, "CORRECT: YES\nREASON: ok\nFIX: none");
    let orchestrator = Arc::new(orchestrator(executor, backend, 5));

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let task = orchestrator.spawn_conversion(
        &tokio::runtime::Handle::current(),
        ConversionRequest::new("north sales", true),
        Some(Box::new(move |outcome: &ConversionOutcome| {
            assert_eq!(outcome.metadata.final_status, FinalStatus::VerifiedCorrect);
            flag.store(true, Ordering::SeqCst);
        })),
    );

    let outcome = task.await.unwrap();
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(outcome.sql, FIXED_SQL);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_attempts_never_exceed_bound(max_retries in 1_u32..6) {
        let (_dir, executor) = seeded();
        let backend = scripted(FIRST_SQL, "CORRECT: NO\nREASON: Wrong rows\nFIX: Filter properly");
        let outcome = orchestrator(executor, backend, max_retries)
            .convert_and_execute(ConversionRequest::new("north sales", true));

        prop_assert_eq!(outcome.metadata.attempts, max_retries);
        prop_assert_eq!(outcome.metadata.final_status, FinalStatus::MaxRetriesReached);
        prop_assert_eq!(outcome.sql.as_str(), FIRST_SQL);
        prop_assert_eq!(outcome.metadata.verification_history.len(), max_retries as usize);
    }
}
