//! The conversion state machine.
//!
//! A request moves through `generating → executing → verifying` up to
//! `max_retries` times. Every failed step rewrites the question with a
//! corrective instruction for the next attempt; verification always uses the
//! original question. When the generator is disabled or never produces a
//! candidate, the pattern rules (or the safe default) answer instead.
//!
//! The orchestrator is synchronous. [`ConversionOrchestrator::spawn_conversion`]
//! runs a request on tokio's blocking pool for callers that must not block.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConversionConfig};
use crate::context::{ContextSettings, SchemaContext, SchemaContextBuilder};
use crate::db::DatasetExecutor;
use crate::error::{ConversionError, Result};
use crate::generator::{GenerationOptions, Generator};
use crate::inference::{InferenceBackend, OllamaClient};
use crate::logging::{ConversionLog, TracingConversionLog};
use crate::metrics::MetricsCollector;
use crate::models::{
    CandidateSource, ConversionMetadata, ConversionOutcome, ConversionRequest, ExecutionOutcome, FinalStatus,
    QueryResult, SqlCandidate, Verdict, VerificationRecord,
};
use crate::patterns::{PatternMatcher, DEFAULT_SQL};
use crate::retrieval::RetrievalIndex;
use crate::validation::{sanitize_question, ResultValidator};

/// Default bound on generation attempts per request
pub const MAX_RETRIES: u32 = 5;

const COMPLEX_WORDS: &[&str] = &[
    "where", "between", "and", "or", "join", "having", "distinct", "union", "intersect", "subquery", "nested",
];

const SUGGESTIONS: &[&str] = &[
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
];

/// Called with the outcome before a spawned conversion resolves
pub type CompletionCallback = Box<dyn FnOnce(&ConversionOutcome) + Send + 'static>;

/// Tunables for the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Maximum generation attempts per request
    pub max_retries: u32,
    /// Retrieved documents per request
    pub top_k: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            top_k: 3,
        }
    }
}

/// Corrective question after a generation call produced nothing usable
fn correct_after_generation_failure(question: &str, error: &ConversionError) -> String {
    format!(
        "{question}\n\n\
         IMPORTANT: The previous attempt did not produce a usable SQL query ({error}).\n\
         Respond with exactly one SQLite SELECT or WITH statement ending in a semicolon and nothing else."
    )
}

/// Corrective question after the dataset rejected a candidate
fn correct_after_execution_error(question: &str, sql: &str, error: &str) -> String {
    format!(
        "{question}\n\n\
         The previous SQL query failed to execute.\n\
         FAILED QUERY: {sql}\n\
         ERROR: {error}\n\
         Fix the error using only the tables and columns listed in the database context. \
         Respond with only the corrected SQL query."
    )
}

/// Corrective question after an executed candidate was judged incorrect
fn correct_after_rejection(question: &str, sql: &str, rows: usize, problem: &str, fix: Option<&str>) -> String {
    format!(
        "{question}\n\n\
         The previous query did not answer the question correctly.\n\
         PREVIOUS QUERY: {sql}\n\
         ROWS RETURNED: {rows}\n\
         PROBLEM: {problem}\n\
         SUGGESTED FIX: {}\n\
         REQUIREMENTS FOR THE NEXT QUERY:\n\
         - If the question filters by a value (a region, product or customer type), return ONLY rows matching that value.\n\
         - If the question asks for all data, do NOT limit the number of rows.\n\
         Generate the corrected SQL query.",
        fix.unwrap_or("none given")
    )
}

/// Builds a [`ConversionOrchestrator`] from its collaborators
pub struct OrchestratorBuilder {
    executor: Arc<dyn DatasetExecutor>,
    backend: Arc<dyn InferenceBackend>,
    retrieval: Option<RetrievalIndex>,
    context_settings: ContextSettings,
    generation: GenerationOptions,
    settings: OrchestratorSettings,
    log: Arc<dyn ConversionLog>,
    metrics: Arc<MetricsCollector>,
}

impl OrchestratorBuilder {
    /// Use this retrieval index instead of an empty one
    #[must_use]
    pub fn retrieval(mut self, index: RetrievalIndex) -> Self {
        self.retrieval = Some(index);
        self
    }

    /// Schema introspection limits
    #[must_use]
    pub fn context_settings(mut self, settings: ContextSettings) -> Self {
        self.context_settings = settings;
        self
    }

    /// Sampling options for the generator
    #[must_use]
    pub const fn generation_options(mut self, options: GenerationOptions) -> Self {
        self.generation = options;
        self
    }

    /// Retry bound and retrieval depth
    #[must_use]
    pub const fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Receiver for per-attempt events
    #[must_use]
    pub fn conversion_log(mut self, log: Arc<dyn ConversionLog>) -> Self {
        self.log = log;
        self
    }

    /// Shared metrics collector
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Assemble the orchestrator
    pub fn build(self) -> anyhow::Result<ConversionOrchestrator> {
        if self.settings.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        let generator = Generator::new(self.backend, self.generation)?;
        let patterns = PatternMatcher::new()?;
        info!(
            generator = generator.is_enabled(),
            max_retries = self.settings.max_retries,
            "Conversion orchestrator ready"
        );

        Ok(ConversionOrchestrator {
            context_builder: SchemaContextBuilder::new(Arc::clone(&self.executor), self.context_settings),
            executor: self.executor,
            retrieval: self.retrieval.unwrap_or_else(RetrievalIndex::empty),
            patterns,
            generator,
            validator: ResultValidator::new(),
            log: self.log,
            metrics: self.metrics,
            settings: self.settings,
        })
    }
}

/// Composes context, generation, execution and verification
pub struct ConversionOrchestrator {
    executor: Arc<dyn DatasetExecutor>,
    context_builder: SchemaContextBuilder,
    retrieval: RetrievalIndex,
    patterns: PatternMatcher,
    generator: Generator,
    validator: ResultValidator,
    log: Arc<dyn ConversionLog>,
    metrics: Arc<MetricsCollector>,
    settings: OrchestratorSettings,
}

/// A conversion running on the blocking pool.
///
/// Resolves to the outcome once `convert_and_execute` returns; a panic inside
/// the conversion surfaces as an error.
#[derive(Debug)]
pub struct ConversionTask {
    handle: JoinHandle<ConversionOutcome>,
}

impl ConversionTask {
    /// Whether the conversion has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ConversionTask {
    type Output = Result<ConversionOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.map_err(|e| ConversionError::Other(format!("conversion task failed: {e}"))))
    }
}

impl ConversionOrchestrator {
    /// Start building an orchestrator over a dataset and an inference backend
    pub fn builder(executor: Arc<dyn DatasetExecutor>, backend: Arc<dyn InferenceBackend>) -> OrchestratorBuilder {
        let conversion = ConversionConfig::default();
        OrchestratorBuilder {
            executor,
            backend,
            retrieval: None,
            context_settings: ContextSettings::from(&conversion),
            generation: GenerationOptions::default(),
            settings: OrchestratorSettings::default(),
            log: Arc::new(TracingConversionLog),
            metrics: Arc::new(MetricsCollector::default()),
        }
    }

    /// Wire the production collaborators described by a configuration
    pub fn from_config(config: &AppConfig, executor: Arc<dyn DatasetExecutor>) -> anyhow::Result<Self> {
        let backend = OllamaClient::connect(&config.inference).context("Failed to create inference client")?;
        info!(model = backend.model(), available = backend.is_available(), "Inference backend connected");
        let retrieval = RetrievalIndex::from_path(&config.retrieval.corpus_path);

        Self::builder(executor, Arc::new(backend))
            .retrieval(retrieval)
            .context_settings(ContextSettings::from(&config.conversion))
            .generation_options(GenerationOptions::from(&config.inference))
            .settings(OrchestratorSettings {
                max_retries: config.conversion.max_retries,
                top_k: config.retrieval.top_k,
            })
            .build()
    }

    /// Whether the generator passed its capability probe
    pub fn generator_enabled(&self) -> bool {
        self.generator.is_enabled()
    }

    /// The memoized schema context
    pub fn schema_context(&self) -> Arc<SchemaContext> {
        self.context_builder.build()
    }

    /// Drop the memoized schema context
    pub fn invalidate_context(&self) {
        self.context_builder.invalidate();
    }

    /// The retrieval index
    pub const fn retrieval(&self) -> &RetrievalIndex {
        &self.retrieval
    }

    /// The heuristic validator, including its history
    pub const fn validator(&self) -> &ResultValidator {
        &self.validator
    }

    /// Shared metrics
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Example questions the pattern rules answer
    #[must_use]
    pub fn get_suggestions(&self, n: usize) -> Vec<String> {
        SUGGESTIONS.iter().take(n).map(ToString::to_string).collect()
    }

    /// Convert a question to a query without executing it.
    ///
    /// The generator is only consulted for questions that look complex; simple
    /// ones go straight to the pattern rules. The result is never empty.
    pub fn convert(&self, question: &str) -> String {
        let question = sanitize_question(question);
        if question.is_empty() {
            return DEFAULT_SQL.to_string();
        }

        if self.generator.is_enabled() && is_complex_question(&question) {
            let (_, context) = self.build_context(&question);
            match self.generator.generate_query(&question, &context) {
                Ok(sql) => return sql,
                Err(e) => warn!(error = %e, kind = e.kind(), "Generation failed; falling back to patterns"),
            }
        }

        let (candidate, rule) = self.fallback_candidate(&question);
        self.metrics.record_pattern_fallback(rule);
        candidate.sql
    }

    /// Convert, execute, verify and retry
    pub fn convert_and_execute(&self, request: ConversionRequest) -> ConversionOutcome {
        let started = Instant::now();
        let question = sanitize_question(request.question());
        let mut metadata = ConversionMetadata::new(request.question());
        self.log.request_started(&question, request.execute);

        if request.execute {
            if let Err(e) = self.executor.ping() {
                warn!(error = %e, "Dataset unreachable; not attempting conversion");
                let (candidate, _) = self.fallback_candidate(&question);
                return self.finish(metadata, FinalStatus::DbConnectionFailed, candidate.sql, None, started);
            }
        }

        let (schema, context) = self.build_context(&question);
        self.metrics.record_context_size(schema.text.len());
        let expected_stats = schema.stats.summary();

        let mut prompt_question = question.clone();
        let mut last_candidate: Option<SqlCandidate> = None;
        let mut last_result: Option<QueryResult> = None;

        if self.generator.is_enabled() && !question.is_empty() {
            for attempt in 1..=self.settings.max_retries {
                metadata.attempts = attempt;
                self.metrics.record_attempt();
                debug!(attempt, "Generating candidate");

                let sql = match self.generator.generate_query(&prompt_question, &context) {
                    Ok(sql) => sql,
                    Err(e) => {
                        self.metrics.record_generation_failure();
                        self.record(&mut metadata, VerificationRecord::failed(attempt, None, e.to_string()));
                        prompt_question = correct_after_generation_failure(&question, &e);
                        continue;
                    }
                };
                self.log.candidate_generated(attempt, &sql);
                let candidate = SqlCandidate {
                    sql: sql.clone(),
                    attempt,
                    source: CandidateSource::Generator,
                };
                last_candidate = Some(candidate);

                if !request.execute {
                    self.record(
                        &mut metadata,
                        VerificationRecord {
                            attempt,
                            sql: Some(sql.clone()),
                            row_count: None,
                            error: None,
                            is_correct: true,
                            reason: "Execution not requested".to_string(),
                            suggested_fix: None,
                            confidence: None,
                            warnings: Vec::new(),
                        },
                    );
                    return self.finish(metadata, FinalStatus::SqlGenerated, sql, None, started);
                }

                let result = match self.executor.execute(&sql) {
                    ExecutionOutcome::Table(result) => result,
                    ExecutionOutcome::Error(error) => {
                        self.metrics.record_execution_error();
                        let failure = ConversionError::ExecutionError(error.clone());
                        self.record(&mut metadata, VerificationRecord::failed(attempt, Some(sql.clone()), failure.to_string()));
                        prompt_question = correct_after_execution_error(&question, &sql, &error);
                        continue;
                    }
                };

                let report = self.validator.validate(&question, &sql, &result);
                self.metrics.record_validation(report.confidence);
                let verdict = self
                    .generator
                    .verify_result(&question, &sql, &result, &context, &expected_stats);

                let is_correct = verdict.is_correct && report.is_valid;
                let reason = if verdict.is_correct && !report.is_valid {
                    format!("Heuristic checks failed: {}", report.warnings.join("; "))
                } else {
                    verdict.reason.clone()
                };

                let rows = result.row_count();
                self.record(
                    &mut metadata,
                    VerificationRecord {
                        attempt,
                        sql: Some(sql.clone()),
                        row_count: Some(rows),
                        error: None,
                        is_correct,
                        reason: reason.clone(),
                        suggested_fix: verdict.suggested_fix.clone(),
                        confidence: Some(report.confidence),
                        warnings: report.warnings,
                    },
                );

                if is_correct {
                    return self.finish(metadata, FinalStatus::VerifiedCorrect, sql, Some(result), started);
                }

                self.metrics.record_verification_rejection();
                last_result = Some(result);
                prompt_question =
                    correct_after_rejection(&question, &sql, rows, &reason, verdict.suggested_fix.as_deref());
            }
        }

        if let Some(candidate) = last_candidate {
            warn!(error = %ConversionError::MaxRetriesReached(metadata.attempts), "Returning last candidate");
            return self.finish(metadata, FinalStatus::MaxRetriesReached, candidate.sql, last_result, started);
        }

        self.pattern_fallback(&question, request.execute, metadata, started)
    }

    /// Run [`convert_and_execute`](Self::convert_and_execute) on the blocking
    /// pool of `handle`, calling `on_complete` with the outcome first
    pub fn spawn_conversion(
        self: &Arc<Self>,
        handle: &Handle,
        request: ConversionRequest,
        on_complete: Option<CompletionCallback>,
    ) -> ConversionTask {
        let orchestrator = Arc::clone(self);
        let handle = handle.spawn_blocking(move || {
            let outcome = orchestrator.convert_and_execute(request);
            if let Some(callback) = on_complete {
                callback(&outcome);
            }
            outcome
        });
        ConversionTask { handle }
    }

    fn pattern_fallback(
        &self,
        question: &str,
        execute: bool,
        mut metadata: ConversionMetadata,
        started: Instant,
    ) -> ConversionOutcome {
        let (candidate, rule) = self.fallback_candidate(question);
        self.metrics.record_pattern_fallback(rule);
        info!(rule, sql = %candidate.sql, "Answering from pattern rules");

        if !execute {
            return self.finish(metadata, FinalStatus::SqlGenerated, candidate.sql, None, started);
        }

        match self.executor.execute(&candidate.sql) {
            ExecutionOutcome::Table(result) => {
                let report = self.validator.validate(question, &candidate.sql, &result);
                self.metrics.record_validation(report.confidence);
                let verdict = Verdict::unavailable(format!(
                    "{}; answered by pattern rule {rule}",
                    ConversionError::VerificationUnavailable("generator disabled or produced no candidate".to_string())
                ));
                let is_correct = verdict.is_correct && report.is_valid;
                self.record(
                    &mut metadata,
                    VerificationRecord {
                        attempt: candidate.attempt,
                        sql: Some(candidate.sql.clone()),
                        row_count: Some(result.row_count()),
                        error: None,
                        is_correct,
                        reason: verdict.reason,
                        suggested_fix: None,
                        confidence: Some(report.confidence),
                        warnings: report.warnings,
                    },
                );
                let status = if is_correct {
                    FinalStatus::VerifiedCorrect
                } else {
                    FinalStatus::MaxRetriesReached
                };
                self.finish(metadata, status, candidate.sql, Some(result), started)
            }
            ExecutionOutcome::Error(error) => {
                self.metrics.record_execution_error();
                let failure = ConversionError::ExecutionError(error);
                self.record(
                    &mut metadata,
                    VerificationRecord::failed(candidate.attempt, Some(candidate.sql.clone()), failure.to_string()),
                );
                self.finish(metadata, FinalStatus::MaxRetriesReached, candidate.sql, None, started)
            }
        }
    }

    /// Pattern candidate for a question, or the safe default
    fn fallback_candidate(&self, question: &str) -> (SqlCandidate, &'static str) {
        match self.patterns.convert(&question.to_lowercase()) {
            Some(matched) => (
                SqlCandidate {
                    sql: matched.sql,
                    attempt: 0,
                    source: CandidateSource::Pattern,
                },
                matched.rule,
            ),
            None => {
                warn!(question, "No pattern matched; using default query");
                (
                    SqlCandidate {
                        sql: DEFAULT_SQL.to_string(),
                        attempt: 0,
                        source: CandidateSource::Default,
                    },
                    "default",
                )
            }
        }
    }

    fn build_context(&self, question: &str) -> (Arc<SchemaContext>, String) {
        let schema = self.context_builder.build();
        let retrieved = self.retrieval.get_context(question, self.settings.top_k);
        let combined = format!("{}\n\n{retrieved}", schema.text);
        (schema, combined)
    }

    fn record(&self, metadata: &mut ConversionMetadata, record: VerificationRecord) {
        self.log.attempt_recorded(&record);
        metadata.record(record);
    }

    fn finish(
        &self,
        mut metadata: ConversionMetadata,
        status: FinalStatus,
        sql: String,
        result: Option<QueryResult>,
        started: Instant,
    ) -> ConversionOutcome {
        metadata.final_status = status;
        let elapsed: Duration = started.elapsed();
        self.metrics.record_conversion(status, metadata.attempts, elapsed);
        self.log
            .request_finished(&metadata.original_question, status, metadata.attempts);
        ConversionOutcome { sql, result, metadata }
    }
}

/// Whether a question warrants the generator on the generate-only path
#[must_use]
pub fn is_complex_question(question: &str) -> bool {
    let lower = question.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    lower.contains("case when") || COMPLEX_WORDS.iter().any(|w| words.contains(w))
}
