//! NL2SQL Engine - Natural Language to SQL Conversion
//!
//! A Rust library that turns plain-English questions about a tabular dataset
//! into SQL, executes them, and checks the answer before returning it.
//!
//! # Features
//!
//! - Schema introspection with sample rows, distinct values and date ranges
//! - Keyword retrieval over a schema documentation corpus
//! - Generation through an Ollama-compatible inference endpoint
//! - Self-correcting retries driven by a verifier and heuristic checks
//! - Deterministic pattern rules when no model is available
//! - Results as text tables, CSV or JSON

/// Configuration management
pub mod config;
/// Schema context construction and caching
pub mod context;
/// Dataset access and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Candidate generation and verification prompts
pub mod generator;
/// Inference endpoint client
pub mod inference;
/// Logging setup and conversion events
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// The retrying conversion state machine
pub mod orchestrator;
/// Rule-based fallback converter
pub mod patterns;
/// Result rendering
pub mod render;
/// Documentation retrieval
pub mod retrieval;
/// Sample dataset schema
pub mod schema;
/// Input sanitization and result heuristics
pub mod validation;

// Re-export key components for easier access
pub use db::{DatasetExecutor, SqliteExecutor};
pub use error::ConversionError;
pub use inference::{InferenceBackend, OllamaClient};
pub use models::{ConversionOutcome, ConversionRequest, FinalStatus, OutputFormat, QueryResult};
pub use orchestrator::ConversionOrchestrator;
pub use patterns::PatternMatcher;
pub use retrieval::RetrievalIndex;
