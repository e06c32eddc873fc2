use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::{error, info};

use nl2sql_engine::config::AppConfig;
use nl2sql_engine::context::{ContextSettings, SchemaContextBuilder};
use nl2sql_engine::db::{DatasetExecutor, SqliteExecutor};
use nl2sql_engine::logging::{init_logging, OperationTimer};
use nl2sql_engine::metrics::MetricsCollector;
use nl2sql_engine::models::{ConversionOutcome, ConversionRequest, OutputFormat};
use nl2sql_engine::orchestrator::ConversionOrchestrator;
use nl2sql_engine::render::{write_result, write_result_to_file};
use nl2sql_engine::retrieval::RetrievalIndex;
use nl2sql_engine::validation::InputValidator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a question, execute it and print the verified result
    Ask {
        /// The question in plain English
        question: String,

        /// Output format (txt, csv or json)
        #[arg(short, long, default_value = "txt")]
        format: String,

        /// Also write the result to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print only the final SQL
        #[arg(long)]
        sql_only: bool,

        /// Print the verification history
        #[arg(long)]
        history: bool,
    },
    /// Convert a question to SQL without executing it
    Convert {
        /// The question in plain English
        question: String,
    },
    /// List example questions
    Suggest {
        /// Number of suggestions
        #[arg(short, long, default_value = "10")]
        n: usize,
    },
    /// Print the schema context handed to the generator
    Schema,
    /// Show the documentation chunks retrieved for a question
    Search {
        /// The question in plain English
        question: String,

        /// Number of chunks to retrieve
        #[arg(short, long, default_value = "3")]
        k: usize,
    },
    /// Create the sales table and fill it with sample rows
    Seed {
        /// Rows to insert
        #[arg(short, long, default_value = "1000")]
        rows: usize,
    },
    /// Validate the configuration and print the effective values
    ValidateConfig,
}

fn main() -> Result<()> {
    let config = AppConfig::load()?;

    let log_file = config.logging.file_path.as_deref().map(Path::new);
    let _guard = init_logging(Some(&config.get_log_level()), log_file, &config.logging.format)?;
    MetricsCollector::init()?;

    let cli = Cli::parse();
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Ask {
            question,
            format,
            output,
            sql_only,
            history,
        } => ask(&config, &question, &format, output.as_deref(), sql_only, history, &mut stdout)?,
        Commands::Convert { question } => {
            InputValidator::validate_question(&question)?;
            let orchestrator = build_orchestrator(&config)?;
            writeln!(stdout, "{}", orchestrator.convert(&question))?;
        }
        Commands::Suggest { n } => {
            let orchestrator = build_orchestrator(&config)?;
            for suggestion in orchestrator.get_suggestions(n) {
                writeln!(stdout, "{suggestion}")?;
            }
        }
        Commands::Schema => {
            let builder = SchemaContextBuilder::new(open_executor(&config)?, ContextSettings::from(&config.conversion));
            writeln!(stdout, "{}", builder.build().text)?;
        }
        Commands::Search { question, k } => {
            let index = RetrievalIndex::from_path(&config.retrieval.corpus_path);
            writeln!(stdout, "{}", index.get_context(&question, k))?;
        }
        Commands::Seed { rows } => {
            let executor = open_sqlite(&config)?;
            executor.initialize()?;
            let inserted = executor.seed_sales(rows, &mut rand::thread_rng())?;
            info!(inserted, path = %config.get_database_path(), "Seeded sales table");
            writeln!(stdout, "Inserted {inserted} rows")?;
        }
        Commands::ValidateConfig => {
            config.validate()?;
            writeln!(stdout, "{}", serde_yaml::to_string(&config)?)?;
        }
    }

    Ok(())
}

fn open_sqlite(config: &AppConfig) -> Result<SqliteExecutor> {
    SqliteExecutor::open(
        &config.get_database_path(),
        config.database.max_connections,
        Duration::from_secs(config.database.connection_timeout_secs),
    )
    .context("Failed to open dataset")
}

fn open_executor(config: &AppConfig) -> Result<Arc<dyn DatasetExecutor>> {
    Ok(Arc::new(open_sqlite(config)?))
}

fn build_orchestrator(config: &AppConfig) -> Result<ConversionOrchestrator> {
    ConversionOrchestrator::from_config(config, open_executor(config)?)
}

/// Give an extension-less output path the extension of its format
fn output_path(path: &Path, format: OutputFormat) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(format.extension())
    }
}

fn ask<W: Write>(
    config: &AppConfig,
    question: &str,
    format: &str,
    output: Option<&Path>,
    sql_only: bool,
    history: bool,
    out: &mut W,
) -> Result<()> {
    InputValidator::validate_question(question)?;
    let format: OutputFormat = format.parse().map_err(anyhow::Error::msg)?;
    let timer = OperationTimer::new("ask");

    // The blocking inference client must be created and dropped outside the runtime.
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let runtime = Runtime::new().context("Failed to start runtime")?;
    let task = orchestrator.spawn_conversion(
        runtime.handle(),
        ConversionRequest::new(question, true),
        Some(Box::new(|outcome: &ConversionOutcome| {
            info!(
                status = %outcome.metadata.final_status,
                attempts = outcome.metadata.attempts,
                "Conversion finished"
            );
        })),
    );
    let outcome = runtime.block_on(task)?;
    drop(runtime);

    writeln!(out, "{}", outcome.sql)?;
    if sql_only {
        return Ok(());
    }

    writeln!(
        out,
        "-- status: {} after {} attempt(s)",
        outcome.metadata.final_status, outcome.metadata.attempts
    )?;

    if history {
        for record in &outcome.metadata.verification_history {
            let detail = record.error.as_deref().unwrap_or(record.reason.as_str());
            writeln!(
                out,
                "-- attempt {}: {} ({detail})",
                record.attempt,
                if record.is_correct { "accepted" } else { "rejected" }
            )?;
        }
    }

    match &outcome.result {
        Some(result) => {
            write_result(result, format, out)?;
            if let Some(path) = output {
                let path = output_path(path, format);
                write_result_to_file(result, format, &path)?;
                info!(path = %path.display(), "Result written");
            }
        }
        None => error!(status = %outcome.metadata.final_status, "No result available"),
    }

    info!(summary = %orchestrator.validator().summary_text(), "Validation history");
    timer.finish();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_takes_format_extension() {
        assert_eq!(output_path(Path::new("out/south"), OutputFormat::Csv), PathBuf::from("out/south.csv"));
        assert_eq!(output_path(Path::new("report.txt"), OutputFormat::Json), PathBuf::from("report.txt"));
    }
}
