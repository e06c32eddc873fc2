use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub inference: InferenceConfig,
    pub retrieval: RetrievalConfig,
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub health_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub temperature: f32,
    pub num_predict: u32,
    pub auto_pull: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub corpus_path: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub max_retries: u32,
    pub sample_rows: usize,
    pub distinct_value_limit: usize,
    pub excluded_columns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/nl2sql.db".to_string(),
                max_connections: 4,
                connection_timeout_secs: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            inference: InferenceConfig::default(),
            retrieval: RetrievalConfig {
                corpus_path: "data/schema_docs.txt".to_string(),
                top_k: 3,
            },
            conversion: ConversionConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b-instruct-q4_K_M".to_string(),
            health_timeout_secs: 5,
            generation_timeout_secs: 120,
            pull_timeout_secs: 600,
            temperature: 0.1,
            num_predict: 1024,
            auto_pull: false,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            sample_rows: 10,
            distinct_value_limit: 20,
            excluded_columns: ["id", "description", "notes", "email", "phone", "address"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl InferenceConfig {
    /// Timeout for health and model-listing calls
    #[must_use]
    pub const fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    /// Timeout for generation and verification calls
    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Timeout for model pulls
    #[must_use]
    pub const fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Add environment variables with prefix, e.g. NL2SQL_INFERENCE__MODEL
            .add_source(
                Environment::with_prefix("NL2SQL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.path.trim().is_empty() {
            return Err(anyhow::anyhow!("database path cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate inference config
        if self.inference.model.trim().is_empty() {
            return Err(anyhow::anyhow!("inference model cannot be empty"));
        }
        if self.inference.health_timeout_secs == 0
            || self.inference.generation_timeout_secs == 0
            || self.inference.pull_timeout_secs == 0
        {
            return Err(anyhow::anyhow!("inference timeouts must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(anyhow::anyhow!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.inference.temperature
            ));
        }

        // Validate retrieval config
        if self.retrieval.top_k == 0 {
            return Err(anyhow::anyhow!("top_k must be greater than 0"));
        }

        // Validate conversion config
        if self.conversion.max_retries == 0 {
            return Err(anyhow::anyhow!("max_retries must be greater than 0"));
        }
        if self.conversion.sample_rows == 0 {
            return Err(anyhow::anyhow!("sample_rows must be greater than 0"));
        }

        Ok(())
    }

    /// Get database path from environment or config
    #[must_use]
    pub fn get_database_path(&self) -> String {
        std::env::var("NL2SQL_DB_PATH").unwrap_or_else(|_| self.database.path.clone())
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
