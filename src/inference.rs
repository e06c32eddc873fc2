//! Inference endpoint client.
//!
//! [`InferenceBackend`] is the seam the generator talks through; the
//! production implementation is [`OllamaClient`], which probes the server once
//! at construction and reports the outcome through `is_available`.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::InferenceConfig;
use crate::error::{ConversionError, Result};

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// System instructions
    pub system: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub num_predict: u32,
}

/// A language-model service that can complete prompts
pub trait InferenceBackend: Send + Sync {
    /// Whether the capability probe at construction succeeded
    fn is_available(&self) -> bool;

    /// Names of the models the service can run
    fn list_models(&self) -> Result<Vec<String>>;

    /// Complete a prompt and return the raw response text
    fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize, Debug, Default)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize, Debug)]
struct ModelTag {
    name: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// Blocking client for an Ollama-compatible server
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
    health_timeout: Duration,
    generation_timeout: Duration,
    pull_timeout: Duration,
    available: bool,
}

impl OllamaClient {
    /// Build the client and probe the server.
    ///
    /// An unreachable server is not an error: the client is returned with
    /// `is_available() == false`. When `auto_pull` is set and the configured
    /// model is missing, it is pulled before the client reports available.
    pub fn connect(config: &InferenceConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        let mut ollama = Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
            health_timeout: config.health_timeout(),
            generation_timeout: config.generation_timeout(),
            pull_timeout: config.pull_timeout(),
            available: false,
        };

        if !config.enabled {
            info!("Inference disabled by configuration");
            return Ok(ollama);
        }

        ollama.available = ollama.probe(config.auto_pull);
        Ok(ollama)
    }

    /// The model used for completions
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn probe(&self, auto_pull: bool) -> bool {
        let models = match self.fetch_models() {
            Ok(models) => models,
            Err(e) => {
                warn!(base_url = %self.base_url, error = %e, "Inference endpoint unreachable; generation disabled");
                return false;
            }
        };
        debug!(?models, "Available models");

        if models.iter().any(|m| m.contains(&self.model)) {
            info!(model = %self.model, "Connected to inference endpoint");
            return true;
        }

        if !auto_pull {
            warn!(model = %self.model, "Model not installed on inference endpoint; generation disabled");
            return false;
        }

        match self.pull_model() {
            Ok(()) => true,
            Err(e) => {
                error!(model = %self.model, error = %e, "Model pull failed; generation disabled");
                false
            }
        }
    }

    /// Ask the server to download the configured model
    pub fn pull_model(&self) -> Result<()> {
        info!(model = %self.model, "Pulling model");
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.pull_timeout)
            .json(&PullRequest { name: &self.model, stream: false })
            .send()?;

        if !response.status().is_success() {
            return Err(ConversionError::GenerationUnavailable(format!(
                "model pull returned status {}",
                response.status()
            )));
        }
        info!(model = %self.model, "Model ready");
        Ok(())
    }

    fn fetch_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.health_timeout)
            .send()?;

        if !response.status().is_success() {
            return Err(ConversionError::GenerationUnavailable(format!(
                "model listing returned status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json()?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

impl InferenceBackend for OllamaClient {
    fn is_available(&self) -> bool {
        self.available
    }

    fn list_models(&self) -> Result<Vec<String>> {
        self.fetch_models()
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        if !self.available {
            return Err(ConversionError::GenerationUnavailable(
                "inference endpoint not available".to_string(),
            ));
        }

        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.num_predict,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.generation_timeout)
            .json(&body)
            .send()?;

        if !response.status().is_success() {
            return Err(ConversionError::GenerationUnavailable(format!(
                "generation returned status {}",
                response.status()
            )));
        }

        let completion: OllamaResponse = response.json()?;
        debug!(chars = completion.response.len(), "Completion received");
        Ok(completion.response)
    }
}
