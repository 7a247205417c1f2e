//! HTTP client for the utterance generation service
//!
//! Provides an async client with:
//! - Bearer authentication from `LOREKEEP_GENERATION_API_KEY`
//! - Status code mapping to crate errors
//! - Rate limit handling with exponential backoff

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

use super::types::{GenerateRequest, GenerateResponse, GeneratedUtterance};

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for a server-suggested wait (in seconds)
const MAX_SUGGESTED_WAIT_SECS: u64 = 30;

/// Source of generated utterances
#[async_trait]
pub trait UtteranceGenerator: Send + Sync {
    /// Produce up to `count` utterances continuing `context`
    async fn generate(&self, context: &str, count: usize) -> Result<Vec<GeneratedUtterance>>;
}

/// HTTP generation client
#[derive(Clone)]
pub struct HttpUtteranceGenerator {
    http_client: HttpClient,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for HttpUtteranceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUtteranceGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

/// Builder for creating an HttpUtteranceGenerator
#[derive(Default)]
pub struct HttpUtteranceGeneratorBuilder {
    config: Option<GenerationConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl HttpUtteranceGeneratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the generation configuration
    pub fn config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the configured request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<HttpUtteranceGenerator> {
        let config = self.config.unwrap_or_default();
        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self.base_url.unwrap_or(config.base_url);
        Ok(HttpUtteranceGenerator {
            http_client,
            api_key: self.api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model,
        })
    }
}

impl HttpUtteranceGenerator {
    pub fn builder() -> HttpUtteranceGeneratorBuilder {
        HttpUtteranceGeneratorBuilder::new()
    }

    /// Create a client from configuration, reading the API key from the environment
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let mut builder = Self::builder().config(config.clone());
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/generate", self.base_url)
    }

    /// Execute a request with retry logic for rate limits
    async fn execute_request(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Generation rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request to the service
    async fn send_request(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        debug!(
            model = %request.model,
            count = request.count,
            context_len = request.context.len(),
            "Sending generation request"
        );

        let mut builder = self.http_client.post(self.endpoint()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(Error::NetworkError)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| Error::GenerationFailed(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl UtteranceGenerator for HttpUtteranceGenerator {
    async fn generate(&self, context: &str, count: usize) -> Result<Vec<GeneratedUtterance>> {
        let request = GenerateRequest {
            model: self.model.clone(),
            context: context.to_string(),
            count,
        };

        let response = self.execute_request(&request).await?;
        debug!(received = response.utterances.len(), "Generation response received");
        Ok(response.utterances)
    }
}

/// Map a non-success status to a crate error
fn map_error_status(status: reqwest::StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 => Error::GenerationFailed(format!(
            "Unauthorized: set the {} environment variable",
            crate::config::GENERATION_API_KEY_ENV
        )),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(1)),
        400 => Error::GenerationFailed(format!("Bad request: {}", body)),
        403 => Error::GenerationFailed(format!("Forbidden: {}", body)),
        404 => Error::GenerationFailed(format!("Endpoint or model not found: {}", body)),
        500..=599 => Error::GenerationFailed(format!("Server error ({}): {}", status, body)),
        _ => Error::GenerationFailed(format!("HTTP error {}: {}", status, body)),
    }
}

/// Calculate backoff delay with jitter
fn calculate_backoff(attempt: u32, suggested_wait_secs: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let suggested = suggested_wait_secs.min(MAX_SUGGESTED_WAIT_SECS) * 1000;
    let delay = base.max(suggested);

    // Up to 10% jitter
    let jitter = (delay / 10).max(1);
    delay + rand::thread_rng().gen_range(0..jitter)
}

/// Extract a retry-after hint from an error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
        return Some(retry_after);
    }
    json.get("error")
        .and_then(|e| e.get("retry_after"))
        .and_then(|v| v.as_u64())
}
