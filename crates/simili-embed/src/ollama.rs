//! Ollama-compatible embedding backend (`POST /api/embed`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{EmbedError, Result};
use crate::http::build_client;
use crate::provider::{EmbeddingProvider, check_dimension};
use crate::retry::{RetryPolicy, send_with_retry};

/// Longest error body kept in `EmbedError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Declared output dimension; responses of any other size are rejected.
    pub dimension: Option<usize>,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// How long to wait for the service to come up before the first request.
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            dimension: None,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(20),
            ready_poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: OllamaConfig,
    ready: Arc<OnceCell<()>>,
}

impl OllamaEmbedder {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = build_client(config.request_timeout)?;
        Ok(Self {
            client,
            config,
            ready: Arc::new(OnceCell::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Block until the service answers `GET /api/tags`.
    ///
    /// Succeeds at most once per client; clones share the result.
    ///
    /// # Errors
    ///
    /// Returns `EmbedError::Unavailable` if the service is still down after
    /// `ready_timeout`.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.poll_ready())
            .await
            .map(|_| ())
    }

    async fn poll_ready(&self) -> Result<()> {
        let url = self.endpoint("/api/tags");
        let started = Instant::now();
        loop {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %self.config.base_url, "embedding service ready");
                    return Ok(());
                }
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "embedding service not ready");
                }
                Err(e) => tracing::debug!("embedding service not reachable: {e}"),
            }

            let waited = started.elapsed();
            if waited >= self.config.ready_timeout {
                return Err(EmbedError::Unavailable {
                    url: self.config.base_url.clone(),
                    waited,
                });
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_backoff: self.config.retry_backoff,
        }
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> Option<usize> {
        self.config.dimension
    }

    fn with_model(&self, model: &str) -> Self {
        let mut config = self.config.clone();
        config.model = model.to_owned();
        Self {
            client: self.client.clone(),
            config,
            ready: Arc::clone(&self.ready),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.wait_until_ready().await?;

        let url = self.endpoint("/api/embed");
        let body = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = send_with_retry(self.name(), &self.retry_policy(), || {
            self.client.post(&url).json(&body).send()
        })
        .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let end = bytes.len().min(MAX_ERROR_BODY);
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes[..end]).into_owned(),
            });
        }

        let parsed: EmbedResponse =
            serde_json::from_slice(&bytes).map_err(|e| EmbedError::Malformed(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        check_dimension(self.config.dimension, &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }
}
