//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: never configured; every call fails with
//!   [`EmbedError::MissingApiKey`].
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API requesting a
//!   fixed output dimension.
//!
//! Also provides [`cosine_similarity`] for comparing vectors.
//!
//! # Failure Policy
//!
//! A query embedding is issued exactly once per request. There is no retry
//! and no fallback: network errors, non-success statuses and malformed
//! responses are returned to the caller as [`EmbedError`]. Dropping the
//! returned future (for example when the HTTP client disconnects) aborts the
//! in-flight request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider credentials are not configured")]
    MissingApiKey,
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("embedding provider returned no vectors")]
    EmptyResponse,
    #[error("expected a {expected}-dimensional embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Trait for embedding providers.
///
/// Implementations are shared across request handlers, so they must be
/// `Send + Sync`. Tests substitute their own implementation to avoid network
/// calls.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `512`).
    fn dims(&self) -> usize;
    /// Whether credentials are present. Checked by handlers before any call.
    fn is_configured(&self) -> bool;
    /// Embed a single, already normalized text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledProvider {
    dims: usize,
}

impl DisabledProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn is_configured(&self) -> bool {
        false
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::MissingApiKey)
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/v1/embeddings` with the configured model and an
/// explicit `dimensions` so the output matches the stored index vectors.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    /// Create a provider. A missing key is not an error here; it is reported
    /// through [`Embedder::is_configured`] and per call.
    pub fn new(
        config: &EmbeddingConfig,
        dims: usize,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dims,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let api_key = self.api_key.as_deref().ok_or(EmbedError::MissingApiKey)?;

        let body = OpenAiEmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.dims,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiEmbedResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbedError::EmptyResponse)?;

        if embedding.len() != self.dims {
            return Err(EmbedError::Dimension {
                expected: self.dims,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] (key from `embedding.api_key_env`) |
pub fn create_provider(config: &EmbeddingConfig, dims: usize) -> anyhow::Result<Arc<dyn Embedder>> {
    if !config.is_enabled() {
        return Ok(Arc::new(DisabledProvider::new(dims)));
    }

    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key();
            if key.is_none() {
                tracing::warn!(
                    env = %config.api_key_env,
                    "embedding API key not set; search requests will fail"
                );
            }
            Ok(Arc::new(OpenAIProvider::new(config, dims, key)?))
        }
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or a zero-magnitude operand.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
