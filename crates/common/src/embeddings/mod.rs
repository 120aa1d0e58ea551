//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible HTTP endpoints (text-embedding-3-small, ...)
//! - Deterministic mock for tests and offline runs

use crate::config::EmbeddingConfig;
use crate::errors::{Result, RetrievalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
    batch_size: usize,
}

#[derive(Serialize)]
struct OpenAIRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new embedder with default timeout and retry settings
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".to_string());
        let dimension = match model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => 768,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: 3,
            batch_size: 100,
        }
    }

    /// Create an embedder from the embedding config section
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RetrievalError::Configuration {
                message: "embedding.api_key required for the openai provider".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RetrievalError::EmbeddingFailure {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::EmbeddingFailure {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::EmbeddingFailure {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::EmbeddingFailure {
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailure {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic mock embedder
///
/// Folds the text bytes into a unit-length vector, so the same text always
/// maps to the same direction and different texts diverge. Search results
/// built on it are reproducible across runs.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn fold(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            v[i % self.dimension] += f32::from(byte) / 255.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else if !v.is_empty() {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.fold(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.fold(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::from_config(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}
