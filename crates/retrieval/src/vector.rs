//! Vector search against an external store
//!
//! The semantic index lives outside this crate; searches go through the
//! narrow `VectorStore` trait. Ships a Qdrant-style HTTP client and an
//! in-memory implementation for tests and embedded corpora.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use jurisearch_common::config::VectorConfig;
use jurisearch_common::corpus::{Document, MetaValue};
use jurisearch_common::errors::{Result, RetrievalError};
use jurisearch_common::metrics;

use crate::{Candidate, SearchFilter};

/// Raw nearest-neighbor hit from a vector store
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Document ID
    pub doc_id: String,

    /// Document text
    pub text: String,

    /// Opaque document metadata
    pub metadata: HashMap<String, MetaValue>,

    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Trait for nearest-neighbor queries.
///
/// Implementations return at most `limit` hits ordered by similarity,
/// already constrained by the filter where the backend supports it.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>>;
}

/// Qdrant-style HTTP vector store client
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct PointsSearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<PayloadFilter>,
}

#[derive(Debug, Serialize, PartialEq)]
struct PayloadFilter {
    must: Vec<PayloadCondition>,
}

#[derive(Debug, Serialize, PartialEq)]
struct PayloadCondition {
    key: String,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    match_value: Option<PayloadMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<PayloadRange>,
}

#[derive(Debug, Serialize, PartialEq)]
struct PayloadMatch {
    value: serde_json::Value,
}

#[derive(Debug, Serialize, PartialEq)]
struct PayloadRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    gte: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lte: Option<i64>,
}

#[derive(Deserialize)]
struct PointsSearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

fn meta_to_json(value: &MetaValue) -> serde_json::Value {
    match value {
        MetaValue::Bool(b) => serde_json::Value::from(*b),
        MetaValue::Int(i) => serde_json::Value::from(*i),
        MetaValue::Float(f) => serde_json::Value::from(*f),
        MetaValue::Str(s) => serde_json::Value::from(s.clone()),
    }
}

/// Translate a search filter into backend payload conditions
fn build_filter(filter: &SearchFilter) -> Option<PayloadFilter> {
    let mut must = Vec::new();

    if let Some(partie) = filter.partie {
        must.push(PayloadCondition {
            key: "partie".to_string(),
            match_value: Some(PayloadMatch {
                value: serde_json::Value::from(i64::from(partie)),
            }),
            range: None,
        });
    }

    if let Some(range) = &filter.chapitre {
        must.push(PayloadCondition {
            key: "chapitre".to_string(),
            match_value: None,
            range: Some(PayloadRange {
                gte: range.min.map(i64::from),
                lte: range.max.map(i64::from),
            }),
        });
    }

    for (key, value) in &filter.metadata {
        must.push(PayloadCondition {
            key: key.clone(),
            match_value: Some(PayloadMatch {
                value: meta_to_json(value),
            }),
            range: None,
        });
    }

    if must.is_empty() {
        None
    } else {
        Some(PayloadFilter { must })
    }
}

impl HttpVectorStore {
    /// Create a new HTTP vector store client
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn parse_point(point: ScoredPoint) -> Option<VectorHit> {
        let doc_id = point.payload.get("doc_id")?.as_str()?.to_string();
        let text = point
            .payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut metadata = HashMap::new();
        if let Some(serde_json::Value::Object(map)) = point.payload.get("metadata") {
            for (key, value) in map {
                if let Ok(value) = serde_json::from_value::<MetaValue>(value.clone()) {
                    metadata.insert(key.clone(), value);
                }
            }
        }

        Some(VectorHit {
            doc_id,
            text,
            metadata,
            score: point.score,
        })
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, collection
        );

        let request = PointsSearchRequest {
            vector: embedding.to_vec(),
            limit,
            with_payload: true,
            filter: build_filter(filter),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetrievalError::ProviderUnavailable {
                provider: "vector_store".to_string(),
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::ProviderUnavailable {
                provider: "vector_store".to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: PointsSearchResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::ProviderUnavailable {
                    provider: "vector_store".to_string(),
                    message: format!("Failed to parse response: {}", e),
                })?;

        // Points without a doc_id payload cannot participate in fusion
        Ok(result
            .result
            .into_iter()
            .filter_map(Self::parse_point)
            .collect())
    }
}

/// In-memory vector store scored by cosine similarity
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<(Document, Vec<f32>)>>>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection at construction time
    pub fn with_collection(mut self, collection: &str, entries: Vec<(Document, Vec<f32>)>) -> Self {
        self.collections
            .get_mut()
            .insert(collection.to_string(), entries);
        self
    }

    /// Add one embedded document to a collection
    pub async fn insert(&self, collection: &str, document: Document, embedding: Vec<f32>) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push((document, embedding));
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>> {
        let collections = self.collections.read().await;
        let entries = match collections.get(collection) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(doc, _)| filter.matches(&doc.metadata))
            .map(|(doc, vec)| VectorHit {
                doc_id: doc.id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(embedding, vec),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Create a vector store based on configuration
pub fn create_vector_store(config: &VectorConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "http" => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                RetrievalError::Configuration {
                    message: "vector.base_url is required for the http provider".to_string(),
                }
            })?;
            Ok(Arc::new(HttpVectorStore::new(
                base_url,
                config.api_key.clone(),
                config.timeout(),
            )))
        }
        "memory" => Ok(Arc::new(MemoryVectorStore::new())),
        other => {
            warn!(provider = other, "Unknown vector store provider, using memory");
            Ok(Arc::new(MemoryVectorStore::new()))
        }
    }
}

/// Wraps a `VectorStore` with over-fetching and score mapping.
///
/// Similarity is mapped into `vector_score = (score + 1) / 2`, clamped
/// to [0, 1], so fusion always sees one score convention.
pub struct VectorSearchAdapter {
    store: Arc<dyn VectorStore>,
    over_fetch_factor: usize,
}

impl VectorSearchAdapter {
    pub fn new(store: Arc<dyn VectorStore>, over_fetch_factor: usize) -> Self {
        Self {
            store,
            over_fetch_factor: over_fetch_factor.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn VectorStore>, config: &VectorConfig) -> Self {
        Self::new(store, config.over_fetch_factor)
    }

    /// Query one shard's collection.
    ///
    /// Over-fetches `top_n * over_fetch_factor` so fusion has lexical
    /// overlap to work with. Store failures are absorbed: the shard
    /// contributes nothing and the error is logged at warn.
    pub async fn search(
        &self,
        shard: &str,
        embedding: &[f32],
        filter: &SearchFilter,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        let limit = top_n.saturating_mul(self.over_fetch_factor).max(1);

        let hits = match self.store.query(shard, embedding, limit, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(shard = %shard, error = %e, "Vector search degraded, shard skipped");
                metrics::record_degraded("vector");
                return Ok(Vec::new());
            }
        };

        Ok(hits
            .into_iter()
            .filter(|hit| filter.matches(&hit.metadata))
            .map(|hit| {
                let score = ((hit.score + 1.0) / 2.0).clamp(0.0, 1.0);
                Candidate {
                    doc_id: hit.doc_id,
                    shard: shard.to_string(),
                    text: hit.text,
                    metadata: hit.metadata,
                    lexical_score: None,
                    vector_score: Some(score),
                    rerank_score: None,
                    combined_score: 0.0,
                }
            })
            .collect())
    }
}
