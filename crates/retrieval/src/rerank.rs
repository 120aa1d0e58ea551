//! Cross-encoder reranking of the fused head
//!
//! A rerank model scores (query, document) pairs for the top-K fused
//! candidates only; cross-encoders are far too slow for full results.
//! The model is never a hard dependency: on failure or timeout the
//! fused order stands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use jurisearch_common::config::{RerankConfig, RerankWeightsConfig};
use jurisearch_common::errors::{Result, RetrievalError};
use jurisearch_common::metrics;

use crate::fusion::{normalize, NormalizeMethod};
use crate::Candidate;

/// Trait for scoring (query, document) pairs
#[async_trait]
pub trait RerankModel: Send + Sync {
    /// Score each document against the query. The returned vector must
    /// be parallel to `documents`.
    async fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Cohere-style HTTP rerank client
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    /// Create a new HTTP reranker client
    pub fn new(base_url: String, api_key: Option<String>, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl RerankModel for HttpReranker {
    async fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url);

        let request = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: documents.to_vec(),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetrievalError::RerankerUnavailable {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::RerankerUnavailable {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: RerankResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::RerankerUnavailable {
                    message: format!("Failed to parse response: {}", e),
                })?;

        // Responses come ranked; re-scatter by index to stay parallel
        // with the input documents
        let mut scores = vec![0.0; documents.len()];
        for entry in result.results {
            if entry.index < scores.len() {
                scores[entry.index] = entry.relevance_score;
            }
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic token-overlap reranker for tests and offline use
#[derive(Debug, Default)]
pub struct MockReranker;

impl MockReranker {
    pub fn new() -> Self {
        Self
    }

    fn token_set(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect()
    }
}

#[async_trait]
impl RerankModel for MockReranker {
    async fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let query_tokens = Self::token_set(query);
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_tokens = Self::token_set(doc);
                let intersection = query_tokens.intersection(&doc_tokens).count();
                let union = query_tokens.union(&doc_tokens).count();
                if union == 0 {
                    0.0
                } else {
                    intersection as f32 / union as f32
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "mock-rerank"
    }
}

/// Create a rerank model based on configuration
pub fn create_reranker(config: &RerankConfig) -> Result<Arc<dyn RerankModel>> {
    match config.provider.as_str() {
        "http" => {
            let base_url =
                config
                    .base_url
                    .clone()
                    .ok_or_else(|| RetrievalError::Configuration {
                        message: "rerank.base_url is required for the http provider".to_string(),
                    })?;
            Ok(Arc::new(HttpReranker::new(
                base_url,
                config.api_key.clone(),
                config.model.clone(),
                config.timeout(),
            )))
        }
        "mock" => Ok(Arc::new(MockReranker::new())),
        other => {
            warn!(provider = other, "Unknown rerank provider, using mock");
            Ok(Arc::new(MockReranker::new()))
        }
    }
}

/// Weights for the reranked combination
#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub lexical: f32,
    pub vector: f32,
    pub rerank: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            lexical: 0.3,
            vector: 0.3,
            rerank: 0.4,
        }
    }
}

impl RerankWeights {
    pub fn from_config(config: &RerankWeightsConfig) -> Self {
        Self {
            lexical: config.lexical,
            vector: config.vector,
            rerank: config.rerank,
        }
    }
}

/// Applies a rerank model to the head of a fused candidate list
pub struct Reranker {
    model: Arc<dyn RerankModel>,
    weights: RerankWeights,
    top_k: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(
        model: Arc<dyn RerankModel>,
        weights: RerankWeights,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            weights,
            top_k,
            timeout,
        }
    }

    pub fn from_config(model: Arc<dyn RerankModel>, config: &RerankConfig) -> Self {
        Self::new(
            model,
            RerankWeights::from_config(&config.weights),
            config.top_k,
            config.timeout(),
        )
    }

    /// Rescore and re-sort the fused head; the tail keeps fused order.
    ///
    /// Head candidates get `combined_score = w_lex * lexical + w_vec *
    /// vector + w_rerank * rerank_norm` with the model's scores min-max
    /// normalized within the head batch. Tail candidates are recomputed
    /// under the same weights with no rerank term, preserving their
    /// relative order. On model failure, timeout, or a malformed
    /// response the input comes back unchanged.
    pub async fn rerank(&self, query: &str, mut fused: Vec<Candidate>) -> Vec<Candidate> {
        if fused.is_empty() || self.top_k == 0 {
            return fused;
        }

        let split = self.top_k.min(fused.len());
        let tail = fused.split_off(split);
        let mut head = fused;

        let documents: Vec<String> = head.iter().map(|c| c.text.clone()).collect();

        let outcome = tokio::time::timeout(
            self.timeout,
            self.model.score_pairs(query, &documents),
        )
        .await;

        let scores = match outcome {
            Ok(Ok(scores)) if scores.len() == head.len() => scores,
            Ok(Ok(scores)) => {
                warn!(
                    model = self.model.model_name(),
                    expected = head.len(),
                    received = scores.len(),
                    "Reranker returned a mismatched score count, keeping fused order"
                );
                metrics::record_degraded("reranker");
                head.extend(tail);
                return head;
            }
            Ok(Err(e)) => {
                warn!(
                    model = self.model.model_name(),
                    error = %e,
                    "Reranker failed, keeping fused order"
                );
                metrics::record_degraded("reranker");
                head.extend(tail);
                return head;
            }
            Err(_) => {
                warn!(
                    model = self.model.model_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Reranker timed out, keeping fused order"
                );
                metrics::record_degraded("reranker");
                head.extend(tail);
                return head;
            }
        };

        let normalized = normalize(&scores, NormalizeMethod::MinMax);

        for (candidate, (raw, norm)) in head
            .iter_mut()
            .zip(scores.iter().zip(normalized.iter()))
        {
            candidate.rerank_score = Some(*raw);
            candidate.combined_score = self.weights.lexical
                * candidate.lexical_score.unwrap_or(0.0)
                + self.weights.vector * candidate.vector_score.unwrap_or(0.0)
                + self.weights.rerank * norm;
        }

        head.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        let mut tail = tail;
        for candidate in tail.iter_mut() {
            candidate.combined_score = self.weights.lexical
                * candidate.lexical_score.unwrap_or(0.0)
                + self.weights.vector * candidate.vector_score.unwrap_or(0.0);
        }

        head.extend(tail);
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct ScriptedModel {
        scores: Vec<f32>,
    }

    #[async_trait]
    impl RerankModel for ScriptedModel {
        async fn score_pairs(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
            Ok(self.scores.iter().copied().take(documents.len()).collect())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl RerankModel for FailingModel {
        async fn score_pairs(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Err(RetrievalError::RerankerUnavailable {
                message: "model offline".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    /// Candidate in post-fusion state: normalized scores, 0.5/0.5 combination
    fn fused_candidate(doc_id: &str, lexical: f32, vector: f32) -> Candidate {
        Candidate {
            doc_id: doc_id.to_string(),
            shard: "general".to_string(),
            text: format!("text for {}", doc_id),
            metadata: HashMap::new(),
            lexical_score: Some(lexical),
            vector_score: Some(vector),
            rerank_score: None,
            combined_score: 0.5 * lexical + 0.5 * vector,
        }
    }

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_model_scores_reorder_head() {
        // Fused order a > b > c; the model inverts it
        let fused = vec![
            fused_candidate("a", 1.0, 1.0),
            fused_candidate("b", 0.6, 0.6),
            fused_candidate("c", 0.1, 0.2),
        ];
        let model = Arc::new(ScriptedModel {
            scores: vec![0.1, 0.2, 0.9],
        });
        let reranker = Reranker::new(model, RerankWeights::default(), 10, timeout());

        let reranked = reranker.rerank("query", fused).await;

        // c gets the full rerank weight: 0.3*0.1 + 0.3*0.2 + 0.4*1.0 = 0.49
        // b keeps little:                0.3*0.6 + 0.3*0.6 + 0.4*0.125 = 0.41
        assert_eq!(reranked[0].doc_id, "a");
        assert_eq!(reranked[1].doc_id, "c");
        assert_eq!(reranked[2].doc_id, "b");
        assert!(reranked.iter().all(|c| c.rerank_score.is_some()));
    }

    #[tokio::test]
    async fn test_tail_keeps_fused_order() {
        let fused = vec![
            fused_candidate("a", 1.0, 1.0),
            fused_candidate("b", 0.8, 0.8),
            fused_candidate("c", 0.6, 0.6),
            fused_candidate("d", 0.4, 0.4),
        ];
        let model = Arc::new(ScriptedModel {
            scores: vec![0.2, 0.9],
        });
        let reranker = Reranker::new(model, RerankWeights::default(), 2, timeout());

        let reranked = reranker.rerank("query", fused).await;

        // Head of two re-sorted by the model, tail order untouched
        let ids: Vec<&str> = reranked.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(&ids[2..], &["c", "d"]);
        assert!(reranked[2].rerank_score.is_none());
        assert!(reranked[3].rerank_score.is_none());

        // Tail rescored under the rerank weights with no rerank term
        assert!((reranked[2].combined_score - 0.6 * 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_head_never_drops_below_tail_with_default_weights() {
        let fused = vec![
            fused_candidate("a", 1.0, 1.0),
            fused_candidate("b", 0.9, 0.7),
            fused_candidate("c", 0.5, 0.6),
            fused_candidate("d", 0.4, 0.3),
            fused_candidate("e", 0.1, 0.2),
        ];
        let model = Arc::new(ScriptedModel {
            scores: vec![0.0, 0.1, 0.05],
        });
        let reranker = Reranker::new(model, RerankWeights::default(), 3, timeout());

        let reranked = reranker.rerank("query", fused).await;

        for pair in reranked.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score - 1e-6);
        }
    }

    #[tokio::test]
    async fn test_failure_returns_input_unchanged() {
        let fused = vec![
            fused_candidate("a", 1.0, 1.0),
            fused_candidate("b", 0.5, 0.5),
        ];
        let expected = fused.clone();
        let reranker = Reranker::new(Arc::new(FailingModel), RerankWeights::default(), 10, timeout());

        let reranked = reranker.rerank("query", fused).await;
        assert_eq!(reranked, expected);
    }

    #[tokio::test]
    async fn test_mismatched_count_returns_input_unchanged() {
        struct ShortModel;

        #[async_trait]
        impl RerankModel for ShortModel {
            async fn score_pairs(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
                Ok(vec![0.5])
            }

            fn model_name(&self) -> &str {
                "short"
            }
        }

        let fused = vec![
            fused_candidate("a", 1.0, 1.0),
            fused_candidate("b", 0.5, 0.5),
        ];
        let expected = fused.clone();
        let reranker = Reranker::new(Arc::new(ShortModel), RerankWeights::default(), 10, timeout());

        let reranked = reranker.rerank("query", fused).await;
        assert_eq!(reranked, expected);
    }

    #[tokio::test]
    async fn test_timeout_returns_input_unchanged() {
        struct SlowModel;

        #[async_trait]
        impl RerankModel for SlowModel {
            async fn score_pairs(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![0.0; documents.len()])
            }

            fn model_name(&self) -> &str {
                "slow"
            }
        }

        let fused = vec![fused_candidate("a", 1.0, 1.0)];
        let expected = fused.clone();
        let reranker = Reranker::new(
            Arc::new(SlowModel),
            RerankWeights::default(),
            10,
            Duration::from_millis(20),
        );

        let reranked = reranker.rerank("query", fused).await;
        assert_eq!(reranked, expected);
    }

    #[tokio::test]
    async fn test_mock_reranker_scores_overlap() {
        let model = MockReranker::new();
        let scores = model
            .score_pairs(
                "amortissement des immobilisations",
                &[
                    "amortissement des immobilisations corporelles".to_string(),
                    "tresorerie et disponibilites".to_string(),
                ],
            )
            .await
            .unwrap();

        assert!(scores[0] > scores[1]);
        assert_eq!(scores.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_passes_through() {
        let reranker = Reranker::new(
            Arc::new(MockReranker::new()),
            RerankWeights::default(),
            10,
            timeout(),
        );
        let reranked = reranker.rerank("query", Vec::new()).await;
        assert!(reranked.is_empty());
    }
}
