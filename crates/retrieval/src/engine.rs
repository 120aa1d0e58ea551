//! Hybrid retrieval orchestrator
//!
//! Runs the full pipeline for a search request: route to shards, embed
//! the query concurrently with the lexical fan-out, vector fan-out once
//! the embedding is ready, fuse, optionally rerank, truncate. Provider
//! failures degrade the result; only malformed requests fail the call.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use jurisearch_common::cache::IndexCacheStore;
use jurisearch_common::config::SearchConfig;
use jurisearch_common::corpus::DocumentProvider;
use jurisearch_common::embeddings::Embedder;
use jurisearch_common::errors::{Result, RetrievalError};
use jurisearch_common::metrics;

use crate::fusion::ScoreFusion;
use crate::index::IndexManager;
use crate::rerank::{RerankModel, Reranker};
use crate::router::CollectionRouter;
use crate::vector::{VectorSearchAdapter, VectorStore};
use crate::{Candidate, SearchFilter, SearchRequest};

/// Hybrid retriever over lexical, vector, and rerank stages
pub struct HybridRetriever {
    config: SearchConfig,
    index: Arc<IndexManager>,
    vector: VectorSearchAdapter,
    embedder: Arc<dyn Embedder>,
    reranker: Reranker,
    router: CollectionRouter,
    fusion: ScoreFusion,
    semaphore: Arc<Semaphore>,
}

impl HybridRetriever {
    /// Assemble a retriever from injected collaborators.
    ///
    /// Fails fast on invalid configuration; nothing else in the
    /// pipeline produces hard errors at construction time.
    pub fn new(
        config: SearchConfig,
        provider: Arc<dyn DocumentProvider>,
        cache: Arc<dyn IndexCacheStore>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        rerank_model: Arc<dyn RerankModel>,
    ) -> Result<Self> {
        config.validate()?;

        let index = Arc::new(IndexManager::new(
            provider,
            cache,
            config.lexical.clone(),
        ));
        let vector = VectorSearchAdapter::from_config(vector_store, &config.vector);
        let reranker = Reranker::from_config(rerank_model, &config.rerank);
        let router = CollectionRouter::from_config(&config.shards);
        let fusion = ScoreFusion::from_config(&config.fusion);
        let semaphore = Arc::new(Semaphore::new(config.runtime.max_concurrent_tasks));

        Ok(Self {
            config,
            index,
            vector,
            embedder,
            reranker,
            router,
            fusion,
            semaphore,
        })
    }

    /// Run a hybrid search.
    ///
    /// Zero candidates is a valid outcome; the only hard errors are a
    /// malformed request or an override/filter naming an unknown shard.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<Candidate>> {
        let start = Instant::now();

        request.validate().map_err(|e| RetrievalError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        let search_id = Uuid::new_v4();
        let shards = self.router.select_shards(
            &request.query_text,
            request.shard_override.as_deref(),
            &request.filters,
        )?;

        debug!(
            search_id = %search_id,
            shards = ?shards,
            rerank = request.rerank,
            "Search routed"
        );

        // Fetch more from each source so fusion has overlap to work with
        let expanded_limit = request.n_results * 2;

        let (embedding, lexical) = tokio::join!(
            self.embed_query(&request.query_text),
            self.lexical_fan_out(&shards, &request.query_text, &request.filters, expanded_limit)
        );

        let vector = match embedding {
            Some(ref embedding) => {
                self.vector_fan_out(&shards, embedding, &request.filters, expanded_limit)
                    .await
            }
            None => Vec::new(),
        };

        let fused = self.fusion.fuse(lexical, vector);

        let mut results = if request.rerank && !fused.is_empty() {
            self.reranker.rerank(&request.query_text, fused).await
        } else {
            fused
        };
        results.truncate(request.n_results);

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_search(elapsed, results.len(), request.rerank);
        info!(
            search_id = %search_id,
            results = results.len(),
            latency_ms = (elapsed * 1000.0) as u64,
            "Search completed"
        );

        Ok(results)
    }

    /// Same pipeline with default request settings; convenience entry
    /// point for callers that never touch generation
    pub async fn search_only(
        &self,
        query_text: &str,
        filters: SearchFilter,
        n_results: usize,
    ) -> Result<Vec<Candidate>> {
        self.search(SearchRequest {
            query_text: query_text.to_string(),
            filters,
            n_results,
            ..Default::default()
        })
        .await
    }

    /// Warm the lexical index of every catalog shard
    pub async fn preload(&self) -> Result<()> {
        self.index.preload(self.router.catalog()).await
    }

    /// Drop a shard's lexical index everywhere; rebuilt on next access
    pub async fn invalidate(&self, shard: &str) -> Result<()> {
        self.index.invalidate(shard).await
    }

    /// Embed the query. Failure or timeout degrades the whole request
    /// to lexical-only, warned once here rather than per shard.
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let start = Instant::now();
        let timeout = self.config.embedding.timeout();
        let model = self.embedder.model_name().to_string();

        match tokio::time::timeout(timeout, self.embedder.embed(query)).await {
            Ok(Ok(embedding)) => {
                metrics::record_embedding(start.elapsed().as_secs_f64(), &model, 1, true);
                Some(embedding)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Embedding failed, continuing lexical-only");
                metrics::record_embedding(start.elapsed().as_secs_f64(), &model, 1, false);
                metrics::record_degraded("embedding");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Embedding timed out, continuing lexical-only"
                );
                metrics::record_embedding(start.elapsed().as_secs_f64(), &model, 1, false);
                metrics::record_degraded("embedding");
                None
            }
        }
    }

    /// One lexical task per shard under the shared semaphore
    async fn lexical_fan_out(
        &self,
        shards: &[String],
        query: &str,
        filter: &SearchFilter,
        top_n: usize,
    ) -> Vec<Candidate> {
        let timeout = self.config.lexical.timeout();

        let tasks = shards.iter().map(|shard| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };

                match tokio::time::timeout(
                    timeout,
                    self.index.search(shard, query, filter, top_n),
                )
                .await
                {
                    Ok(Ok(candidates)) => candidates,
                    Ok(Err(e)) => {
                        warn!(shard = %shard, source = "lexical", error = %e, "Shard task failed");
                        metrics::record_degraded("lexical");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(shard = %shard, source = "lexical", "Shard task timed out");
                        metrics::record_degraded("lexical");
                        Vec::new()
                    }
                }
            }
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// One vector task per shard under the shared semaphore
    async fn vector_fan_out(
        &self,
        shards: &[String],
        embedding: &[f32],
        filter: &SearchFilter,
        top_n: usize,
    ) -> Vec<Candidate> {
        let timeout = self.config.vector.timeout();

        let tasks = shards.iter().map(|shard| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };

                match tokio::time::timeout(
                    timeout,
                    self.vector.search(shard, embedding, filter, top_n),
                )
                .await
                {
                    Ok(Ok(candidates)) => candidates,
                    Ok(Err(e)) => {
                        warn!(shard = %shard, source = "vector", error = %e, "Shard task failed");
                        metrics::record_degraded("vector");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(shard = %shard, source = "vector", "Shard task timed out");
                        metrics::record_degraded("vector");
                        Vec::new()
                    }
                }
            }
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }
}
