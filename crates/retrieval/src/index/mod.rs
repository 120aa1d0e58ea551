//! Lexical index management
//!
//! One BM25 index per shard, built on demand from the document provider.
//! Rebuilds are gated on a content fingerprint of the provider snapshot;
//! built indexes live in memory for the process lifetime and in the
//! index cache store across processes.

mod bm25;
mod tokenizer;

pub use bm25::{IndexedDocument, LexicalIndex, Posting};
pub use tokenizer::{create_tokenizer, fold_diacritics, FrenchTokenizer, SimpleTokenizer, Tokenizer};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use jurisearch_common::cache::IndexCacheStore;
use jurisearch_common::config::LexicalConfig;
use jurisearch_common::corpus::{Document, DocumentProvider};
use jurisearch_common::errors::Result;
use jurisearch_common::metrics;

use crate::{Candidate, SearchFilter};

/// Bumped when the serialized index layout changes; older blobs are
/// treated as misses and rebuilt.
const BLOB_VERSION: u32 = 1;

/// Envelope around a cached index blob
#[derive(Debug, Serialize, Deserialize)]
struct IndexBlob {
    version: u32,
    built_at: DateTime<Utc>,
    index: LexicalIndex,
}

/// Fingerprint of a corpus snapshot: document count plus each document's
/// id and text, in provider order. Metadata changes do not affect BM25
/// scoring terms, but text or membership changes always re-key the index.
pub fn content_fingerprint(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((documents.len() as u64).to_le_bytes());
    for doc in documents {
        hasher.update(doc.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.text.as_bytes());
        hasher.update([0xff]);
    }
    hex::encode(hasher.finalize())
}

/// Builds, caches, and queries per-shard lexical indexes
pub struct IndexManager {
    provider: Arc<dyn DocumentProvider>,
    cache: Arc<dyn IndexCacheStore>,
    tokenizer: Arc<dyn Tokenizer>,
    config: LexicalConfig,
    indexes: RwLock<HashMap<String, Arc<LexicalIndex>>>,
    building: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndexManager {
    /// Create a manager with the tokenizer named in the config
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        cache: Arc<dyn IndexCacheStore>,
        config: LexicalConfig,
    ) -> Self {
        let tokenizer = create_tokenizer(&config.tokenizer);
        Self::with_tokenizer(provider, cache, config, tokenizer)
    }

    /// Create a manager with an explicit tokenizer
    pub fn with_tokenizer(
        provider: Arc<dyn DocumentProvider>,
        cache: Arc<dyn IndexCacheStore>,
        config: LexicalConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            provider,
            cache,
            tokenizer,
            config,
            indexes: RwLock::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
        }
    }

    /// Get the shard's index, building it if needed.
    ///
    /// Concurrent first accesses for the same shard are single-flight:
    /// one caller builds while the rest wait on the per-shard lock and
    /// then adopt the winner's index from the in-memory map.
    pub async fn get_or_build(&self, shard: &str) -> Result<Arc<LexicalIndex>> {
        {
            let indexes = self.indexes.read().await;
            if let Some(index) = indexes.get(shard) {
                return Ok(index.clone());
            }
        }

        let build_lock = {
            let mut building = self.building.lock().await;
            building
                .entry(shard.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = build_lock.lock().await;

        // A concurrent builder may have finished while we waited
        {
            let indexes = self.indexes.read().await;
            if let Some(index) = indexes.get(shard) {
                return Ok(index.clone());
            }
        }

        let start = Instant::now();
        let documents = self.provider.list_documents(shard).await?;

        if documents.is_empty() {
            // Transient: not cached, so the shard is re-checked on the
            // next access instead of pinning an empty index
            warn!(shard = %shard, "Document provider returned no documents");
            return Ok(Arc::new(LexicalIndex::empty(shard)));
        }

        let fingerprint = content_fingerprint(&documents);

        if let Some(index) = self.load_cached(shard, &fingerprint).await {
            let index = Arc::new(index);
            let mut indexes = self.indexes.write().await;
            indexes.insert(shard.to_string(), index.clone());
            return Ok(index);
        }

        let index = LexicalIndex::build(shard, &documents, self.tokenizer.as_ref(), fingerprint);
        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_index_build(shard, elapsed, index.doc_count());
        info!(
            shard = %shard,
            documents = index.doc_count(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Built lexical index"
        );

        let index = self.store_cached(shard, index).await;

        let mut indexes = self.indexes.write().await;
        indexes.insert(shard.to_string(), index.clone());
        Ok(index)
    }

    /// Try to adopt a cached index for this exact fingerprint
    async fn load_cached(&self, shard: &str, fingerprint: &str) -> Option<LexicalIndex> {
        let blob = match self.cache.get(shard, fingerprint).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                metrics::record_cache(false, "index");
                return None;
            }
            Err(e) => {
                // Store trouble is a miss, never fatal
                warn!(shard = %shard, error = %e, "Index cache read failed");
                metrics::record_cache(false, "index");
                return None;
            }
        };

        match serde_json::from_slice::<IndexBlob>(&blob) {
            Ok(envelope)
                if envelope.version == BLOB_VERSION
                    && envelope.index.fingerprint() == fingerprint =>
            {
                metrics::record_cache(true, "index");
                debug!(
                    shard = %shard,
                    built_at = %envelope.built_at,
                    "Adopted cached lexical index"
                );
                Some(envelope.index)
            }
            Ok(envelope) => {
                warn!(
                    shard = %shard,
                    version = envelope.version,
                    "Stale index blob, rebuilding"
                );
                metrics::record_cache(false, "index");
                self.drop_cache_entries(shard).await;
                None
            }
            Err(e) => {
                warn!(shard = %shard, error = %e, "Corrupt index blob, rebuilding");
                metrics::record_cache(false, "index");
                self.drop_cache_entries(shard).await;
                None
            }
        }
    }

    /// Serialize and store a freshly built index; store failure only warns
    async fn store_cached(&self, shard: &str, index: LexicalIndex) -> Arc<LexicalIndex> {
        let fingerprint = index.fingerprint().to_string();
        let envelope = IndexBlob {
            version: BLOB_VERSION,
            built_at: Utc::now(),
            index,
        };

        match serde_json::to_vec(&envelope) {
            Ok(bytes) => {
                if let Err(e) = self.cache.put(shard, &fingerprint, &bytes).await {
                    warn!(shard = %shard, error = %e, "Index cache write failed");
                }
            }
            Err(e) => {
                warn!(shard = %shard, error = %e, "Index serialization failed");
            }
        }

        Arc::new(envelope.index)
    }

    async fn drop_cache_entries(&self, shard: &str) {
        if let Err(e) = self.cache.invalidate(shard).await {
            warn!(shard = %shard, error = %e, "Index cache invalidation failed");
        }
    }

    /// BM25 search against the shard.
    ///
    /// Provider failures are absorbed: the shard contributes nothing and
    /// the error is logged at warn. An unindexable query (all tokens
    /// filtered out) also returns empty.
    pub async fn search(
        &self,
        shard: &str,
        query_text: &str,
        filter: &SearchFilter,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        let index = match self.get_or_build(shard).await {
            Ok(index) => index,
            Err(e) => {
                warn!(shard = %shard, error = %e, "Lexical search degraded, shard skipped");
                metrics::record_degraded("lexical");
                return Ok(Vec::new());
            }
        };

        let tokens = self.tokenizer.tokenize(query_text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        Ok(index.search(&tokens, filter, top_n, self.config.k1, self.config.b))
    }

    /// Warm the given shards. All shards are attempted; the first
    /// failure is returned after the whole pass.
    pub async fn preload(&self, shards: &[String]) -> Result<()> {
        let results = join_all(shards.iter().map(|shard| self.get_or_build(shard))).await;

        let mut first_error = None;
        for (shard, result) in shards.iter().zip(results) {
            if let Err(e) = result {
                warn!(shard = %shard, error = %e, "Index preload failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the in-memory index and all cached blobs for a shard.
    /// The next access rebuilds from the provider.
    pub async fn invalidate(&self, shard: &str) -> Result<()> {
        {
            let mut indexes = self.indexes.write().await;
            indexes.remove(shard);
        }
        self.cache.invalidate(shard).await?;
        info!(shard = %shard, "Invalidated lexical index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jurisearch_common::cache::MemoryCacheStore;
    use jurisearch_common::corpus::MemoryDocumentProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        documents: Vec<Document>,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(documents: Vec<Document>) -> Self {
            Self {
                documents,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentProvider for CountingProvider {
        async fn list_documents(&self, _shard: &str) -> Result<Vec<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent callers a chance to pile up on the lock
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.documents.clone())
        }
    }

    struct CountingTokenizer {
        inner: FrenchTokenizer,
        calls: AtomicUsize,
    }

    impl CountingTokenizer {
        fn new() -> Self {
            Self {
                inner: FrenchTokenizer::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Tokenizer for CountingTokenizer {
        fn tokenize(&self, text: &str) -> Vec<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.tokenize(text)
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("doc-1", "amortissement lineaire des immobilisations"),
            Document::new("doc-2", "provision pour depreciation des stocks"),
            Document::new("doc-3", "enregistrement des ecritures au journal"),
        ]
    }

    fn manager_with(provider: Arc<dyn DocumentProvider>) -> IndexManager {
        IndexManager::new(
            provider,
            Arc::new(MemoryCacheStore::new()),
            LexicalConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_build_once_then_reuse() {
        let provider = Arc::new(CountingProvider::new(corpus()));
        let manager = manager_with(provider.clone());

        let first = manager.get_or_build("general").await.unwrap();
        let second = manager.get_or_build("general").await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_first_access_builds_once() {
        let provider = Arc::new(CountingProvider::new(corpus()));
        let manager = manager_with(provider.clone());

        let results = join_all((0..8).map(|_| manager.get_or_build("general"))).await;

        assert_eq!(provider.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().doc_count(), 3);
        }
    }

    #[tokio::test]
    async fn test_cache_adoption_skips_rebuild() {
        let cache: Arc<dyn IndexCacheStore> = Arc::new(MemoryCacheStore::new());
        let provider: Arc<dyn DocumentProvider> = Arc::new(
            MemoryDocumentProvider::new().with_shard("general", corpus()),
        );

        let first = IndexManager::new(provider.clone(), cache.clone(), LexicalConfig::default());
        first.get_or_build("general").await.unwrap();

        // A fresh manager over the same store adopts the blob without
        // tokenizing a single document
        let tokenizer = Arc::new(CountingTokenizer::new());
        let second = IndexManager::with_tokenizer(
            provider,
            cache,
            LexicalConfig::default(),
            tokenizer.clone(),
        );
        let index = second.get_or_build("general").await.unwrap();

        assert_eq!(index.doc_count(), 3);
        assert_eq!(tokenizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_blob_triggers_rebuild() {
        let cache: Arc<dyn IndexCacheStore> = Arc::new(MemoryCacheStore::new());
        let docs = corpus();
        let fingerprint = content_fingerprint(&docs);
        cache
            .put("general", &fingerprint, b"definitely not json")
            .await
            .unwrap();

        let provider: Arc<dyn DocumentProvider> =
            Arc::new(MemoryDocumentProvider::new().with_shard("general", docs));
        let manager = IndexManager::new(provider, cache.clone(), LexicalConfig::default());

        let index = manager.get_or_build("general").await.unwrap();
        assert_eq!(index.doc_count(), 3);

        // The rebuilt blob replaced the corrupt one
        let blob = cache.get("general", &fingerprint).await.unwrap().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&blob).is_ok());
    }

    #[tokio::test]
    async fn test_empty_snapshot_not_cached() {
        let provider = Arc::new(CountingProvider::new(Vec::new()));
        let manager = manager_with(provider.clone());

        let index = manager.get_or_build("general").await.unwrap();
        assert!(index.is_empty());

        // Re-checked on next access instead of pinning the empty index
        manager.get_or_build("general").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let provider = Arc::new(CountingProvider::new(corpus()));
        let manager = manager_with(provider.clone());

        manager.get_or_build("general").await.unwrap();
        manager.invalidate("general").await.unwrap();
        manager.get_or_build("general").await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_search_absorbs_provider_failure() {
        struct FailingProvider;

        #[async_trait]
        impl DocumentProvider for FailingProvider {
            async fn list_documents(&self, shard: &str) -> Result<Vec<Document>> {
                Err(jurisearch_common::RetrievalError::ProviderUnavailable {
                    provider: "documents".to_string(),
                    message: format!("shard {} unreachable", shard),
                })
            }
        }

        let manager = manager_with(Arc::new(FailingProvider));
        let results = manager
            .search("general", "amortissement", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_returns_ranked_candidates() {
        let provider: Arc<dyn DocumentProvider> =
            Arc::new(MemoryDocumentProvider::new().with_shard("general", corpus()));
        let manager = IndexManager::new(
            provider,
            Arc::new(MemoryCacheStore::new()),
            LexicalConfig::default(),
        );

        let results = manager
            .search("general", "l'amortissement", &SearchFilter::default(), 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "doc-1");
        assert_eq!(results[0].shard, "general");
        assert!(results[0].lexical_score.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_preload_warms_all_shards() {
        let provider: Arc<dyn DocumentProvider> = Arc::new(
            MemoryDocumentProvider::new()
                .with_shard("general", corpus())
                .with_shard("partie_2", corpus()),
        );
        let cache: Arc<dyn IndexCacheStore> = Arc::new(MemoryCacheStore::new());
        let manager = IndexManager::new(provider, cache, LexicalConfig::default());

        manager
            .preload(&["general".to_string(), "partie_2".to_string()])
            .await
            .unwrap();

        assert_eq!(manager.get_or_build("general").await.unwrap().doc_count(), 3);
        assert_eq!(
            manager.get_or_build("partie_2").await.unwrap().doc_count(),
            3
        );
    }

    #[test]
    fn test_fingerprint_stability_and_sensitivity() {
        let docs = corpus();
        assert_eq!(content_fingerprint(&docs), content_fingerprint(&docs));

        let mut changed = corpus();
        changed[0].text.push_str(" annexe");
        assert_ne!(content_fingerprint(&docs), content_fingerprint(&changed));

        let mut reordered = corpus();
        reordered.reverse();
        assert_ne!(content_fingerprint(&docs), content_fingerprint(&reordered));

        // Metadata is not part of the fingerprint
        let mut meta_only = corpus();
        meta_only[0]
            .metadata
            .insert("partie".to_string(), jurisearch_common::corpus::MetaValue::Int(1));
        assert_eq!(content_fingerprint(&docs), content_fingerprint(&meta_only));
    }
}
