//! Corpus data model and document providers
//!
//! Provides a unified interface for corpus sources:
//! - JSONL files (one file per shard)
//! - In-memory snapshots (fixtures, embedded corpora)

use crate::errors::{Result, RetrievalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Scalar metadata value
///
/// The retrieval core never interprets metadata beyond equality and range
/// checks during filter matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{}", v),
            MetaValue::Int(v) => write!(f, "{}", v),
            MetaValue::Float(v) => write!(f, "{}", v),
            MetaValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

/// A corpus document, immutable within a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier, unique within the corpus
    pub id: String,

    /// Full passage text
    pub text: String,

    /// Opaque pass-through metadata (partie, chapitre, article, ...)
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,
}

impl Document {
    /// Create a document without metadata
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Trait for corpus sources, one snapshot per shard
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// List all documents of a shard, in stable order
    async fn list_documents(&self, shard: &str) -> Result<Vec<Document>>;
}

/// Document provider reading one `<shard>.jsonl` file per shard
pub struct JsonlDocumentProvider {
    root: PathBuf,
}

impl JsonlDocumentProvider {
    /// Create a provider rooted at a corpus directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shard_path(&self, shard: &str) -> Result<PathBuf> {
        // Shard names come from the catalog but are also caller input via
        // overrides; reject anything that could escape the corpus root.
        if shard.is_empty()
            || !shard
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(RetrievalError::UnknownShard {
                shard: shard.to_string(),
            });
        }
        Ok(self.root.join(format!("{}.jsonl", shard)))
    }
}

#[async_trait]
impl DocumentProvider for JsonlDocumentProvider {
    async fn list_documents(&self, shard: &str) -> Result<Vec<Document>> {
        let path = self.shard_path(shard)?;
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RetrievalError::ProviderUnavailable {
                provider: "document_provider".to_string(),
                message: format!("{}: {}", path.display(), e),
            }
        })?;

        let mut documents = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let doc: Document = serde_json::from_str(line).map_err(|e| {
                RetrievalError::InvalidFormat {
                    message: format!("{} line {}: {}", path.display(), line_no + 1, e),
                }
            })?;
            documents.push(doc);
        }

        tracing::debug!(
            shard = shard,
            documents = documents.len(),
            "loaded corpus shard"
        );
        Ok(documents)
    }
}

/// In-memory document provider
///
/// Shards are stored in a sorted map and documents in insertion order, so
/// snapshots (and therefore index fingerprints) are reproducible.
#[derive(Default)]
pub struct MemoryDocumentProvider {
    shards: BTreeMap<String, Vec<Document>>,
}

impl MemoryDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shard snapshot
    pub fn with_shard(mut self, shard: impl Into<String>, documents: Vec<Document>) -> Self {
        self.shards.insert(shard.into(), documents);
        self
    }
}

#[async_trait]
impl DocumentProvider for MemoryDocumentProvider {
    async fn list_documents(&self, shard: &str) -> Result<Vec<Document>> {
        Ok(self.shards.get(shard).cloned().unwrap_or_default())
    }
}

/// Create a document provider based on configuration
pub fn create_provider(source: &str, corpus_dir: &str) -> Arc<dyn DocumentProvider> {
    match source {
        "jsonl" => Arc::new(JsonlDocumentProvider::new(corpus_dir)),
        "memory" => Arc::new(MemoryDocumentProvider::new()),
        _ => {
            tracing::warn!(source = source, "Unknown document source, using jsonl");
            Arc::new(JsonlDocumentProvider::new(corpus_dir))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_value_untagged_roundtrip() {
        let doc = Document::new("plan-1", "Plan comptable général")
            .with_meta("partie", 2i64)
            .with_meta("titre", "Comptes de capitaux")
            .with_meta("abrogé", false);

        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.get("partie"), Some(&MetaValue::Int(2)));
        assert_eq!(back, doc);
    }

    #[tokio::test]
    async fn test_memory_provider_missing_shard_is_empty() {
        let provider = MemoryDocumentProvider::new()
            .with_shard("general", vec![Document::new("a", "texte")]);

        assert_eq!(provider.list_documents("general").await.unwrap().len(), 1);
        assert!(provider.list_documents("partie_9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_provider_rejects_bad_shard_names() {
        let provider = JsonlDocumentProvider::new("/tmp/corpus");
        let err = provider.list_documents("../etc").await.unwrap_err();
        assert!(matches!(err, RetrievalError::UnknownShard { .. }));
    }

    #[tokio::test]
    async fn test_jsonl_provider_reads_lines() {
        let dir = std::env::temp_dir().join("jurisearch_corpus_test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let body = concat!(
            r#"{"id":"a1","text":"Champ d'application du droit comptable","metadata":{"partie":1}}"#,
            "\n\n",
            r#"{"id":"a2","text":"Organisation de la comptabilité"}"#,
            "\n",
        );
        tokio::fs::write(dir.join("partie_1.jsonl"), body).await.unwrap();

        let provider = JsonlDocumentProvider::new(&dir);
        let docs = provider.list_documents("partie_1").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a1");
        assert_eq!(docs[0].metadata.get("partie"), Some(&MetaValue::Int(1)));

        let err = provider.list_documents("partie_2").await.unwrap_err();
        assert!(matches!(err, RetrievalError::ProviderUnavailable { .. }));
    }
}
