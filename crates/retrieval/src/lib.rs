//! JuriSearch Retrieval Core
//!
//! Hybrid retrieval over a sharded corpus:
//! - BM25 lexical search (per-shard cached indexes)
//! - Vector search (external store behind a narrow client)
//! - Score fusion (configurable normalization, weighted combination)
//! - Cross-encoder reranking of the fused head

pub mod engine;
pub mod fusion;
pub mod index;
pub mod rerank;
pub mod router;
pub mod vector;

pub use engine::HybridRetriever;
pub use fusion::{NormalizeMethod, ScoreFusion};
pub use index::{IndexManager, LexicalIndex};
pub use rerank::{MockReranker, RerankModel, Reranker};
pub use router::CollectionRouter;
pub use vector::{MemoryVectorStore, VectorHit, VectorSearchAdapter, VectorStore};

use jurisearch_common::corpus::MetaValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Scored document produced by the retrieval pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Document ID, unique within a result
    pub doc_id: String,

    /// Shard the document came from
    pub shard: String,

    /// Document text
    pub text: String,

    /// Opaque document metadata
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,

    /// BM25 score; raw until fusion, batch-normalized after
    pub lexical_score: Option<f32>,

    /// Similarity mapped into [0, 1]; batch-normalized after fusion
    pub vector_score: Option<f32>,

    /// Raw cross-encoder score for reranked candidates
    pub rerank_score: Option<f32>,

    /// Weighted combination the result is ordered by
    pub combined_score: f32,
}

/// Inclusive bounds on an integer metadata field
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Structured candidate filter
///
/// `partie` and `chapitre` address the corpus structure directly;
/// `metadata` entries are exact-equality constraints. An empty filter
/// matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict to a single partie (also routes to its shard)
    pub partie: Option<u32>,

    /// Bound the `chapitre` metadata field
    pub chapitre: Option<RangeFilter>,

    /// Exact-match metadata constraints
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,
}

impl SearchFilter {
    /// True when no constraint is set
    pub fn is_empty(&self) -> bool {
        self.partie.is_none() && self.chapitre.is_none() && self.metadata.is_empty()
    }

    /// Check a document's metadata against every constraint
    pub fn matches(&self, metadata: &HashMap<String, MetaValue>) -> bool {
        if let Some(partie) = self.partie {
            match metadata.get("partie") {
                Some(MetaValue::Int(v)) if *v == i64::from(partie) => {}
                _ => return false,
            }
        }

        if let Some(range) = &self.chapitre {
            let value = match metadata.get("chapitre") {
                Some(MetaValue::Int(v)) => *v,
                _ => return false,
            };
            if let Some(min) = range.min {
                if value < i64::from(min) {
                    return false;
                }
            }
            if let Some(max) = range.max {
                if value > i64::from(max) {
                    return false;
                }
            }
        }

        self.metadata
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Search request parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchRequest {
    /// Query text
    #[validate(length(min = 1, max = 4096))]
    pub query_text: String,

    /// Structured candidate filter
    #[serde(default)]
    pub filters: SearchFilter,

    /// Route to exactly this shard, bypassing the router heuristic
    pub shard_override: Option<String>,

    /// Maximum results to return
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_n_results")]
    pub n_results: usize,

    /// Apply the reranking pass to the fused head
    #[serde(default = "default_rerank")]
    pub rerank: bool,
}

fn default_n_results() -> usize {
    10
}

fn default_rerank() -> bool {
    true
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query_text: String::new(),
            filters: SearchFilter::default(),
            shard_override: None,
            n_results: default_n_results(),
            rerank: default_rerank(),
        }
    }
}
