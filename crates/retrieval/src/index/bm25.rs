//! Serializable per-shard BM25 index
//!
//! Holds the document table, an inverted postings map, and the content
//! fingerprint of the snapshot it was built from. The whole structure
//! round-trips through serde so it can live in the index cache.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{Candidate, SearchFilter};
use jurisearch_common::corpus::{Document, MetaValue};

use super::tokenizer::Tokenizer;

/// Document entry in the index table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Document ID
    pub id: String,

    /// Original text, carried for candidate construction
    pub text: String,

    /// Opaque document metadata
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,

    /// Token count after tokenization
    pub length: u32,
}

/// Posting entry: document ordinal and term frequency
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,
    pub tf: u32,
}

/// Per-shard BM25 inverted index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    shard: String,
    documents: Vec<IndexedDocument>,
    postings: HashMap<String, Vec<Posting>>,
    avg_doc_length: f32,
    fingerprint: String,
}

impl LexicalIndex {
    /// Build an index from a corpus snapshot.
    ///
    /// Postings vectors stay ordered by document ordinal because each
    /// document appends at most one entry per term, in corpus order.
    pub fn build(
        shard: &str,
        documents: &[Document],
        tokenizer: &dyn Tokenizer,
        fingerprint: String,
    ) -> Self {
        let mut table = Vec::with_capacity(documents.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_length: u64 = 0;

        for (ordinal, doc) in documents.iter().enumerate() {
            let tokens = tokenizer.tokenize(&doc.text);
            let length = tokens.len() as u32;
            total_length += u64::from(length);

            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            for (term, tf) in counts {
                postings.entry(term).or_default().push(Posting {
                    doc: ordinal as u32,
                    tf,
                });
            }

            table.push(IndexedDocument {
                id: doc.id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                length,
            });
        }

        let avg_doc_length = if table.is_empty() {
            0.0
        } else {
            total_length as f32 / table.len() as f32
        };

        Self {
            shard: shard.to_string(),
            documents: table,
            postings,
            avg_doc_length,
            fingerprint,
        }
    }

    /// Index over an empty snapshot. Never cached.
    pub fn empty(shard: &str) -> Self {
        Self {
            shard: shard.to_string(),
            documents: Vec::new(),
            postings: HashMap::new(),
            avg_doc_length: 0.0,
            fingerprint: String::new(),
        }
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Score tokenized query terms with BM25 and return the filtered top-N.
    ///
    /// `idf = ln(1 + (N - df + 0.5) / (df + 0.5))`, which never goes
    /// negative for terms present in most documents. Query terms absent
    /// from the postings map contribute nothing. Ties break by document
    /// ID so repeated searches order identically.
    pub fn search(
        &self,
        query_tokens: &[String],
        filter: &SearchFilter,
        top_n: usize,
        k1: f32,
        b: f32,
    ) -> Vec<Candidate> {
        if self.documents.is_empty() || self.avg_doc_length == 0.0 || top_n == 0 {
            return Vec::new();
        }

        // Duplicate query terms score once; first-occurrence order keeps
        // float accumulation identical across calls.
        let mut seen = HashSet::new();
        let unique_terms: Vec<&String> = query_tokens
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .collect();

        let doc_count = self.documents.len() as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in unique_terms {
            if let Some(postings) = self.postings.get(term.as_str()) {
                let df = postings.len() as f32;
                let idf = (1.0 + (doc_count - df + 0.5) / (df + 0.5)).ln();

                for posting in postings {
                    let dl = self.documents[posting.doc as usize].length as f32;
                    let tf = posting.tf as f32;
                    let tf_component =
                        tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * dl / self.avg_doc_length));
                    *scores.entry(posting.doc).or_insert(0.0) += idf * tf_component;
                }
            }
        }

        let mut ranked: Vec<(&IndexedDocument, f32)> = scores
            .into_iter()
            .map(|(ordinal, score)| (&self.documents[ordinal as usize], score))
            .filter(|(doc, _)| filter.matches(&doc.metadata))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.truncate(top_n);

        ranked
            .into_iter()
            .map(|(doc, score)| Candidate {
                doc_id: doc.id.clone(),
                shard: self.shard.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                lexical_score: Some(score),
                vector_score: None,
                rerank_score: None,
                combined_score: 0.0,
            })
            .collect()
    }
}
