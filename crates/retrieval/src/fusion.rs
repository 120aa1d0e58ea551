//! Score fusion for hybrid retrieval
//!
//! Merges lexical and vector candidates by document identity, normalizes
//! each score family over the values present in the batch, and orders by
//! the weighted combination. BM25 scores are unbounded while vector
//! scores live in [0, 1], so families are never compared raw.

use std::collections::HashMap;
use tracing::warn;

use jurisearch_common::config::FusionConfig;

use crate::Candidate;

/// Normalization applied to each score family before weighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NormalizeMethod {
    /// `(s - min) / (max - min)`; an all-equal batch maps to 1.0
    #[default]
    MinMax,
    /// `exp(s - max) / sum(exp(s_i - max))`
    Softmax,
    /// Linear by descending rank, best = 1.0, worst = 1/n
    Rank,
}

impl NormalizeMethod {
    /// Parse a configured name, falling back to min_max
    pub fn from_name(name: &str) -> Self {
        match name {
            "min_max" => Self::MinMax,
            "softmax" => Self::Softmax,
            "rank" => Self::Rank,
            other => {
                warn!(method = other, "Unknown normalization method, using min_max");
                Self::MinMax
            }
        }
    }
}

/// Normalize a batch of scores. Input order is preserved.
pub fn normalize(scores: &[f32], method: NormalizeMethod) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    match method {
        NormalizeMethod::MinMax => {
            let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if (max - min).abs() < f32::EPSILON {
                // No spread to stretch; every member is the best observed
                return vec![1.0; scores.len()];
            }
            scores.iter().map(|s| (s - min) / (max - min)).collect()
        }
        NormalizeMethod::Softmax => {
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            exps.into_iter().map(|e| e / sum).collect()
        }
        NormalizeMethod::Rank => {
            let mut order: Vec<usize> = (0..scores.len()).collect();
            order.sort_by(|&a, &b| {
                scores[b]
                    .partial_cmp(&scores[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let n = scores.len() as f32;
            let mut out = vec![0.0; scores.len()];
            for (pos, &idx) in order.iter().enumerate() {
                out[idx] = (n - pos as f32) / n;
            }
            out
        }
    }
}

/// Normalize one score family over the candidates where it is present,
/// scattering the results back by position. Absent entries get 0.
fn normalize_family(
    candidates: &[Candidate],
    method: NormalizeMethod,
    get: impl Fn(&Candidate) -> Option<f32>,
) -> Vec<f32> {
    let mut indexed: Vec<(usize, f32)> = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        if let Some(score) = get(candidate) {
            indexed.push((i, score));
        }
    }

    let raw: Vec<f32> = indexed.iter().map(|(_, s)| *s).collect();
    let normalized = normalize(&raw, method);

    let mut out = vec![0.0; candidates.len()];
    for ((i, _), value) in indexed.into_iter().zip(normalized) {
        out[i] = value;
    }
    out
}

/// Weighted fusion of lexical and vector candidate lists
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    /// Normalization applied to each family
    pub method: NormalizeMethod,

    /// Weight for normalized BM25 scores
    pub lexical_weight: f32,

    /// Weight for normalized vector scores
    pub vector_weight: f32,
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self {
            method: NormalizeMethod::MinMax,
            lexical_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

impl ScoreFusion {
    /// Create with custom weights
    pub fn with_weights(lexical_weight: f32, vector_weight: f32) -> Self {
        Self {
            method: NormalizeMethod::MinMax,
            lexical_weight,
            vector_weight,
        }
    }

    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            method: NormalizeMethod::from_name(&config.normalize_method),
            lexical_weight: config.lexical_weight,
            vector_weight: config.vector_weight,
        }
    }

    /// Merge lexical and vector candidates and order by combined score.
    ///
    /// A document present in both lists keeps both raw scores. After
    /// this call `lexical_score` / `vector_score` hold the normalized
    /// values that entered the weighted sum; an absent family stays
    /// `None` and contributes zero. Ties break by `doc_id` so identical
    /// inputs always produce identical orderings. No truncation.
    pub fn fuse(&self, lexical: Vec<Candidate>, vector: Vec<Candidate>) -> Vec<Candidate> {
        let mut merged: HashMap<String, Candidate> = HashMap::new();

        for candidate in lexical {
            merged.insert(candidate.doc_id.clone(), candidate);
        }

        for candidate in vector {
            match merged.get_mut(&candidate.doc_id) {
                Some(existing) => {
                    existing.vector_score = candidate.vector_score;
                }
                None => {
                    merged.insert(candidate.doc_id.clone(), candidate);
                }
            }
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        // Hash order is arbitrary; pin it down before rank-sensitive
        // normalization sees the batch
        candidates.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

        let lexical_norm = normalize_family(&candidates, self.method, |c| c.lexical_score);
        let vector_norm = normalize_family(&candidates, self.method, |c| c.vector_score);

        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.lexical_score = candidate.lexical_score.map(|_| lexical_norm[i]);
            candidate.vector_score = candidate.vector_score.map(|_| vector_norm[i]);
            candidate.combined_score =
                self.lexical_weight * lexical_norm[i] + self.vector_weight * vector_norm[i];
        }

        candidates.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lexical_candidate(doc_id: &str, score: f32) -> Candidate {
        Candidate {
            doc_id: doc_id.to_string(),
            shard: "general".to_string(),
            text: format!("text for {}", doc_id),
            metadata: HashMap::new(),
            lexical_score: Some(score),
            vector_score: None,
            rerank_score: None,
            combined_score: 0.0,
        }
    }

    fn vector_candidate(doc_id: &str, score: f32) -> Candidate {
        Candidate {
            doc_id: doc_id.to_string(),
            shard: "general".to_string(),
            text: format!("text for {}", doc_id),
            metadata: HashMap::new(),
            lexical_score: None,
            vector_score: Some(score),
            rerank_score: None,
            combined_score: 0.0,
        }
    }

    #[test]
    fn test_min_max_normalization() {
        let normalized = normalize(&[1.0, 2.0, 3.0], NormalizeMethod::MinMax);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);

        // All-equal batches map to 1.0 rather than dividing by zero
        let flat = normalize(&[2.0, 2.0], NormalizeMethod::MinMax);
        assert_eq!(flat, vec![1.0, 1.0]);
    }

    #[test]
    fn test_softmax_normalization() {
        let normalized = normalize(&[1.0, 2.0, 3.0], NormalizeMethod::Softmax);
        let sum: f32 = normalized.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(normalized[2] > normalized[1]);
        assert!(normalized[1] > normalized[0]);
    }

    #[test]
    fn test_rank_normalization() {
        let normalized = normalize(&[0.5, 0.9, 0.1], NormalizeMethod::Rank);
        assert!((normalized[1] - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((normalized[2] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_name_falls_back() {
        assert_eq!(NormalizeMethod::from_name("softmax"), NormalizeMethod::Softmax);
        assert_eq!(NormalizeMethod::from_name("rank"), NormalizeMethod::Rank);
        assert_eq!(NormalizeMethod::from_name("zscore"), NormalizeMethod::MinMax);
    }

    #[test]
    fn test_fuse_favors_documents_in_both_lists() {
        let fusion = ScoreFusion::default();

        // Vector: [A 0.9, B 0.8, C 0.7], lexical: [B 0.9, A 0.7, D 0.6]
        let lexical = vec![
            lexical_candidate("b", 0.9),
            lexical_candidate("a", 0.7),
            lexical_candidate("d", 0.6),
        ];
        let vector = vec![
            vector_candidate("a", 0.9),
            vector_candidate("b", 0.8),
            vector_candidate("c", 0.7),
        ];

        let fused = fusion.fuse(lexical, vector);

        assert_eq!(fused.len(), 4);
        assert_eq!(fused[0].doc_id, "b");
        assert_eq!(fused[1].doc_id, "a");
        // B carries both normalized scores
        assert!(fused[0].lexical_score.is_some());
        assert!(fused[0].vector_score.is_some());
    }

    #[test]
    fn test_fuse_keeps_one_candidate_per_doc_id() {
        let fusion = ScoreFusion::default();
        let fused = fusion.fuse(
            vec![lexical_candidate("a", 1.0), lexical_candidate("b", 0.5)],
            vec![vector_candidate("a", 0.9)],
        );

        let mut ids: Vec<&str> = fused.iter().map(|c| c.doc_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), fused.len());
    }

    #[test]
    fn test_missing_family_stays_none_and_scores_zero() {
        let fusion = ScoreFusion::default();
        let fused = fusion.fuse(
            vec![lexical_candidate("a", 2.0), lexical_candidate("b", 1.0)],
            vec![vector_candidate("c", 0.8)],
        );

        let c = fused.iter().find(|c| c.doc_id == "c").unwrap();
        assert!(c.lexical_score.is_none());
        // Sole vector value normalizes to 1.0 under min_max
        assert_eq!(c.vector_score, Some(1.0));
        assert!((c.combined_score - 0.5).abs() < 1e-6);

        let b = fused.iter().find(|c| c.doc_id == "b").unwrap();
        assert!(b.vector_score.is_none());
        assert_eq!(b.lexical_score, Some(0.0));
        assert_eq!(b.combined_score, 0.0);
    }

    #[test]
    fn test_combined_score_non_increasing() {
        let fusion = ScoreFusion::default();
        let fused = fusion.fuse(
            vec![
                lexical_candidate("a", 3.0),
                lexical_candidate("b", 2.0),
                lexical_candidate("c", 1.0),
            ],
            vec![vector_candidate("b", 0.9), vector_candidate("d", 0.7)],
        );

        for pair in fused.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[test]
    fn test_ties_break_by_doc_id() {
        let fusion = ScoreFusion::default();
        // Two lexical-only docs with equal scores both normalize to 1.0
        let fused = fusion.fuse(
            vec![lexical_candidate("zz", 1.5), lexical_candidate("aa", 1.5)],
            Vec::new(),
        );

        assert_eq!(fused[0].doc_id, "aa");
        assert_eq!(fused[1].doc_id, "zz");
    }

    #[test]
    fn test_fuse_is_deterministic() {
        let fusion = ScoreFusion {
            method: NormalizeMethod::Rank,
            ..Default::default()
        };

        let build = || {
            (
                vec![
                    lexical_candidate("a", 1.5),
                    lexical_candidate("b", 1.5),
                    lexical_candidate("c", 0.5),
                ],
                vec![vector_candidate("b", 0.6), vector_candidate("d", 0.6)],
            )
        };

        let (l1, v1) = build();
        let (l2, v2) = build();
        let first: Vec<String> = fusion.fuse(l1, v1).into_iter().map(|c| c.doc_id).collect();
        let second: Vec<String> = fusion.fuse(l2, v2).into_iter().map(|c| c.doc_id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fuse_empty_inputs() {
        let fusion = ScoreFusion::default();
        assert!(fusion.fuse(Vec::new(), Vec::new()).is_empty());

        let vector_only = fusion.fuse(Vec::new(), vec![vector_candidate("a", 0.9)]);
        assert_eq!(vector_only.len(), 1);
        assert_eq!(vector_only[0].doc_id, "a");
    }
}
