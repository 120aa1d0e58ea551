//! Shard routing
//!
//! Decides which shards a query fans out to. Explicit overrides and the
//! structural `partie` filter win outright; otherwise a fixed keyword
//! heuristic separates presentation questions from accounting content.
//! The heuristic is deliberately dumb and deterministic.

use tracing::debug;

use jurisearch_common::config::ShardsConfig;
use jurisearch_common::errors::{Result, RetrievalError};

use crate::index::fold_diacritics;
use crate::SearchFilter;

/// Queries about the treaty and the institution itself, not its content
const GENERAL_KEYWORDS: &[&str] = &[
    "adoption",
    "creation",
    "histoire",
    "history",
    "institution",
    "institutions",
    "membres",
    "mission",
    "objectif",
    "objectifs",
    "ohada",
    "organisation",
    "origine",
    "overview",
    "presentation",
    "traite",
];

/// Accounting vocabulary routed straight to the content shards
const DOMAIN_KEYWORDS: &[&str] = &[
    "actif",
    "amortissement",
    "amortissements",
    "bilan",
    "charges",
    "cloture",
    "comptabilite",
    "comptable",
    "comptables",
    "compte",
    "comptes",
    "ecriture",
    "ecritures",
    "exercice",
    "immobilisation",
    "immobilisations",
    "journal",
    "passif",
    "produits",
    "provision",
    "provisions",
    "resultat",
    "stocks",
    "tresorerie",
    "tva",
];

/// Routes queries to shards from the configured catalog
#[derive(Debug, Clone)]
pub struct CollectionRouter {
    catalog: Vec<String>,
    general_shards: Vec<String>,
}

impl CollectionRouter {
    pub fn new(catalog: Vec<String>, general_shards: Vec<String>) -> Self {
        Self {
            catalog,
            general_shards,
        }
    }

    pub fn from_config(config: &ShardsConfig) -> Self {
        Self::new(config.catalog.clone(), config.general.clone())
    }

    /// All known shards
    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    fn content_shards(&self) -> Vec<String> {
        self.catalog
            .iter()
            .filter(|shard| !self.general_shards.contains(shard))
            .cloned()
            .collect()
    }

    /// Pick the shards a search fans out to. Always at least one.
    ///
    /// Precedence: explicit override, then the `partie` filter, then the
    /// keyword heuristic, then the whole catalog. Overrides and filters
    /// naming a shard outside the catalog are malformed requests and
    /// fail hard.
    pub fn select_shards(
        &self,
        query_text: &str,
        shard_override: Option<&str>,
        filter: &SearchFilter,
    ) -> Result<Vec<String>> {
        if let Some(shard) = shard_override {
            if !self.catalog.iter().any(|s| s == shard) {
                return Err(RetrievalError::UnknownShard {
                    shard: shard.to_string(),
                });
            }
            return Ok(vec![shard.to_string()]);
        }

        if let Some(partie) = filter.partie {
            let shard = format!("partie_{}", partie);
            if !self.catalog.iter().any(|s| *s == shard) {
                return Err(RetrievalError::UnknownShard { shard });
            }
            return Ok(vec![shard]);
        }

        let folded = fold_diacritics(&query_text.to_lowercase());
        let words: Vec<&str> = folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.iter().any(|w| GENERAL_KEYWORDS.contains(w)) && !self.general_shards.is_empty() {
            debug!(shards = ?self.general_shards, "Routed to general shards");
            return Ok(self.general_shards.clone());
        }

        if words.iter().any(|w| DOMAIN_KEYWORDS.contains(w)) {
            let content = self.content_shards();
            if !content.is_empty() {
                debug!(shards = ?content, "Routed to content shards");
                return Ok(content);
            }
        }

        Ok(self.catalog.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> CollectionRouter {
        CollectionRouter::new(
            vec![
                "general".to_string(),
                "partie_1".to_string(),
                "partie_2".to_string(),
                "partie_3".to_string(),
            ],
            vec!["general".to_string()],
        )
    }

    #[test]
    fn test_override_wins() {
        let shards = router()
            .select_shards("histoire de l'ohada", Some("partie_2"), &SearchFilter::default())
            .unwrap();
        assert_eq!(shards, vec!["partie_2"]);
    }

    #[test]
    fn test_unknown_override_is_hard_error() {
        let result = router().select_shards("bilan", Some("partie_9"), &SearchFilter::default());
        match result {
            Err(RetrievalError::UnknownShard { shard }) => assert_eq!(shard, "partie_9"),
            other => panic!("expected UnknownShard, got {:?}", other),
        }
    }

    #[test]
    fn test_partie_filter_routes() {
        let filter = SearchFilter {
            partie: Some(3),
            ..Default::default()
        };
        let shards = router().select_shards("une question", None, &filter).unwrap();
        assert_eq!(shards, vec!["partie_3"]);
    }

    #[test]
    fn test_unknown_partie_is_hard_error() {
        let filter = SearchFilter {
            partie: Some(7),
            ..Default::default()
        };
        assert!(router().select_shards("une question", None, &filter).is_err());
    }

    #[test]
    fn test_general_keywords_route_to_general() {
        let shards = router()
            .select_shards("Quelle est l'histoire de l'OHADA ?", None, &SearchFilter::default())
            .unwrap();
        assert_eq!(shards, vec!["general"]);
    }

    #[test]
    fn test_domain_keywords_route_to_content() {
        let shards = router()
            .select_shards(
                "comment comptabiliser un amortissement",
                None,
                &SearchFilter::default(),
            )
            .unwrap();
        assert_eq!(shards, vec!["partie_1", "partie_2", "partie_3"]);
    }

    #[test]
    fn test_accented_keywords_match() {
        let shards = router()
            .select_shards("les écritures comptables", None, &SearchFilter::default())
            .unwrap();
        assert_eq!(shards, vec!["partie_1", "partie_2", "partie_3"]);
    }

    #[test]
    fn test_no_keywords_fans_out_to_catalog() {
        let shards = router()
            .select_shards("une question sans indice", None, &SearchFilter::default())
            .unwrap();
        assert_eq!(shards.len(), 4);
    }

    #[test]
    fn test_general_beats_domain_when_both_present() {
        let shards = router()
            .select_shards(
                "presentation du plan comptable",
                None,
                &SearchFilter::default(),
            )
            .unwrap();
        assert_eq!(shards, vec!["general"]);
    }

    #[test]
    fn test_result_never_empty() {
        let empty_general = CollectionRouter::new(vec!["solo".to_string()], Vec::new());
        let shards = empty_general
            .select_shards("histoire", None, &SearchFilter::default())
            .unwrap();
        assert_eq!(shards, vec!["solo"]);
    }
}
