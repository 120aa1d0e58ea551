//! Query and document tokenization
//!
//! The corpus is French legal/accounting text, so the default tokenizer
//! folds diacritics before matching. Tokenization must be identical at
//! index-build time and query time or postings lookups silently miss.

use std::sync::Arc;
use tracing::warn;

/// Stopwords dropped from both documents and queries.
///
/// Stored in folded form (no diacritics); a few English terms are
/// included because parts of the corpus carry English headings.
const STOPWORDS: &[&str] = &[
    // French
    "au", "aux", "avec", "ce", "ces", "cet", "cette", "dans", "de", "des", "donc", "du", "elle",
    "elles", "en", "entre", "est", "et", "etre", "il", "ils", "je", "la", "le", "les", "leur",
    "leurs", "lui", "mais", "meme", "ne", "ni", "nous", "on", "ont", "ou", "par", "pas", "peu",
    "plus", "pour", "que", "qui", "sa", "sans", "se", "ses", "son", "sont", "sous", "sur", "tous",
    "tout", "toute", "toutes", "tres", "un", "une", "vers", "vous",
    // English
    "and", "are", "for", "from", "the", "this", "that", "with",
];

/// Tokenizer applied to documents and queries
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Replace French diacritics and ligatures with their base letters.
/// Expects lowercased input; uppercase accents pass through untouched.
pub fn fold_diacritics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'à' | 'â' | 'ä' => out.push('a'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'î' | 'ï' => out.push('i'),
            'ô' | 'ö' => out.push('o'),
            'ù' | 'û' | 'ü' => out.push('u'),
            'ç' => out.push('c'),
            'ÿ' => out.push('y'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            _ => out.push(c),
        }
    }
    out
}

/// Default tokenizer: lowercase, fold French diacritics, split on
/// non-alphanumeric, drop one-character tokens and stopwords.
#[derive(Debug, Default, Clone)]
pub struct FrenchTokenizer;

impl FrenchTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for FrenchTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let folded = fold_diacritics(&text.to_lowercase());
        folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
            .map(|t| t.to_string())
            .collect()
    }
}

/// Plain tokenizer: lowercase and split, no folding and no stopwords.
/// Useful for corpora that are not French.
#[derive(Debug, Default, Clone)]
pub struct SimpleTokenizer;

impl SimpleTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_string())
            .collect()
    }
}

/// Create a tokenizer by configured name
pub fn create_tokenizer(name: &str) -> Arc<dyn Tokenizer> {
    match name {
        "french" => Arc::new(FrenchTokenizer::new()),
        "simple" => Arc::new(SimpleTokenizer::new()),
        other => {
            warn!("Unknown tokenizer '{}', using french", other);
            Arc::new(FrenchTokenizer::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_french_tokenizer_folds_diacritics() {
        let tokenizer = FrenchTokenizer::new();
        let tokens = tokenizer.tokenize("Écriture comptable des immobilisations");
        assert_eq!(tokens, vec!["ecriture", "comptable", "immobilisations"]);
    }

    #[test]
    fn test_french_tokenizer_splits_elisions() {
        let tokenizer = FrenchTokenizer::new();
        // "l'" splits off and is dropped as a one-character token
        let tokens = tokenizer.tokenize("l'amortissement de l'exercice");
        assert_eq!(tokens, vec!["amortissement", "exercice"]);
    }

    #[test]
    fn test_french_tokenizer_drops_stopwords() {
        let tokenizer = FrenchTokenizer::new();
        assert_eq!(
            tokenizer.tokenize("le bilan et les comptes de la clôture"),
            vec!["bilan", "comptes", "cloture"]
        );
    }

    #[test]
    fn test_ligature_folding() {
        let tokenizer = FrenchTokenizer::new();
        assert_eq!(tokenizer.tokenize("cœur"), vec!["coeur"]);
    }

    #[test]
    fn test_simple_tokenizer_keeps_stopwords() {
        let tokenizer = SimpleTokenizer::new();
        let tokens = tokenizer.tokenize("the general ledger");
        assert_eq!(tokens, vec!["the", "general", "ledger"]);
    }

    #[test]
    fn test_create_tokenizer_falls_back() {
        // Unknown names degrade to the default rather than failing
        let tokenizer = create_tokenizer("no-such-tokenizer");
        assert_eq!(tokenizer.tokenize("Société"), vec!["societe"]);
    }

    #[test]
    fn test_numbers_survive() {
        let tokenizer = FrenchTokenizer::new();
        assert_eq!(
            tokenizer.tokenize("compte 411 clients"),
            vec!["compte", "411", "clients"]
        );
    }
}
