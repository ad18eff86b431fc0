use std::collections::HashSet;

use async_trait::async_trait;

use super::{RerankError, RerankModel};
use crate::capability::Capability;
use crate::store::chunk::tokenize;

/// Dependency-free relevance model: the share of distinct query terms found in
/// the document, with a bonus when the whole query appears verbatim.
///
/// Scores fall in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapModel;

const PHRASE_BONUS: f32 = 0.2;

impl TermOverlapModel {
    pub fn new() -> Self {
        Self
    }

    pub fn score_sync(&self, query: &str, document: &str) -> f32 {
        let terms: HashSet<String> = tokenize(query).collect();
        if terms.is_empty() {
            return 0.0;
        }
        let doc_terms: HashSet<String> = tokenize(document).collect();
        let matched = terms.iter().filter(|t| doc_terms.contains(*t)).count();
        let coverage = matched as f32 / terms.len() as f32;

        let phrase = query.trim().to_lowercase();
        let bonus = if !phrase.is_empty() && document.to_lowercase().contains(&phrase) {
            PHRASE_BONUS
        } else {
            0.0
        };
        (coverage * (1.0 - PHRASE_BONUS) + bonus).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl RerankModel for TermOverlapModel {
    async fn score(&self, query: &str, document: &str) -> Result<Capability<f32>, RerankError> {
        Ok(Capability::Ready(self.score_sync(query, document)))
    }

    fn name(&self) -> &str {
        "term-overlap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_overlap_scores() {
        let model = TermOverlapModel::new();
        assert_eq!(model.score_sync("", "anything"), 0.0);
        assert_eq!(model.score_sync("hash password", "fn unrelated() {}"), 0.0);

        let half = model.score_sync("hash password", "fn hash(x: u8) {}");
        assert!((half - 0.4).abs() < 1e-6);

        let full = model.score_sync("hash password", "def hash_password(p): # hash password");
        assert!((full - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_model_is_always_ready() {
        let score = TermOverlapModel.score("login", "def login(): pass").await.unwrap();
        assert!(score.is_ready());
    }
}
