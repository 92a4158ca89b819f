//! Keyword-overlap cross-encoder
//!
//! TF-IDF-flavored lexical scorer standing in for a real cross-encoder:
//! term frequency with diminishing returns, word length as an IDF
//! proxy, a position boost for early query terms, and a coverage bonus,
//! squashed into [0, 1]. Deterministic, so cached rankings are stable.

use async_trait::async_trait;

use lantern_core::{CrossEncoder, Result};

use crate::text::STOPWORDS;

/// Lexical reference `CrossEncoder`
#[derive(Default)]
pub struct KeywordCrossEncoder;

impl KeywordCrossEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Score one query/passage pair
    pub fn score(query: &str, passage: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let passage_lower = passage.to_lowercase();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 1 && !STOPWORDS.contains(*w))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let passage_words: Vec<&str> = passage_lower.split_whitespace().collect();
        let passage_len = passage_words.len().max(1) as f32;

        let mut total = 0.0f32;
        let mut matched = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = passage_words.iter().filter(|w| **w == *term).count() as f32;
            if tf > 0.0 {
                matched += 1;

                let tf_score = tf.sqrt();
                let idf_approx = (1.0 + term.len() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                let length_norm = 1.0 / (1.0 + (passage_len / 50.0).sqrt());

                total += tf_score * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched as f32 / query_terms.len() as f32;
        let raw = total + coverage * 0.3;

        (raw / (raw + 1.0)).min(1.0)
    }
}

#[async_trait]
impl CrossEncoder for KeywordCrossEncoder {
    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(query, passage)| Self::score(query, passage))
            .collect())
    }

    fn model_id(&self) -> &str {
        "keyword-overlap-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_passage_outscores_irrelevant() {
        let query = "reciprocal rank fusion";
        let relevant = "Reciprocal Rank Fusion (RRF) combines ranked lists";
        let irrelevant = "boil the pasta in salted water for nine minutes";

        assert!(
            KeywordCrossEncoder::score(query, relevant)
                > KeywordCrossEncoder::score(query, irrelevant)
        );
    }

    #[test]
    fn test_scores_bounded() {
        let score = KeywordCrossEncoder::score(
            "rank rank rank rank",
            &"rank ".repeat(200),
        );
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_stopword_only_query_scores_zero() {
        assert_eq!(KeywordCrossEncoder::score("the of and", "anything"), 0.0);
    }

    #[tokio::test]
    async fn test_batch_scores_align_with_pairs() {
        let encoder = KeywordCrossEncoder::new();
        let pairs = vec![
            ("fusion".to_string(), "rank fusion".to_string()),
            ("fusion".to_string(), "unrelated".to_string()),
        ];
        let scores = encoder.score_batch(&pairs).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
