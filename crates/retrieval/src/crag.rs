//! Corrective-RAG evaluator
//!
//! Scores the packed result on four signals and maps the blended
//! quality onto the accept / expand / fall-back trichotomy. The
//! evaluator itself is a pure function of its inputs and cannot fail;
//! the correction passes it triggers live in the engine.

use serde::{Deserialize, Serialize};

use lantern_config::constants::{crag, rerank};
use lantern_config::CragSettings;
use lantern_core::{DocumentChunk, ScoredChunk, WebHit};

use crate::text::{keywords, sigmoid};
use crate::types::CragDecision;

/// Evaluator configuration
#[derive(Debug, Clone)]
pub struct CragConfig {
    /// Quality strictly above this is Relevant
    pub relevant_above: f32,
    /// Quality at or below this is Irrelevant
    pub irrelevant_at_or_below: f32,
    /// Center of the score-calibration sigmoid (the rerank threshold)
    pub sigmoid_center: f32,
    /// Slope of the calibration sigmoid
    pub sigmoid_slope: f32,
    /// Cap on the variance penalty inside the coherence signal
    pub variance_cap: f32,
    /// Fraction of the budget the result is expected to fill
    pub length_expectation: f32,
}

impl Default for CragConfig {
    fn default() -> Self {
        Self {
            relevant_above: crag::RELEVANT_ABOVE,
            irrelevant_at_or_below: crag::IRRELEVANT_AT_OR_BELOW,
            sigmoid_center: rerank::MIN_SCORE,
            sigmoid_slope: crag::SIGMOID_SLOPE,
            variance_cap: crag::VARIANCE_CAP,
            length_expectation: crag::LENGTH_EXPECTATION,
        }
    }
}

impl From<&CragSettings> for CragConfig {
    fn from(settings: &CragSettings) -> Self {
        Self {
            relevant_above: settings.relevant_above,
            irrelevant_at_or_below: settings.irrelevant_at_or_below,
            ..Self::default()
        }
    }
}

/// The four weighted signals behind a quality score
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualitySignals {
    /// Query keywords covered by the passages
    pub keyword_overlap: f32,
    /// Calibrated score mean, penalized by score variance
    pub coherence: f32,
    /// Packed tokens relative to the expected share of the budget
    pub length_adequacy: f32,
    /// Distinct sources relative to passage count
    pub source_diversity: f32,
    /// Weighted blend of the four
    pub quality: f32,
}

/// CRAG quality evaluator
pub struct CragEvaluator {
    config: CragConfig,
}

impl CragEvaluator {
    pub fn new(config: CragConfig) -> Self {
        Self { config }
    }

    /// Score a packed result; infallible
    pub fn evaluate(
        &self,
        query: &str,
        chunks: &[ScoredChunk],
        token_budget: usize,
    ) -> (CragDecision, QualitySignals) {
        let keyword_overlap = self.keyword_overlap(query, chunks);
        let coherence = self.coherence(chunks);
        let length_adequacy = self.length_adequacy(chunks, token_budget);
        let source_diversity = self.source_diversity(chunks);

        let quality = crag::WEIGHT_KEYWORD * keyword_overlap
            + crag::WEIGHT_COHERENCE * coherence
            + crag::WEIGHT_LENGTH * length_adequacy
            + crag::WEIGHT_DIVERSITY * source_diversity;

        let signals = QualitySignals {
            keyword_overlap,
            coherence,
            length_adequacy,
            source_diversity,
            quality,
        };

        let decision = CragDecision::from_score(
            quality,
            self.config.relevant_above,
            self.config.irrelevant_at_or_below,
        );

        (decision, signals)
    }

    /// Fraction of query keywords present in the union of passage
    /// keywords; an empty keyword query is vacuously covered
    fn keyword_overlap(&self, query: &str, chunks: &[ScoredChunk]) -> f32 {
        let query_keywords: std::collections::HashSet<String> =
            keywords(query).into_iter().collect();
        if query_keywords.is_empty() {
            return 1.0;
        }

        let passage_keywords: std::collections::HashSet<String> = chunks
            .iter()
            .flat_map(|c| keywords(&c.chunk.text))
            .collect();

        let covered = query_keywords
            .iter()
            .filter(|kw| passage_keywords.contains(*kw))
            .count();

        covered as f32 / query_keywords.len() as f32
    }

    /// Mean of sigmoid-calibrated scores, discounted by their variance
    ///
    /// The sigmoid is centred on the rerank threshold so both raw
    /// encoder logits and fused RRF scores land inside (0, 1).
    fn coherence(&self, chunks: &[ScoredChunk]) -> f32 {
        if chunks.is_empty() {
            return 0.0;
        }

        let calibrated: Vec<f32> = chunks
            .iter()
            .map(|c| sigmoid(c.score, self.config.sigmoid_center, self.config.sigmoid_slope))
            .collect();

        let mean = calibrated.iter().sum::<f32>() / calibrated.len() as f32;
        let variance = calibrated
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f32>()
            / calibrated.len() as f32;

        mean * (1.0 - variance.min(self.config.variance_cap))
    }

    fn length_adequacy(&self, chunks: &[ScoredChunk], token_budget: usize) -> f32 {
        let expected = (token_budget as f32 * self.config.length_expectation).max(1.0);
        let total: usize = chunks.iter().map(|c| c.chunk.token_count).sum();
        (total as f32 / expected).min(1.0)
    }

    fn source_diversity(&self, chunks: &[ScoredChunk]) -> f32 {
        if chunks.is_empty() {
            return 0.0;
        }
        let unique: std::collections::HashSet<&str> = chunks
            .iter()
            .map(|c| c.chunk.source_uri.as_str())
            .collect();
        unique.len() as f32 / chunks.len() as f32
    }
}

/// Convert a web hit into a synthetic chunk for the fallback pool
///
/// The snippet is opaque text; its token count comes from the same
/// approximate counter used everywhere an indexer-assigned count is
/// missing.
pub fn synthetic_chunk(hit: &WebHit) -> DocumentChunk {
    let mut chunk = DocumentChunk::new(hit.url.clone(), (0, hit.snippet.len()), hit.snippet.clone())
        .with_language("web");
    if !hit.title.is_empty() {
        chunk.metadata.insert("title".to_string(), hit.title.clone());
    }
    chunk
}
