//! Request and result types for the retrieval pipeline
//!
//! These are the named structs validated at the API boundary; nothing
//! free-form travels through the pipeline.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use lantern_config::constants::{crag, rerank, request, retrieval};

use crate::router::{QueryClassification, Strategy};
use crate::stats::RetrievalStats;
use crate::RetrievalError;

/// Recognized per-request options
///
/// Deserialized at the API boundary with unknown fields rejected, so a
/// misspelled option is an [`RetrievalError::InvalidInput`] rather than a
/// silently applied default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrieveOptions {
    /// Upper bound on the summed token counts of returned passages
    pub token_budget: usize,

    /// Candidates at the dense stage (k1)
    pub max_candidates: usize,

    /// Candidates into the reranker (k2)
    pub rerank_k: usize,

    /// Cross-encoder scores below this are dropped
    pub min_relevance: f32,

    /// Allow the CRAG web-search fallback
    pub allow_web_fallback: bool,

    /// Overall deadline (ms)
    pub timeout_ms: u64,

    /// Consult and populate the result/rerank caches
    pub use_cache: bool,

    /// Router overrides
    pub router_overrides: RouterOverrides,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            token_budget: request::TOKEN_BUDGET,
            max_candidates: retrieval::MAX_CANDIDATES,
            rerank_k: rerank::RERANK_K,
            min_relevance: rerank::MIN_SCORE,
            allow_web_fallback: false,
            timeout_ms: request::TIMEOUT_MS,
            use_cache: true,
            router_overrides: RouterOverrides::default(),
        }
    }
}

/// Router overrides carried in request options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RouterOverrides {
    /// Bypass classification and use this strategy
    pub force_strategy: Option<Strategy>,
}

/// One retrieval call
///
/// Lives for the duration of the call; the cancellation token is the
/// root of the per-request token tree.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query_text: String,
    pub options: RetrieveOptions,
    pub cancellation: CancellationToken,
}

impl RetrievalRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            options: RetrieveOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RetrieveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Boundary validation; anything that fails here is the caller's bug
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.options.rerank_k == 0 {
            return Err(RetrievalError::InvalidInput(
                "rerank_k must be at least 1".to_string(),
            ));
        }
        if self.options.max_candidates < self.options.rerank_k {
            return Err(RetrievalError::InvalidInput(format!(
                "max_candidates ({}) must be >= rerank_k ({})",
                self.options.max_candidates, self.options.rerank_k
            )));
        }
        if self.options.timeout_ms == 0 {
            return Err(RetrievalError::InvalidInput(
                "timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.options.min_relevance) {
            return Err(RetrievalError::InvalidInput(format!(
                "min_relevance must be in [0, 1], got {}",
                self.options.min_relevance
            )));
        }
        Ok(())
    }
}

/// CRAG quality verdict with its underlying score
///
/// Thresholds are fixed at evaluator construction: `Relevant` strictly
/// above 0.75, `Irrelevant` at or below 0.50, `Partial` in between
/// (0.75 itself is Partial, 0.50 itself is Irrelevant).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum CragDecision {
    Relevant { score: f32 },
    Partial { score: f32 },
    Irrelevant { score: f32 },
}

impl CragDecision {
    /// Classify a quality score against the given thresholds
    pub fn from_score(score: f32, relevant_above: f32, irrelevant_at_or_below: f32) -> Self {
        if score > relevant_above {
            Self::Relevant { score }
        } else if score > irrelevant_at_or_below {
            Self::Partial { score }
        } else {
            Self::Irrelevant { score }
        }
    }

    /// Classify with the default thresholds
    pub fn from_score_default(score: f32) -> Self {
        Self::from_score(score, crag::RELEVANT_ABOVE, crag::IRRELEVANT_AT_OR_BELOW)
    }

    pub fn score(&self) -> f32 {
        match self {
            Self::Relevant { score } | Self::Partial { score } | Self::Irrelevant { score } => {
                *score
            }
        }
    }

    pub fn is_relevant(&self) -> bool {
        matches!(self, Self::Relevant { .. })
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    pub fn is_irrelevant(&self) -> bool {
        matches!(self, Self::Irrelevant { .. })
    }

    /// Short label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Self::Relevant { .. } => "relevant",
            Self::Partial { .. } => "partial",
            Self::Irrelevant { .. } => "irrelevant",
        }
    }
}

/// Which correction the CRAG loop applied, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correction {
    /// Synonym expansion followed by one re-retrieval, merged in
    QueryExpansion,
    /// Web search hits reranked into the pool
    WebFallback,
}

/// Final output of one retrieval call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// Packed passages, sorted by score descending, no duplicate ids,
    /// summed token counts within the request budget
    pub chunks: Vec<lantern_core::ScoredChunk>,

    /// Post-correction quality verdict
    pub decision: CragDecision,

    /// How the query was classified at entry
    pub classification: QueryClassification,

    /// Per-request counters and timings, append-only
    pub stats: RetrievalStats,

    /// Set when a correction pass changed the result
    pub correction_applied: Option<Correction>,
}

impl RetrievalResult {
    /// Result for queries the router short-circuits: nothing to retrieve,
    /// so the decision is vacuously relevant.
    pub fn no_retrieval(classification: QueryClassification, stats: RetrievalStats) -> Self {
        Self {
            chunks: Vec::new(),
            decision: CragDecision::Relevant { score: 1.0 },
            classification,
            stats,
            correction_applied: None,
        }
    }

    /// Total token count of the packed passages
    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.token_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let opts = RetrieveOptions::default();
        assert_eq!(opts.token_budget, 8192);
        assert_eq!(opts.max_candidates, 100);
        assert_eq!(opts.rerank_k, 50);
        assert!(opts.use_cache);
        assert!(!opts.allow_web_fallback);
    }

    #[test]
    fn test_unknown_option_field_rejected() {
        let raw = r#"{"token_budget": 1024, "max_candidatez": 3}"#;
        let parsed: Result<RetrieveOptions, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_ks() {
        let mut req = RetrievalRequest::new("what is rrf");
        req.options.max_candidates = 10;
        req.options.rerank_k = 50;
        assert!(matches!(
            req.validate(),
            Err(RetrievalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decision_threshold_edges() {
        assert!(CragDecision::from_score_default(0.76).is_relevant());
        // Exactly 0.75 stays Partial, exactly 0.50 is Irrelevant
        assert!(CragDecision::from_score_default(0.75).is_partial());
        assert!(CragDecision::from_score_default(0.51).is_partial());
        assert!(CragDecision::from_score_default(0.50).is_irrelevant());
        assert!(CragDecision::from_score_default(0.0).is_irrelevant());
    }
}
