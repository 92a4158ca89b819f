//! Centralized constants for the retrieval core
//!
//! Single source of truth for search-engine tuning values and operational
//! defaults used across the workspace. Deployment-specific values (index
//! paths, model endpoints) come from `Settings`; this module only holds
//! algorithm parameters and budgets.

/// Hybrid retrieval defaults
pub mod retrieval {
    /// Candidates fetched from the dense ANN pass
    pub const DENSE_TOP_K: usize = 100;

    /// Candidates fetched from the sparse BM25 pass
    pub const SPARSE_TOP_K: usize = 100;

    /// Reciprocal Rank Fusion k parameter
    ///
    /// 60 is the standard robust setting; RRF needs no score calibration
    /// between the two rankers.
    pub const RRF_K: f32 = 60.0;

    /// Default fused candidate cap handed to the reranker stage
    pub const MAX_CANDIDATES: usize = 100;

    /// BM25 term-frequency saturation
    pub const BM25_K1: f32 = 1.5;

    /// BM25 length normalization
    pub const BM25_B: f32 = 0.75;
}

/// Reranker defaults
pub mod rerank {
    /// Candidate count below which reranking is skipped
    pub const MIN_CANDIDATES: usize = 5;

    /// Query word count below which reranking is skipped
    pub const MIN_QUERY_WORDS: usize = 5;

    /// Candidates forwarded into the cross-encoder
    pub const RERANK_K: usize = 50;

    /// Pairs per cross-encoder batch
    pub const BATCH_SIZE: usize = 32;

    /// Cross-encoder scores below this are dropped
    pub const MIN_SCORE: f32 = 0.35;

    /// Cross-encoder call budget (ms); on expiry the unreranked input
    /// passes through
    pub const TIMEOUT_MS: u64 = 500;

    /// TTL for cached rankings (secs)
    pub const CACHE_TTL_SECS: u64 = 3600;
}

/// CRAG evaluator weights and thresholds
pub mod crag {
    /// Keyword-overlap signal weight
    pub const WEIGHT_KEYWORD: f32 = 0.30;

    /// Semantic-coherence signal weight
    pub const WEIGHT_COHERENCE: f32 = 0.40;

    /// Length-adequacy signal weight
    pub const WEIGHT_LENGTH: f32 = 0.15;

    /// Source-diversity signal weight
    pub const WEIGHT_DIVERSITY: f32 = 0.15;

    /// Quality strictly above this is Relevant
    pub const RELEVANT_ABOVE: f32 = 0.75;

    /// Quality at or below this is Irrelevant
    pub const IRRELEVANT_AT_OR_BELOW: f32 = 0.50;

    /// Variance cap in the coherence signal
    pub const VARIANCE_CAP: f32 = 0.3;

    /// Length adequacy expects `budget * LENGTH_EXPECTATION` tokens
    pub const LENGTH_EXPECTATION: f32 = 0.5;

    /// Sigmoid slope for score calibration around the rerank threshold
    pub const SIGMOID_SLOPE: f32 = 6.0;
}

/// Request-level defaults
pub mod request {
    /// Default token budget for packed passages
    pub const TOKEN_BUDGET: usize = 8192;

    /// Overall request deadline (ms)
    pub const TIMEOUT_MS: u64 = 30_000;

    /// TTL for cached retrieval results (secs)
    pub const RESULT_CACHE_TTL_SECS: u64 = 3600;

    /// Minimum words before retrieval is considered at all
    pub const MIN_WORDS_FOR_RETRIEVAL: usize = 2;
}

/// Shared-resource concurrency bounds
pub mod concurrency {
    /// Concurrent embedder calls
    pub const MAX_EMBEDS: usize = 4;

    /// Concurrent index searches (dense + sparse combined)
    pub const MAX_SEARCHES: usize = 8;

    /// Concurrent cross-encoder batches; each batch parallelizes
    /// internally, so this stays low
    pub const MAX_RERANK_BATCHES: usize = 2;

    /// Bounded event channel capacity; overflow drops, never blocks
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Per-stage soft latency budgets (ms); exceeding one warns, never fails
pub mod budgets {
    pub const ROUTER_MS: u64 = 5;
    pub const RETRIEVER_MS: u64 = 200;
    pub const RERANKER_MS: u64 = 500;
    pub const CRAG_MS: u64 = 1000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crag_weights_sum_to_one() {
        let sum =
            crag::WEIGHT_KEYWORD + crag::WEIGHT_COHERENCE + crag::WEIGHT_LENGTH + crag::WEIGHT_DIVERSITY;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_thresholds_ordered() {
        assert!(crag::RELEVANT_ABOVE > crag::IRRELEVANT_AT_OR_BELOW);
        assert!(rerank::MIN_SCORE > 0.0 && rerank::MIN_SCORE < 1.0);
    }

    #[test]
    fn test_rerank_fits_candidates() {
        assert!(rerank::RERANK_K <= retrieval::MAX_CANDIDATES);
    }
}
