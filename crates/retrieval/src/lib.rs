//! Retrieval and routing core
//!
//! Answers three questions per query, under a strict latency budget:
//! 1. Should we retrieve at all? (adaptive routing)
//! 2. If so, which passages? (hybrid dense+sparse search fused with RRF,
//!    cross-encoder reranking, quality-corrective fallback)
//! 3. How do they fit the model's context window? (token-budget packing)
//!
//! Features:
//! - Pattern-driven query classifier with a fast no-retrieval shortcut
//! - Dense ANN + sparse BM25 run concurrently, fused by Reciprocal Rank
//!   Fusion, tolerant of one backend failing
//! - Two-stage reranking with a fingerprint-keyed cache and a hard
//!   pass-through on encoder failure
//! - CRAG evaluation with query-expansion and web-search corrections
//! - Single-flight coalescing, semaphore-bounded backends, hierarchical
//!   cancellation, bounded dropping event channel
//! - Reference backends (hash embedder, in-memory ANN, Tantivy BM25,
//!   keyword cross-encoder) so the whole pipeline runs self-contained

pub mod backends;
pub mod cache;
pub mod crag;
pub mod engine;
pub mod events;
pub mod expansion;
pub mod fingerprint;
pub mod limits;
pub mod packer;
pub mod reranker;
pub mod retriever;
pub mod router;
pub mod singleflight;
pub mod stats;
mod text;
pub mod types;

pub use backends::{KeywordCrossEncoder, MemoryVectorIndex, SimpleEmbedder, TantivySparseIndex};
pub use cache::{CachedRanking, MemoryCache, RerankCache, ResultCache};
pub use crag::{synthetic_chunk, CragConfig, CragEvaluator, QualitySignals};
pub use engine::{EngineCapabilities, EngineConfig, RetrievalEngine};
pub use events::{EventSink, RetrievalEvent};
pub use expansion::{ExpandedQuery, QueryExpander};
pub use fingerprint::{normalize_query, Fingerprint};
pub use limits::ResourceLimits;
pub use packer::{pack, PackedChunks};
pub use reranker::{RerankOutcome, Reranker, RerankerConfig};
pub use retriever::{FusedCandidates, HybridRetriever, RetrieverConfig};
pub use router::{classify, Complexity, QueryClassification, RouterConfig, Strategy};
pub use singleflight::SingleFlight;
pub use stats::{MetricsSnapshot, PipelineMetrics, RetrievalStats};
pub use types::{
    Correction, CragDecision, RetrievalRequest, RetrievalResult, RetrieveOptions, RouterOverrides,
};

use thiserror::Error;

/// Retrieval pipeline errors
///
/// Non-fatal degradation (one hybrid arm down, reranker skipped) never
/// surfaces here; it is logged and reflected in [`RetrievalStats`]. The
/// error is `Clone` because single-flight followers share the leader's
/// outcome.
#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    /// Malformed request at the API boundary
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cancellation token tripped; no partial results are returned
    #[error("Cancelled")]
    Cancelled,

    /// Overall deadline exceeded; carries whatever was produced so far
    #[error("Deadline exceeded")]
    Deadline {
        partial: Option<Box<RetrievalResult>>,
    },

    /// Every backend required for the current stage failed
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<RetrievalError> for lantern_core::Error {
    fn from(err: RetrievalError) -> Self {
        lantern_core::Error::Retrieval(err.to_string())
    }
}
