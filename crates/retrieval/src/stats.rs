//! Per-request stats and engine-wide metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters and timings collected over one retrieval call
///
/// Append-only: stages fill in their own fields and never rewrite what
/// an earlier stage recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalStats {
    /// Candidates returned by the dense pass
    pub dense_candidates: usize,

    /// Candidates returned by the sparse pass
    pub sparse_candidates: usize,

    /// Candidates after RRF fusion and dedup
    pub fused_candidates: usize,

    /// One hybrid arm failed and the other carried the request
    pub degraded: bool,

    /// Reranking was skipped (below thresholds, or encoder failed)
    pub rerank_skipped: bool,

    /// The rerank cache served the ranking
    pub rerank_cache_hit: bool,

    /// The whole result came from the retrieval-result cache
    pub result_cache_hit: bool,

    /// A CRAG correction was attempted (not necessarily applied)
    pub correction_attempted: bool,

    /// The attempted correction failed or was a no-op and was discarded
    pub correction_discarded: bool,

    /// Chunks dropped by the packer for budget reasons
    pub packer_dropped: usize,

    /// Token total of the packed passages
    pub packed_tokens: usize,

    /// Stage timings (ms)
    pub router_ms: u64,
    pub retriever_ms: u64,
    pub rerank_ms: u64,
    pub crag_ms: u64,
    pub total_ms: u64,
}

/// Engine-wide counters, shared across requests
///
/// Plain atomics; this is the only cross-request mutable state besides
/// the single-flight map and the external cache.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub requests: AtomicU64,
    pub no_retrieve: AtomicU64,
    pub result_cache_hits: AtomicU64,
    pub rerank_cache_hits: AtomicU64,
    pub coalesced: AtomicU64,
    pub degraded: AtomicU64,
    pub corrections_applied: AtomicU64,
    pub deadline_exceeded: AtomicU64,
    pub cancelled: AtomicU64,
}

impl PipelineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            no_retrieve: self.no_retrieve.load(Ordering::Relaxed),
            result_cache_hits: self.result_cache_hits.load(Ordering::Relaxed),
            rerank_cache_hits: self.rerank_cache_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            corrections_applied: self.corrections_applied.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub no_retrieve: u64,
    pub result_cache_hits: u64,
    pub rerank_cache_hits: u64,
    pub coalesced: u64,
    pub degraded: u64,
    pub corrections_applied: u64,
    pub deadline_exceeded: u64,
    pub cancelled: u64,
}
