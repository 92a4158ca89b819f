//! Token-budget packer
//!
//! Selects passages from the ranked list until the budget is spent,
//! preserving the reranker's relevance order. The walk never reorders:
//! a chunk that does not fit the remaining budget is dropped, and the
//! walk continues, so a large relevant chunk is always considered before
//! any smaller, less relevant one.

use lantern_core::ScoredChunk;

/// Outcome of a packing pass
#[derive(Debug, Clone)]
pub struct PackedChunks {
    /// Selected passages, original order preserved
    pub chunks: Vec<ScoredChunk>,
    /// Chunks dropped because they did not fit the remaining budget
    pub dropped: usize,
    /// Token total of the selection
    pub total_tokens: usize,
}

/// Pack `ranked` into `budget` tokens
///
/// The first chunk is always included when it fits; if the top-ranked
/// chunk alone exceeds the budget the result is empty (the evaluator
/// downstream reads that as Irrelevant).
pub fn pack(ranked: Vec<ScoredChunk>, budget: usize) -> PackedChunks {
    if let Some(first) = ranked.first() {
        if first.chunk.token_count > budget {
            let dropped = ranked.len();
            return PackedChunks {
                chunks: Vec::new(),
                dropped,
                total_tokens: 0,
            };
        }
    }

    let mut remaining = budget;
    let mut chunks = Vec::with_capacity(ranked.len());
    let mut dropped = 0usize;

    for scored in ranked {
        let tokens = scored.chunk.token_count;
        if tokens <= remaining {
            remaining -= tokens;
            chunks.push(scored);
        } else {
            dropped += 1;
        }
    }

    PackedChunks {
        total_tokens: budget - remaining,
        chunks,
        dropped,
    }
}
