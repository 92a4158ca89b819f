//! Hybrid retriever
//!
//! Runs dense ANN and sparse BM25 concurrently and fuses the two
//! rankings with Reciprocal Rank Fusion. One arm failing degrades the
//! request to the surviving arm; both failing is the only hard error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lantern_config::constants::retrieval;
use lantern_config::RetrieverSettings;
use lantern_core::{Embedder, Provenance, ScoredChunk, SparseIndex, VectorIndex};

use crate::limits::ResourceLimits;
use crate::RetrievalError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates from the dense pass
    pub dense_top_k: usize,
    /// Candidates from the sparse pass
    pub sparse_top_k: usize,
    /// RRF k parameter
    pub rrf_k: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            dense_top_k: retrieval::DENSE_TOP_K,
            sparse_top_k: retrieval::SPARSE_TOP_K,
            rrf_k: retrieval::RRF_K,
        }
    }
}

impl From<&RetrieverSettings> for RetrieverConfig {
    fn from(settings: &RetrieverSettings) -> Self {
        Self {
            dense_top_k: settings.dense_top_k,
            sparse_top_k: settings.sparse_top_k,
            rrf_k: settings.rrf_k,
        }
    }
}

/// Fused candidate list plus how it was produced
#[derive(Debug, Clone)]
pub struct FusedCandidates {
    /// Deduplicated candidates, provenance `Fused`, best first
    pub chunks: Vec<ScoredChunk>,
    /// One arm failed and the other carried the request
    pub degraded: bool,
    /// Raw dense hit count
    pub dense_count: usize,
    /// Raw sparse hit count
    pub sparse_count: usize,
}

/// One search arm's outcome; `Skipped` means "not configured", which is
/// neither success nor failure
enum Arm<T> {
    Ok(T),
    Failed(String),
    Skipped,
    Cancelled,
}

/// Hybrid retriever combining dense and sparse search
pub struct HybridRetriever {
    config: RetrieverConfig,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    sparse_index: Option<Arc<dyn SparseIndex>>,
    limits: Arc<ResourceLimits>,
}

impl HybridRetriever {
    pub fn new(
        config: RetrieverConfig,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        limits: Arc<ResourceLimits>,
    ) -> Self {
        Self {
            config,
            embedder,
            vector_index,
            sparse_index: None,
            limits,
        }
    }

    /// Attach the sparse index; without one the retriever is dense-only
    pub fn with_sparse_index(mut self, index: Arc<dyn SparseIndex>) -> Self {
        self.sparse_index = Some(index);
        self
    }

    /// Produce at most `k` fused candidates for `query`
    ///
    /// Both sub-searches run concurrently under child tokens of `ct`;
    /// cancelling the parent aborts both.
    pub async fn retrieve_candidates(
        &self,
        query: &str,
        k: usize,
        ct: &CancellationToken,
    ) -> Result<FusedCandidates, RetrievalError> {
        if ct.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let embedding = self.embed_query(query, ct).await?;

        let dense_ct = ct.child_token();
        let sparse_ct = ct.child_token();

        let dense_arm = self.dense_arm(embedding.as_deref(), &dense_ct);
        let sparse_arm = self.sparse_arm(query, &sparse_ct);
        let (dense, sparse) = tokio::join!(dense_arm, sparse_arm);

        if matches!(dense, Arm::Cancelled) || matches!(sparse, Arm::Cancelled) {
            return Err(RetrievalError::Cancelled);
        }

        let (dense_hits, dense_failed) = match dense {
            Arm::Ok(hits) => (hits, false),
            Arm::Failed(reason) => {
                tracing::warn!(reason = %reason, "dense search failed, hybrid degraded");
                (Vec::new(), true)
            }
            Arm::Skipped | Arm::Cancelled => (Vec::new(), true),
        };

        let (sparse_hits, sparse_failed, sparse_skipped) = match sparse {
            Arm::Ok(hits) => (hits, false, false),
            Arm::Failed(reason) => {
                tracing::warn!(reason = %reason, "sparse search failed, hybrid degraded");
                (Vec::new(), true, false)
            }
            Arm::Skipped => (Vec::new(), false, true),
            Arm::Cancelled => (Vec::new(), true, false),
        };

        if dense_failed && (sparse_failed || sparse_skipped) {
            return Err(RetrievalError::BackendUnavailable(
                "both hybrid sub-searches failed".to_string(),
            ));
        }

        let degraded = dense_failed || sparse_failed;
        let dense_count = dense_hits.len();
        let sparse_count = sparse_hits.len();

        let ranked_ids = self.fuse(&dense_hits, &sparse_hits);

        if ct.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let chunks = self.resolve(ranked_ids, k).await;

        Ok(FusedCandidates {
            chunks,
            degraded,
            dense_count,
            sparse_count,
        })
    }

    /// Embed the query; a backend failure downgrades the dense arm
    /// instead of failing the request
    async fn embed_query(
        &self,
        query: &str,
        ct: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, RetrievalError> {
        let _permit = self.limits.acquire_embed().await?;
        tokio::select! {
            _ = ct.cancelled() => Err(RetrievalError::Cancelled),
            result = self.embedder.embed(query) => match result {
                Ok(vector) => Ok(Some(vector)),
                Err(err) => {
                    tracing::warn!(error = %err, "query embedding failed, dense arm unavailable");
                    Ok(None)
                }
            },
        }
    }

    async fn dense_arm(
        &self,
        embedding: Option<&[f32]>,
        ct: &CancellationToken,
    ) -> Arm<Vec<(String, f32)>> {
        let Some(vector) = embedding else {
            return Arm::Failed("no query embedding".to_string());
        };
        let _permit = match self.limits.acquire_search().await {
            Ok(permit) => permit,
            Err(_) => return Arm::Failed("search limiter closed".to_string()),
        };
        tokio::select! {
            _ = ct.cancelled() => Arm::Cancelled,
            result = self.vector_index.search(vector, self.config.dense_top_k) => match result {
                Ok(hits) => Arm::Ok(hits),
                Err(err) => Arm::Failed(err.to_string()),
            },
        }
    }

    async fn sparse_arm(&self, query: &str, ct: &CancellationToken) -> Arm<Vec<(String, f32)>> {
        let Some(index) = &self.sparse_index else {
            return Arm::Skipped;
        };
        let _permit = match self.limits.acquire_search().await {
            Ok(permit) => permit,
            Err(_) => return Arm::Failed("search limiter closed".to_string()),
        };
        tokio::select! {
            _ = ct.cancelled() => Arm::Cancelled,
            result = index.search(query, self.config.sparse_top_k) => match result {
                Ok(hits) => Arm::Ok(hits),
                Err(err) => Arm::Failed(err.to_string()),
            },
        }
    }

    /// Reciprocal Rank Fusion over the two hit lists
    ///
    /// Each chunk scores `sum(1 / (k_rrf + rank_i))` over the lists it
    /// appears in (1-based ranks). Ties resolve by: seen in both lists,
    /// then better dense rank, then lexicographic chunk id.
    fn fuse(&self, dense: &[(String, f32)], sparse: &[(String, f32)]) -> Vec<(String, f32)> {
        #[derive(Default)]
        struct Entry {
            dense_rank: Option<usize>,
            sparse_rank: Option<usize>,
        }

        let mut entries: HashMap<&str, Entry> = HashMap::new();

        for (rank0, (id, _)) in dense.iter().enumerate() {
            let entry = entries.entry(id.as_str()).or_default();
            let rank = rank0 + 1;
            // A repeated id within one list keeps its best rank
            if entry.dense_rank.map_or(true, |r| rank < r) {
                entry.dense_rank = Some(rank);
            }
        }
        for (rank0, (id, _)) in sparse.iter().enumerate() {
            let entry = entries.entry(id.as_str()).or_default();
            let rank = rank0 + 1;
            if entry.sparse_rank.map_or(true, |r| rank < r) {
                entry.sparse_rank = Some(rank);
            }
        }

        let rrf = |rank: Option<usize>| -> f32 {
            rank.map_or(0.0, |r| 1.0 / (self.config.rrf_k + r as f32))
        };

        let mut fused: Vec<(&str, f32, bool, usize)> = entries
            .into_iter()
            .map(|(id, entry)| {
                let score = rrf(entry.dense_rank) + rrf(entry.sparse_rank);
                let in_both = entry.dense_rank.is_some() && entry.sparse_rank.is_some();
                (id, score, in_both, entry.dense_rank.unwrap_or(usize::MAX))
            })
            .collect();

        fused.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.3.cmp(&b.3))
                .then_with(|| a.0.cmp(b.0))
        });

        fused
            .into_iter()
            .map(|(id, score, _, _)| (id.to_string(), score))
            .collect()
    }

    /// Resolve fused ids to chunk bodies, dropping anything the index
    /// no longer knows
    async fn resolve(&self, ranked: Vec<(String, f32)>, k: usize) -> Vec<ScoredChunk> {
        let mut chunks = Vec::with_capacity(k.min(ranked.len()));
        for (id, score) in ranked {
            if chunks.len() == k {
                break;
            }
            match self.vector_index.get(&id).await {
                Ok(Some(chunk)) => {
                    chunks.push(ScoredChunk::new(chunk, score, Provenance::Fused));
                }
                Ok(None) => {
                    tracing::warn!(chunk_id = %id, "fused candidate missing from index");
                }
                Err(err) => {
                    tracing::warn!(chunk_id = %id, error = %err, "chunk resolution failed");
                }
            }
        }
        chunks
    }
}
