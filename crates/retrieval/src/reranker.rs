//! Cross-encoder reranker
//!
//! Rescoring with a cross-encoder is the most expensive stage per
//! candidate, so it is wrapped in three protections: skip logic for
//! queries and candidate sets too small to benefit, a fingerprint-keyed
//! cache, and a hard pass-through on encoder failure or timeout. The
//! pipeline never fails because reranking failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lantern_config::constants::rerank;
use lantern_config::RerankSettings;
use lantern_core::{CrossEncoder, Provenance, ScoredChunk};

use crate::cache::{CachedRanking, RerankCache};
use crate::fingerprint::Fingerprint;
use crate::limits::ResourceLimits;
use crate::RetrievalError;

/// Reranker configuration
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Skip reranking below this candidate count
    pub min_candidates: usize,
    /// Skip reranking below this query word count
    pub min_query_words: usize,
    /// Pairs per cross-encoder batch
    pub batch_size: usize,
    /// Budget for the whole scoring pass
    pub timeout: Duration,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            min_candidates: rerank::MIN_CANDIDATES,
            min_query_words: rerank::MIN_QUERY_WORDS,
            batch_size: rerank::BATCH_SIZE,
            timeout: Duration::from_millis(rerank::TIMEOUT_MS),
        }
    }
}

impl From<&RerankSettings> for RerankerConfig {
    fn from(settings: &RerankSettings) -> Self {
        Self {
            min_candidates: settings.min_candidates_to_rerank,
            min_query_words: settings.min_query_words_to_rerank,
            batch_size: settings.batch_size,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

/// What the rerank stage did with the candidates
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Candidates, reranked or passed through
    pub chunks: Vec<ScoredChunk>,
    /// Reranking was skipped (thresholds or encoder failure)
    pub skipped: bool,
    /// The ranking came from the cache
    pub cache_hit: bool,
    /// The encoder failed and the input passed through unchanged
    pub degraded: bool,
}

impl RerankOutcome {
    fn passthrough(chunks: Vec<ScoredChunk>, degraded: bool) -> Self {
        Self {
            chunks,
            skipped: true,
            cache_hit: false,
            degraded,
        }
    }
}

/// Two-stage reranker over an external cross-encoder
pub struct Reranker {
    config: RerankerConfig,
    encoder: Arc<dyn CrossEncoder>,
    cache: Option<RerankCache>,
    limits: Arc<ResourceLimits>,
}

impl Reranker {
    pub fn new(
        config: RerankerConfig,
        encoder: Arc<dyn CrossEncoder>,
        limits: Arc<ResourceLimits>,
    ) -> Self {
        Self {
            config,
            encoder,
            cache: None,
            limits,
        }
    }

    /// Attach the ranking cache
    pub fn with_cache(mut self, cache: RerankCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Rerank `candidates` for `query`, dropping scores below
    /// `min_score` and sorting by the new scores
    ///
    /// Skip logic, the cache, and encoder-failure pass-through are all
    /// applied here; the only error a caller can see is `Cancelled`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        min_score: f32,
        use_cache: bool,
        ct: &CancellationToken,
    ) -> Result<RerankOutcome, RetrievalError> {
        if ct.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let query_words = query.split_whitespace().count();
        if candidates.len() < self.config.min_candidates
            || query_words < self.config.min_query_words
        {
            tracing::debug!(
                candidates = candidates.len(),
                query_words,
                "rerank skipped below thresholds"
            );
            return Ok(RerankOutcome::passthrough(candidates, false));
        }

        let ids: Vec<&str> = candidates.iter().map(|c| c.chunk_id()).collect();
        let key = Fingerprint::of_rerank(query, &ids, self.encoder.model_id());

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(ranking) = cache.get(&key).await {
                    return Ok(RerankOutcome {
                        chunks: apply_ranking(&candidates, &ranking),
                        skipped: false,
                        cache_hit: true,
                        degraded: false,
                    });
                }
            }
        }

        match self.score_pool(query, &candidates, ct).await? {
            Some(scores) => {
                let reranked = rank_by_scores(&candidates, &scores, min_score);
                if use_cache {
                    if let Some(cache) = &self.cache {
                        let ranking: CachedRanking = reranked
                            .iter()
                            .map(|c| (c.chunk_id().to_string(), c.score))
                            .collect();
                        cache.set(&key, &ranking).await;
                    }
                }
                Ok(RerankOutcome {
                    chunks: reranked,
                    skipped: false,
                    cache_hit: false,
                    degraded: false,
                })
            }
            None => Ok(RerankOutcome::passthrough(candidates, true)),
        }
    }

    /// Rerank a pool unconditionally (no skip logic, no cache); used by
    /// the web-fallback correction where the pool is synthetic
    ///
    /// Returns `None` when the encoder failed, so the caller can keep
    /// its uncorrected result.
    pub(crate) async fn force_rerank(
        &self,
        query: &str,
        pool: Vec<ScoredChunk>,
        min_score: f32,
        ct: &CancellationToken,
    ) -> Result<Option<Vec<ScoredChunk>>, RetrievalError> {
        match self.score_pool(query, &pool, ct).await? {
            Some(scores) => Ok(Some(rank_by_scores(&pool, &scores, min_score))),
            None => Ok(None),
        }
    }

    /// Score every `(query, text)` pair in serial batches under the
    /// stage timeout; `None` means the encoder failed or timed out
    async fn score_pool(
        &self,
        query: &str,
        candidates: &[ScoredChunk],
        ct: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, RetrievalError> {
        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (query.to_string(), c.chunk.text.clone()))
            .collect();

        let scoring = async {
            let mut scores = Vec::with_capacity(pairs.len());
            for batch in pairs.chunks(self.config.batch_size) {
                if ct.is_cancelled() {
                    return Err(RetrievalError::Cancelled);
                }
                let _permit = self.limits.acquire_rerank_batch().await?;
                let batch_scores = tokio::select! {
                    _ = ct.cancelled() => return Err(RetrievalError::Cancelled),
                    result = self.encoder.score_batch(batch) => match result {
                        Ok(scores) => scores,
                        Err(err) => {
                            return Err(RetrievalError::BackendUnavailable(err.to_string()));
                        }
                    },
                };
                if batch_scores.len() != batch.len() {
                    return Err(RetrievalError::BackendUnavailable(format!(
                        "encoder returned {} scores for {} pairs",
                        batch_scores.len(),
                        batch.len()
                    )));
                }
                scores.extend(batch_scores);
            }
            Ok(scores)
        };

        match tokio::time::timeout(self.config.timeout, scoring).await {
            Ok(Ok(scores)) => Ok(Some(scores)),
            Ok(Err(RetrievalError::Cancelled)) => Err(RetrievalError::Cancelled),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "cross-encoder failed, returning unreranked input");
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "cross-encoder timed out, returning unreranked input"
                );
                Ok(None)
            }
        }
    }
}

/// Filter by `min_score` and sort descending, advancing provenance
fn rank_by_scores(candidates: &[ScoredChunk], scores: &[f32], min_score: f32) -> Vec<ScoredChunk> {
    let mut reranked: Vec<ScoredChunk> = candidates
        .iter()
        .zip(scores)
        .filter(|(_, score)| **score >= min_score)
        .map(|(candidate, score)| candidate.rescored(*score, Provenance::Reranked))
        .collect();
    reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    reranked
}

/// Rebuild chunks from a cached ranking
fn apply_ranking(candidates: &[ScoredChunk], ranking: &CachedRanking) -> Vec<ScoredChunk> {
    let by_id: HashMap<&str, &ScoredChunk> =
        candidates.iter().map(|c| (c.chunk_id(), c)).collect();
    ranking
        .iter()
        .filter_map(|(id, score)| {
            by_id
                .get(id.as_str())
                .map(|candidate| candidate.rescored(*score, Provenance::Reranked))
        })
        .collect()
}
