//! Retrieval engine
//!
//! Owns the pipeline: classify, coalesce identical in-flight requests,
//! probe the result cache, retrieve, rerank, pack, evaluate, correct.
//! Capabilities arrive through the constructor and are stored as
//! immutable handles; the single-flight map and the metrics counters
//! are the only cross-request state.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lantern_config::constants::budgets;
use lantern_config::{LimitSettings, RetrievalSettings};
use lantern_core::{
    Cache, CrossEncoder, Embedder, Provenance, ScoredChunk, SparseIndex, VectorIndex, WebSearch,
};

use crate::cache::{RerankCache, ResultCache};
use crate::crag::{synthetic_chunk, CragConfig, CragEvaluator};
use crate::events::{EventSink, RetrievalEvent};
use crate::expansion::QueryExpander;
use crate::fingerprint::Fingerprint;
use crate::limits::ResourceLimits;
use crate::packer::{pack, PackedChunks};
use crate::reranker::{Reranker, RerankerConfig};
use crate::retriever::{HybridRetriever, RetrieverConfig};
use crate::router::{classify, QueryClassification, RouterConfig, Strategy};
use crate::singleflight::SingleFlight;
use crate::stats::{MetricsSnapshot, PipelineMetrics, RetrievalStats};
use crate::types::{Correction, CragDecision, RetrievalRequest, RetrievalResult, RetrieveOptions};
use crate::RetrievalError;

/// Engine configuration, assembled from [`RetrievalSettings`] or built
/// directly in tests
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub retriever: RetrieverConfig,
    pub reranker: RerankerConfig,
    pub crag: CragConfig,
    pub limits: LimitSettings,
    /// Template for callers that do not bring their own options
    pub default_options: RetrieveOptions,
    pub result_cache_ttl: Duration,
    pub rerank_cache_ttl: Duration,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        (&RetrievalSettings::default()).into()
    }
}

impl From<&RetrievalSettings> for EngineConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            router: (&settings.router).into(),
            retriever: (&settings.retriever).into(),
            reranker: (&settings.rerank).into(),
            crag: (&settings.crag).into(),
            limits: settings.limits.clone(),
            default_options: RetrieveOptions {
                token_budget: settings.token_budget,
                max_candidates: settings.retriever.max_candidates,
                rerank_k: settings.rerank.rerank_k,
                min_relevance: settings.rerank.min_rerank_score,
                allow_web_fallback: settings.crag.allow_web_fallback,
                timeout_ms: settings.timeout_ms,
                use_cache: settings.use_cache,
                router_overrides: Default::default(),
            },
            result_cache_ttl: Duration::from_secs(settings.result_cache_ttl_secs),
            rerank_cache_ttl: Duration::from_secs(settings.rerank.cache_ttl_secs),
            event_channel_capacity: settings.event_channel_capacity,
        }
    }
}

/// The external collaborators the engine consumes
///
/// Required: embedder, vector index, cross-encoder. Optional: sparse
/// index (dense-only without), web search (no Irrelevant fallback
/// without), cache (every probe is a miss without).
pub struct EngineCapabilities {
    pub embedder: Arc<dyn Embedder>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub cross_encoder: Arc<dyn CrossEncoder>,
    pub sparse_index: Option<Arc<dyn SparseIndex>>,
    pub web_search: Option<Arc<dyn WebSearch>>,
    pub cache: Option<Arc<dyn Cache>>,
}

type SharedOutcome = Result<Arc<RetrievalResult>, RetrievalError>;

struct EngineInner {
    config: EngineConfig,
    retriever: HybridRetriever,
    reranker: Reranker,
    evaluator: CragEvaluator,
    expander: QueryExpander,
    web_search: Option<Arc<dyn WebSearch>>,
    result_cache: Option<ResultCache>,
    singleflight: SingleFlight<SharedOutcome>,
    metrics: PipelineMetrics,
    events: EventSink,
    event_rx: Mutex<Option<mpsc::Receiver<RetrievalEvent>>>,
}

/// The retrieval and routing core
pub struct RetrievalEngine {
    inner: Arc<EngineInner>,
}

impl RetrievalEngine {
    pub fn new(config: EngineConfig, capabilities: EngineCapabilities) -> Self {
        let limits = Arc::new(ResourceLimits::new(&config.limits));

        let mut retriever = HybridRetriever::new(
            config.retriever.clone(),
            capabilities.embedder,
            capabilities.vector_index,
            Arc::clone(&limits),
        );
        if let Some(sparse) = capabilities.sparse_index {
            retriever = retriever.with_sparse_index(sparse);
        }

        let mut reranker = Reranker::new(
            config.reranker.clone(),
            capabilities.cross_encoder,
            Arc::clone(&limits),
        );
        if let Some(cache) = &capabilities.cache {
            reranker =
                reranker.with_cache(RerankCache::new(Arc::clone(cache), config.rerank_cache_ttl));
        }

        let result_cache = capabilities
            .cache
            .map(|cache| ResultCache::new(cache, config.result_cache_ttl));

        let evaluator = CragEvaluator::new(config.crag.clone());
        let (events, event_rx) = EventSink::bounded(config.event_channel_capacity.max(1));

        Self {
            inner: Arc::new(EngineInner {
                retriever,
                reranker,
                evaluator,
                expander: QueryExpander::with_defaults(),
                web_search: capabilities.web_search,
                result_cache,
                singleflight: SingleFlight::new(),
                metrics: PipelineMetrics::default(),
                events,
                event_rx: Mutex::new(Some(event_rx)),
                config,
            }),
        }
    }

    /// Options template derived from the engine's settings
    pub fn default_options(&self) -> RetrieveOptions {
        self.inner.config.default_options.clone()
    }

    /// Take the stage-event stream; `None` after the first call
    pub fn subscribe(&self) -> Option<mpsc::Receiver<RetrievalEvent>> {
        self.inner.event_rx.lock().take()
    }

    /// Engine-wide counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Events dropped because the subscriber was slow
    pub fn events_dropped(&self) -> u64 {
        self.inner.events.dropped()
    }

    /// The primary operation: answer a retrieval request
    pub async fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> Result<RetrievalResult, RetrievalError> {
        request.validate()?;

        let inner = &self.inner;
        PipelineMetrics::incr(&inner.metrics.requests);
        let started = Instant::now();

        // Stage 1: router. Pure pattern matching, no backend touches.
        let classification = match request.options.router_overrides.force_strategy {
            Some(strategy) => QueryClassification {
                strategy,
                ..classify(&request.query_text, &inner.config.router)
            },
            None => classify(&request.query_text, &inner.config.router),
        };
        let router_ms = started.elapsed().as_millis() as u64;
        if router_ms > budgets::ROUTER_MS {
            tracing::warn!(router_ms, "router exceeded its soft budget");
        }
        inner.events.emit(RetrievalEvent::Classified {
            strategy: strategy_name(classification.strategy),
            reasoning: classification.reasoning.clone(),
        });

        if classification.strategy == Strategy::NoRetrieve {
            PipelineMetrics::incr(&inner.metrics.no_retrieve);
            let stats = RetrievalStats {
                router_ms,
                total_ms: started.elapsed().as_millis() as u64,
                ..RetrievalStats::default()
            };
            let result = RetrievalResult::no_retrieval(classification, stats);
            inner.events.emit(RetrievalEvent::Completed {
                chunks: 0,
                total_ms: result.stats.total_ms,
            });
            return Ok(result);
        }

        // Stages 2..: coalesced per fingerprint. The leader runs the
        // pipeline; identical concurrent requests share its outcome.
        let fingerprint = Fingerprint::of_request(&request.query_text, &request.options);
        let ct = request.cancellation.clone();
        let work_inner = Arc::clone(inner);
        let work_request = request.clone();
        let work_classification = classification.clone();

        let flight = inner.singleflight.run(fingerprint.clone(), Some(&ct), move || {
            async move {
                work_inner
                    .execute(work_request, work_classification, fingerprint, started)
                    .await
                    .map(Arc::new)
            }
            .boxed()
        });

        let Some((outcome, leader)) = flight.await else {
            PipelineMetrics::incr(&inner.metrics.cancelled);
            return Err(RetrievalError::Cancelled);
        };
        if !leader {
            PipelineMetrics::incr(&inner.metrics.coalesced);
        }

        match outcome {
            Ok(result) => Ok(result.as_ref().clone()),
            Err(err) => {
                match &err {
                    RetrievalError::Cancelled => PipelineMetrics::incr(&inner.metrics.cancelled),
                    RetrievalError::Deadline { .. } => {
                        PipelineMetrics::incr(&inner.metrics.deadline_exceeded)
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }
}

impl EngineInner {
    /// Leader path: cache probe, then the full pipeline
    async fn execute(
        self: Arc<Self>,
        request: RetrievalRequest,
        classification: QueryClassification,
        fingerprint: Fingerprint,
        started: Instant,
    ) -> Result<RetrievalResult, RetrievalError> {
        let opts = request.options.clone();
        let ct = request.cancellation.clone();
        let query = request.query_text.clone();
        let deadline = started + Duration::from_millis(opts.timeout_ms);

        let mut stats = RetrievalStats::default();

        if opts.use_cache {
            if let Some(cache) = &self.result_cache {
                if let Some(mut hit) = cache.get(&fingerprint).await {
                    PipelineMetrics::incr(&self.metrics.result_cache_hits);
                    hit.stats.result_cache_hit = true;
                    hit.stats.total_ms = started.elapsed().as_millis() as u64;
                    self.events.emit(RetrievalEvent::Completed {
                        chunks: hit.chunks.len(),
                        total_ms: hit.stats.total_ms,
                    });
                    return Ok(hit);
                }
            }
        }

        // Stage 2: hybrid retrieval
        if ct.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }
        let stage_start = Instant::now();
        let fused = match tokio::time::timeout_at(
            deadline,
            self.retriever
                .retrieve_candidates(&query, opts.max_candidates, &ct),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(self.deadline_error(&query, Vec::new(), &opts, &classification, stats, started))
            }
        };
        stats.retriever_ms = stage_start.elapsed().as_millis() as u64;
        if stats.retriever_ms > budgets::RETRIEVER_MS {
            tracing::warn!(retriever_ms = stats.retriever_ms, "retriever exceeded its soft budget");
        }
        stats.dense_candidates = fused.dense_count;
        stats.sparse_candidates = fused.sparse_count;
        stats.fused_candidates = fused.chunks.len();
        stats.degraded = fused.degraded;
        if fused.degraded {
            PipelineMetrics::incr(&self.metrics.degraded);
        }
        self.events.emit(RetrievalEvent::CandidatesFused {
            count: fused.chunks.len(),
            degraded: fused.degraded,
        });

        // Stage 3: rerank the top k2
        let rerank_input: Vec<ScoredChunk> =
            fused.chunks.iter().take(opts.rerank_k).cloned().collect();
        let stage_start = Instant::now();
        let outcome = match tokio::time::timeout_at(
            deadline,
            self.reranker
                .rerank(&query, rerank_input, opts.min_relevance, opts.use_cache, &ct),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(self.deadline_error(
                    &query,
                    fused.chunks,
                    &opts,
                    &classification,
                    stats,
                    started,
                ))
            }
        };
        stats.rerank_ms = stage_start.elapsed().as_millis() as u64;
        if stats.rerank_ms > budgets::RERANKER_MS {
            tracing::warn!(rerank_ms = stats.rerank_ms, "reranker exceeded its soft budget");
        }
        stats.rerank_skipped = outcome.skipped;
        stats.rerank_cache_hit = outcome.cache_hit;
        if outcome.cache_hit {
            PipelineMetrics::incr(&self.metrics.rerank_cache_hits);
        }
        if outcome.degraded {
            stats.degraded = true;
            PipelineMetrics::incr(&self.metrics.degraded);
        }
        self.events.emit(RetrievalEvent::Reranked {
            count: outcome.chunks.len(),
            skipped: outcome.skipped,
            cache_hit: outcome.cache_hit,
        });

        // Stage 4: pack to budget
        let packed = pack(outcome.chunks, opts.token_budget);
        stats.packer_dropped = packed.dropped;
        stats.packed_tokens = packed.total_tokens;
        self.events.emit(RetrievalEvent::Packed {
            count: packed.chunks.len(),
            tokens: packed.total_tokens,
        });

        // Stage 5: evaluate and, at most once, correct
        let stage_start = Instant::now();
        let (decision, _signals) = self.evaluator.evaluate(&query, &packed.chunks, opts.token_budget);
        self.events.emit(RetrievalEvent::Evaluated {
            decision: decision.label(),
            score: decision.score(),
        });

        let (packed, decision, correction) = if decision.is_relevant() {
            (packed, decision, None)
        } else if Instant::now() >= deadline {
            return Err(self.deadline_error(&query, packed.chunks, &opts, &classification, stats, started));
        } else if decision.is_partial() {
            self.expansion_correction(&query, &opts, packed, decision, &mut stats, deadline, &ct)
                .await?
        } else {
            self.web_correction(&query, &opts, packed, decision, &mut stats, deadline, &ct)
                .await?
        };

        stats.crag_ms = stage_start.elapsed().as_millis() as u64;
        if stats.crag_ms > budgets::CRAG_MS {
            tracing::warn!(crag_ms = stats.crag_ms, "evaluator exceeded its soft budget");
        }
        if let Some(applied) = correction {
            PipelineMetrics::incr(&self.metrics.corrections_applied);
            self.events.emit(RetrievalEvent::CorrectionApplied { correction: applied });
        }

        stats.total_ms = started.elapsed().as_millis() as u64;

        let result = RetrievalResult {
            chunks: packed.chunks,
            decision,
            classification,
            stats,
            correction_applied: correction,
        };

        debug_assert!(result.total_tokens() <= opts.token_budget);

        if opts.use_cache {
            if let Some(cache) = &self.result_cache {
                cache.set(&fingerprint, &result).await;
            }
        }

        self.events.emit(RetrievalEvent::Completed {
            chunks: result.chunks.len(),
            total_ms: result.stats.total_ms,
        });

        Ok(result)
    }

    /// Partial verdict: expand the query and run the pipeline once more,
    /// merging the two result sets with a preference for higher scores
    #[allow(clippy::too_many_arguments)]
    async fn expansion_correction(
        &self,
        query: &str,
        opts: &RetrieveOptions,
        packed: PackedChunks,
        decision: CragDecision,
        stats: &mut RetrievalStats,
        deadline: Instant,
        ct: &CancellationToken,
    ) -> Result<(PackedChunks, CragDecision, Option<Correction>), RetrievalError>
    {
        let expanded = self.expander.expand(query);
        if !expanded.was_expanded() {
            return Ok((packed, decision, None));
        }
        stats.correction_attempted = true;

        let second_pass = async {
            let fused = self
                .retriever
                .retrieve_candidates(&expanded.expanded, opts.max_candidates, ct)
                .await?;
            let rerank_input: Vec<ScoredChunk> =
                fused.chunks.into_iter().take(opts.rerank_k).collect();
            let outcome = self
                .reranker
                .rerank(
                    &expanded.expanded,
                    rerank_input,
                    opts.min_relevance,
                    opts.use_cache,
                    ct,
                )
                .await?;
            Ok::<Vec<ScoredChunk>, RetrievalError>(pack(outcome.chunks, opts.token_budget).chunks)
        };

        let second = match tokio::time::timeout_at(deadline, second_pass).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(RetrievalError::Cancelled)) => return Err(RetrievalError::Cancelled),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "query expansion pass failed, keeping original result");
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
            Err(_) => {
                tracing::warn!("query expansion pass hit the deadline, keeping original result");
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
        };

        let pre_ids: std::collections::HashSet<String> = packed
            .chunks
            .iter()
            .map(|c| c.chunk_id().to_string())
            .collect();

        let merged = merge_preferring_higher(packed.chunks.clone(), second);
        let repacked = pack(merged, opts.token_budget);

        // A correction that adds nothing to the final packing is a no-op
        // and is discarded outright
        let brings_new = repacked
            .chunks
            .iter()
            .any(|c| !pre_ids.contains(c.chunk_id()));
        if !brings_new && !packed.chunks.is_empty() {
            stats.correction_discarded = true;
            return Ok((packed, decision, None));
        }

        let (new_decision, _) = self
            .evaluator
            .evaluate(query, &repacked.chunks, opts.token_budget);

        Ok((repacked, new_decision, Some(Correction::QueryExpansion)))
    }

    /// Irrelevant verdict: pull web results into the pool, rerank the
    /// union, repack. Disabled or failing web search keeps the original.
    #[allow(clippy::too_many_arguments)]
    async fn web_correction(
        &self,
        query: &str,
        opts: &RetrieveOptions,
        packed: PackedChunks,
        decision: CragDecision,
        stats: &mut RetrievalStats,
        deadline: Instant,
        ct: &CancellationToken,
    ) -> Result<(PackedChunks, CragDecision, Option<Correction>), RetrievalError>
    {
        let Some(web) = &self.web_search else {
            return Ok((packed, decision, None));
        };
        if !opts.allow_web_fallback {
            return Ok((packed, decision, None));
        }
        stats.correction_attempted = true;

        let search = async {
            tokio::select! {
                _ = ct.cancelled() => Err(RetrievalError::Cancelled),
                hits = web.search(query) => {
                    hits.map_err(|e| RetrievalError::BackendUnavailable(e.to_string()))
                }
            }
        };

        let hits = match tokio::time::timeout_at(deadline, search).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(RetrievalError::Cancelled)) => return Err(RetrievalError::Cancelled),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "web fallback failed, keeping original result");
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
            Err(_) => {
                tracing::warn!("web fallback hit the deadline, keeping original result");
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
        };

        if hits.is_empty() {
            stats.correction_discarded = true;
            return Ok((packed, decision, None));
        }

        let mut pool = packed.chunks.clone();
        let known: std::collections::HashSet<String> =
            pool.iter().map(|c| c.chunk_id().to_string()).collect();
        for hit in &hits {
            let chunk = synthetic_chunk(hit);
            if !known.contains(&chunk.chunk_id) {
                pool.push(ScoredChunk::new(Arc::new(chunk), 0.0, Provenance::Web));
            }
        }

        let rerank = self
            .reranker
            .force_rerank(query, pool, opts.min_relevance, ct);
        let reranked = match tokio::time::timeout_at(deadline, rerank).await {
            Ok(Ok(Some(chunks))) => chunks,
            Ok(Ok(None)) => {
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                tracing::warn!("web fallback rerank hit the deadline, keeping original result");
                stats.correction_discarded = true;
                return Ok((packed, decision, None));
            }
        };

        let repacked = pack(reranked, opts.token_budget);
        let (new_decision, _) = self
            .evaluator
            .evaluate(query, &repacked.chunks, opts.token_budget);

        Ok((repacked, new_decision, Some(Correction::WebFallback)))
    }

    /// Build the Deadline error, packaging whatever was produced so far
    fn deadline_error(
        &self,
        query: &str,
        best_chunks: Vec<ScoredChunk>,
        opts: &RetrieveOptions,
        classification: &QueryClassification,
        mut stats: RetrievalStats,
        started: Instant,
    ) -> RetrievalError {
        tracing::warn!(timeout_ms = opts.timeout_ms, "request deadline exceeded");

        let packed = pack(best_chunks, opts.token_budget);
        stats.packed_tokens = packed.total_tokens;
        stats.total_ms = started.elapsed().as_millis() as u64;

        let partial = if packed.chunks.is_empty() {
            None
        } else {
            let (decision, _) = self.evaluator.evaluate(query, &packed.chunks, opts.token_budget);
            Some(Box::new(RetrievalResult {
                chunks: packed.chunks,
                decision,
                classification: classification.clone(),
                stats,
                correction_applied: None,
            }))
        };

        RetrievalError::Deadline { partial }
    }
}

/// Union two result sets by chunk id, keeping the higher-scoring copy,
/// sorted by score descending
fn merge_preferring_higher(
    first: Vec<ScoredChunk>,
    second: Vec<ScoredChunk>,
) -> Vec<ScoredChunk> {
    let mut by_id: std::collections::HashMap<String, ScoredChunk> = std::collections::HashMap::new();
    for chunk in first.into_iter().chain(second) {
        match by_id.entry(chunk.chunk_id().to_string()) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if chunk.score > slot.get().score {
                    slot.insert(chunk);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(chunk);
            }
        }
    }
    let mut merged: Vec<ScoredChunk> = by_id.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id().cmp(b.chunk_id())));
    merged
}

fn strategy_name(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::NoRetrieve => "no_retrieve",
        Strategy::Single => "single",
        Strategy::MultiStep => "multi_step",
        Strategy::Graph => "graph",
    }
}
