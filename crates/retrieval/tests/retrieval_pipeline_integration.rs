//! Integration tests for the retrieval pipeline (router -> hybrid
//! retrieval -> rerank -> pack -> CRAG)
//!
//! These tests run the whole engine against the in-process reference
//! backends, plus stubs where a scenario needs exact control over
//! backend behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lantern_core::{
    Cache, CrossEncoder, DocumentChunk, Embedder, Provenance, SparseIndex, VectorIndex, WebHit,
    WebSearch,
};
use lantern_retrieval::{
    Correction, EngineCapabilities, EngineConfig, KeywordCrossEncoder, MemoryCache,
    MemoryVectorIndex, RetrievalEngine, RetrievalRequest, RetrieveOptions, RetrievalError,
    SimpleEmbedder, Strategy, TantivySparseIndex,
};

fn chunk(source: &str, text: &str) -> DocumentChunk {
    DocumentChunk::new(source, (0, text.len()), text)
}

/// Small mixed corpus used by most scenarios
fn retrieval_corpus() -> Vec<DocumentChunk> {
    vec![
        chunk(
            "docs/rrf.md",
            "Reciprocal Rank Fusion (RRF) combines ranked lists from dense and sparse retrievers without score calibration",
        ),
        chunk(
            "docs/bm25.md",
            "BM25 weighs term frequency against document length to estimate lexical relevance",
        ),
        chunk(
            "docs/cache.md",
            "The result cache stores serialized payloads with a time to live",
        ),
        chunk(
            "docs/packer.md",
            "The budget packer selects passages in priority order until the token budget is spent",
        ),
        chunk(
            "docs/router.md",
            "The router classifies queries before any heavy backend is touched",
        ),
        chunk(
            "docs/crag.md",
            "Quality evaluation blends keyword coverage with score coherence",
        ),
    ]
}

async fn populated_index(embedder: &SimpleEmbedder, corpus: &[DocumentChunk]) -> MemoryVectorIndex {
    let index = MemoryVectorIndex::new();
    index
        .index_with(embedder, corpus.to_vec())
        .await
        .expect("corpus indexing");
    index
}

/// Engine over the reference backends, optionally with sparse search,
/// a cache, and a web collaborator
async fn build_engine(
    corpus: &[DocumentChunk],
    config: EngineConfig,
    with_sparse: bool,
    cache: Option<Arc<dyn Cache>>,
    web: Option<Arc<dyn WebSearch>>,
    encoder: Option<Arc<dyn CrossEncoder>>,
) -> RetrievalEngine {
    let embedder = SimpleEmbedder::default();
    let vector_index = populated_index(&embedder, corpus).await;

    let sparse_index: Option<Arc<dyn SparseIndex>> = if with_sparse {
        let sparse = TantivySparseIndex::new(Default::default()).expect("sparse index");
        sparse.index_chunks(corpus).expect("sparse indexing");
        Some(Arc::new(sparse))
    } else {
        None
    };

    RetrievalEngine::new(
        config,
        EngineCapabilities {
            embedder: Arc::new(embedder),
            vector_index: Arc::new(vector_index),
            cross_encoder: encoder.unwrap_or_else(|| Arc::new(KeywordCrossEncoder::new())),
            sparse_index,
            web_search: web,
            cache,
        },
    )
}

fn request(query: &str, options: RetrieveOptions) -> RetrievalRequest {
    RetrievalRequest::new(query).with_options(options)
}

fn small_budget_options() -> RetrieveOptions {
    RetrieveOptions {
        token_budget: 64,
        ..RetrieveOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Scenario: greeting shortcut
// ---------------------------------------------------------------------------

/// Counting wrappers to prove which capabilities were touched
struct CountingEmbedder {
    inner: SimpleEmbedder,
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> lantern_core::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.embed(text).await
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }
}

struct CountingVectorIndex {
    inner: MemoryVectorIndex,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorIndex for CountingVectorIndex {
    async fn search(&self, vector: &[f32], k: usize) -> lantern_core::Result<Vec<(String, f32)>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(vector, k).await
    }

    async fn get(&self, chunk_id: &str) -> lantern_core::Result<Option<Arc<DocumentChunk>>> {
        self.inner.get(chunk_id).await
    }
}

struct CountingSparseIndex {
    inner: TantivySparseIndex,
    searches: AtomicUsize,
}

#[async_trait]
impl SparseIndex for CountingSparseIndex {
    async fn search(&self, query: &str, k: usize) -> lantern_core::Result<Vec<(String, f32)>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, k).await
    }
}

struct CountingEncoder {
    inner: KeywordCrossEncoder,
    batches: AtomicUsize,
}

#[async_trait]
impl CrossEncoder for CountingEncoder {
    async fn score_batch(&self, pairs: &[(String, String)]) -> lantern_core::Result<Vec<f32>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.score_batch(pairs).await
    }

    fn model_id(&self) -> &str {
        "counting-encoder"
    }
}

struct CountingBackends {
    engine: RetrievalEngine,
    embedder_calls: Arc<CountingEmbedder>,
    vector: Arc<CountingVectorIndex>,
    sparse: Arc<CountingSparseIndex>,
    encoder: Arc<CountingEncoder>,
}

async fn counting_engine(embed_delay: Duration) -> CountingBackends {
    let corpus = retrieval_corpus();
    let plain = SimpleEmbedder::default();

    let embedder = Arc::new(CountingEmbedder {
        inner: SimpleEmbedder::default(),
        calls: AtomicUsize::new(0),
        delay: embed_delay,
    });
    let vector = Arc::new(CountingVectorIndex {
        inner: populated_index(&plain, &corpus).await,
        searches: AtomicUsize::new(0),
    });
    let tantivy = TantivySparseIndex::new(Default::default()).expect("sparse index");
    tantivy.index_chunks(&corpus).expect("sparse indexing");
    let sparse = Arc::new(CountingSparseIndex {
        inner: tantivy,
        searches: AtomicUsize::new(0),
    });
    let encoder = Arc::new(CountingEncoder {
        inner: KeywordCrossEncoder::new(),
        batches: AtomicUsize::new(0),
    });

    let engine = RetrievalEngine::new(
        EngineConfig::default(),
        EngineCapabilities {
            embedder: Arc::clone(&embedder) as Arc<dyn Embedder>,
            vector_index: Arc::clone(&vector) as Arc<dyn VectorIndex>,
            cross_encoder: Arc::clone(&encoder) as Arc<dyn CrossEncoder>,
            sparse_index: Some(Arc::clone(&sparse) as Arc<dyn SparseIndex>),
            web_search: None,
            cache: None,
        },
    );

    CountingBackends {
        engine,
        embedder_calls: embedder,
        vector,
        sparse,
        encoder,
    }
}

#[tokio::test]
async fn test_greeting_shortcut_touches_no_backend() {
    let backends = counting_engine(Duration::ZERO).await;

    let result = backends
        .engine
        .retrieve(request("hello", small_budget_options()))
        .await
        .unwrap();

    assert!(result.chunks.is_empty());
    assert_eq!(result.classification.strategy, Strategy::NoRetrieve);
    assert!(result.decision.is_relevant());
    assert!(result.correction_applied.is_none());

    assert_eq!(backends.embedder_calls.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backends.vector.searches.load(Ordering::SeqCst), 0);
    assert_eq!(backends.sparse.searches.load(Ordering::SeqCst), 0);
    assert_eq!(backends.encoder.batches.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Scenario: clean hit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_clean_hit_top_chunk_reranked_and_relevant() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        None,
        None,
    )
    .await;

    let result = engine
        .retrieve(request(
            "how does reciprocal rank fusion work",
            small_budget_options(),
        ))
        .await
        .unwrap();

    assert!(!result.chunks.is_empty());
    assert_eq!(result.chunks[0].chunk.source_uri, "docs/rrf.md");
    assert_eq!(result.chunks[0].provenance, Provenance::Reranked);
    assert!(result.decision.is_relevant(), "decision: {:?}", result.decision);
    assert!(result.correction_applied.is_none());
    assert!(!result.stats.rerank_skipped);
}

// ---------------------------------------------------------------------------
// Scenario: rerank skip for a one-word query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_word_query_skips_rerank_and_keeps_fused_order() {
    let mut config = EngineConfig::default();
    config.router.min_words_for_retrieval = 1;

    let engine = build_engine(&retrieval_corpus(), config, true, None, None, None).await;

    let result = engine
        .retrieve(request("cache", RetrieveOptions::default()))
        .await
        .unwrap();

    assert!(result.stats.rerank_skipped);
    assert!(!result.chunks.is_empty());
    // Pass-through keeps the fused scores, so provenance never advanced
    assert!(result.chunks.iter().all(|c| c.provenance == Provenance::Fused));
    // Fused output order is score-descending; the packer preserved it
    for pair in result.chunks.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

// ---------------------------------------------------------------------------
// Scenario: Partial verdict recovers through query expansion
// ---------------------------------------------------------------------------

/// Scores depend on whether the query has been expanded, steering the
/// first pass into the Partial band and the second into Relevant
struct PhaseEncoder;

#[async_trait]
impl CrossEncoder for PhaseEncoder {
    async fn score_batch(&self, pairs: &[(String, String)]) -> lantern_core::Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(query, passage)| {
                let expanded = query.contains("asynchronous");
                if passage.contains("asynchronous") {
                    if expanded {
                        0.95
                    } else {
                        0.0
                    }
                } else if passage.contains("async") {
                    0.5
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        "phase-encoder"
    }
}

#[tokio::test]
async fn test_partial_verdict_recovers_through_expansion() {
    let corpus = vec![
        chunk("docs/a.md", "async function design patterns with futures"),
        chunk(
            "docs/b.md",
            "asynchronous non-blocking function patterns explain event loop design",
        ),
        chunk("docs/f1.md", "the tokenizer splits source text into terms"),
        chunk("docs/f2.md", "metrics counters are plain atomics"),
        chunk("docs/f3.md", "the scheduler parks idle worker threads"),
        chunk("docs/f4.md", "configuration files layer over defaults"),
    ];

    let engine = build_engine(
        &corpus,
        EngineConfig::default(),
        false,
        None,
        None,
        Some(Arc::new(PhaseEncoder)),
    )
    .await;

    let result = engine
        .retrieve(request(
            "explain async function design patterns",
            small_budget_options(),
        ))
        .await
        .unwrap();

    assert_eq!(result.correction_applied, Some(Correction::QueryExpansion));
    assert!(result.decision.is_relevant(), "decision: {:?}", result.decision);
    assert!(result.stats.correction_attempted);

    // The expansion pulled in a chunk the first pass never surfaced
    assert!(result
        .chunks
        .iter()
        .any(|c| c.chunk.source_uri == "docs/b.md"));
}

// ---------------------------------------------------------------------------
// Scenario: Irrelevant with web fallback disabled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_irrelevant_without_fallback_returns_unchanged() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        None,
        None,
    )
    .await;

    let result = engine
        .retrieve(request(
            "weather in Reykjavik tomorrow",
            RetrieveOptions::default(),
        ))
        .await
        .unwrap();

    assert!(result.decision.is_irrelevant(), "decision: {:?}", result.decision);
    assert!(result.correction_applied.is_none());
}

// ---------------------------------------------------------------------------
// Scenario: Irrelevant with web fallback enabled
// ---------------------------------------------------------------------------

struct StubWebSearch {
    hits: Vec<WebHit>,
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn search(&self, _query: &str) -> lantern_core::Result<Vec<WebHit>> {
        Ok(self.hits.clone())
    }
}

#[tokio::test]
async fn test_irrelevant_recovers_through_web_fallback() {
    let web = Arc::new(StubWebSearch {
        hits: vec![
            WebHit {
                url: "https://weather.example/reykjavik".to_string(),
                title: "Reykjavik forecast".to_string(),
                snippet: "Reykjavik weather tomorrow rain likely with highs of eight degrees"
                    .to_string(),
            },
            WebHit {
                url: "https://news.example/iceland".to_string(),
                title: "Iceland weather".to_string(),
                snippet: "Tomorrow in Reykjavik expect rain and wind with cool weather".to_string(),
            },
        ],
    });

    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        Some(web as Arc<dyn WebSearch>),
        None,
    )
    .await;

    let options = RetrieveOptions {
        token_budget: 64,
        allow_web_fallback: true,
        ..RetrieveOptions::default()
    };

    let result = engine
        .retrieve(request("weather in Reykjavik tomorrow", options))
        .await
        .unwrap();

    assert_eq!(result.correction_applied, Some(Correction::WebFallback));
    assert!(!result.chunks.is_empty());
    assert!(result.chunks.iter().any(|c| c.chunk.language == "web"));
    assert!(result.stats.correction_attempted);
}

// ---------------------------------------------------------------------------
// Law: single-flight coalescing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_flight_coalesces_identical_requests() {
    let backends = counting_engine(Duration::from_millis(30)).await;

    let options = RetrieveOptions {
        token_budget: 64,
        use_cache: false,
        ..RetrieveOptions::default()
    };

    let mut calls = Vec::new();
    for _ in 0..8 {
        let options = options.clone();
        calls.push(
            backends
                .engine
                .retrieve(request("how does reciprocal rank fusion work", options)),
        );
    }

    let results = futures::future::join_all(calls).await;

    let first = results[0].as_ref().expect("first result");
    for result in &results {
        let result = result.as_ref().expect("coalesced result");
        assert_eq!(result.chunks, first.chunks);
        assert_eq!(result.decision, first.decision);
    }

    assert_eq!(backends.embedder_calls.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backends.vector.searches.load(Ordering::SeqCst), 1);
    assert_eq!(backends.sparse.searches.load(Ordering::SeqCst), 1);
    assert_eq!(backends.encoder.batches.load(Ordering::SeqCst), 1);
    assert_eq!(backends.engine.metrics().coalesced, 7);
}

// ---------------------------------------------------------------------------
// Law: cache idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_result_cache_idempotence() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        Some(cache),
        None,
        None,
    )
    .await;

    let query = "how does reciprocal rank fusion work";

    let first = engine
        .retrieve(request(query, small_budget_options()))
        .await
        .unwrap();
    assert!(!first.stats.result_cache_hit);

    let second = engine
        .retrieve(request(query, small_budget_options()))
        .await
        .unwrap();
    assert!(second.stats.result_cache_hit);
    assert_eq!(first.chunks, second.chunks);
    assert_eq!(engine.metrics().result_cache_hits, 1);
}

// ---------------------------------------------------------------------------
// Result invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_result_invariants_hold() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        None,
        None,
    )
    .await;

    let budget = 40;
    let options = RetrieveOptions {
        token_budget: budget,
        ..RetrieveOptions::default()
    };

    let result = engine
        .retrieve(request("how does reciprocal rank fusion work", options))
        .await
        .unwrap();

    // Budget invariant
    assert!(result.total_tokens() <= budget);

    // No duplicate chunk ids
    let mut ids: Vec<&str> = result.chunks.iter().map(|c| c.chunk_id()).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before);

    // Scores non-increasing
    for pair in result.chunks.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zero_budget_yields_empty_irrelevant() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        None,
        None,
    )
    .await;

    let options = RetrieveOptions {
        token_budget: 0,
        ..RetrieveOptions::default()
    };

    let result = engine
        .retrieve(request("how does reciprocal rank fusion work", options))
        .await
        .unwrap();

    assert!(result.chunks.is_empty());
    assert!(result.decision.is_irrelevant());
}

#[tokio::test]
async fn test_inverted_candidate_bounds_are_invalid_input() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        false,
        None,
        None,
        None,
    )
    .await;

    let options = RetrieveOptions {
        max_candidates: 10,
        rerank_k: 50,
        ..RetrieveOptions::default()
    };

    let err = engine
        .retrieve(request("how does reciprocal rank fusion work", options))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::InvalidInput(_)));
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> lantern_core::Result<Vec<f32>> {
        Err(lantern_core::Error::Backend("embedder offline".to_string()))
    }

    fn dim(&self) -> usize {
        384
    }
}

#[tokio::test]
async fn test_one_failed_arm_degrades_instead_of_failing() {
    let corpus = retrieval_corpus();
    let plain = SimpleEmbedder::default();
    let vector_index = populated_index(&plain, &corpus).await;
    let sparse = TantivySparseIndex::new(Default::default()).expect("sparse index");
    sparse.index_chunks(&corpus).expect("sparse indexing");

    let engine = RetrievalEngine::new(
        EngineConfig::default(),
        EngineCapabilities {
            embedder: Arc::new(FailingEmbedder),
            vector_index: Arc::new(vector_index),
            cross_encoder: Arc::new(KeywordCrossEncoder::new()),
            sparse_index: Some(Arc::new(sparse)),
            web_search: None,
            cache: None,
        },
    );

    let result = engine
        .retrieve(request(
            "how does reciprocal rank fusion work",
            small_budget_options(),
        ))
        .await
        .unwrap();

    assert!(result.stats.degraded);
    assert!(!result.chunks.is_empty(), "sparse arm should still produce candidates");
}

#[tokio::test]
async fn test_both_arms_failing_is_backend_unavailable() {
    let corpus = retrieval_corpus();
    let plain = SimpleEmbedder::default();
    let vector_index = populated_index(&plain, &corpus).await;

    // Failing embedder and no sparse index: nothing can serve the query
    let engine = RetrievalEngine::new(
        EngineConfig::default(),
        EngineCapabilities {
            embedder: Arc::new(FailingEmbedder),
            vector_index: Arc::new(vector_index),
            cross_encoder: Arc::new(KeywordCrossEncoder::new()),
            sparse_index: None,
            web_search: None,
            cache: None,
        },
    );

    let err = engine
        .retrieve(request(
            "how does reciprocal rank fusion work",
            RetrieveOptions::default(),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::BackendUnavailable(_)));
}

// ---------------------------------------------------------------------------
// Cancellation and deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pre_cancelled_request_short_circuits() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        false,
        None,
        None,
        None,
    )
    .await;

    let token = CancellationToken::new();
    token.cancel();

    let err = engine
        .retrieve(
            request("how does reciprocal rank fusion work", RetrieveOptions::default())
                .with_cancellation(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::Cancelled));
}

#[tokio::test]
async fn test_deadline_surfaces_as_deadline_error() {
    let backends = counting_engine(Duration::from_millis(200)).await;

    let options = RetrieveOptions {
        timeout_ms: 20,
        ..RetrieveOptions::default()
    };

    let err = backends
        .engine
        .retrieve(request("how does reciprocal rank fusion work", options))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::Deadline { .. }));
    assert_eq!(backends.engine.metrics().deadline_exceeded, 1);
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_event_stream_reports_stages() {
    let engine = build_engine(
        &retrieval_corpus(),
        EngineConfig::default(),
        true,
        None,
        None,
        None,
    )
    .await;

    let mut events = engine.subscribe().expect("first subscriber");

    engine
        .retrieve(request(
            "how does reciprocal rank fusion work",
            small_budget_options(),
        ))
        .await
        .unwrap();

    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        labels.push(format!("{:?}", event));
    }

    assert!(labels.iter().any(|l| l.starts_with("Classified")));
    assert!(labels.iter().any(|l| l.starts_with("CandidatesFused")));
    assert!(labels.iter().any(|l| l.starts_with("Completed")));
}
