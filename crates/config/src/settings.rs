//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{concurrency, crag, rerank, request, retrieval};
use crate::ConfigError;

/// Main application settings
///
/// Unknown fields anywhere in the tree are a deserialization error, so a
/// typo in a config file surfaces at startup instead of silently falling
/// back to a default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Retrieval core configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

/// Retrieval core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalSettings {
    /// Router settings
    pub router: RouterSettings,

    /// Hybrid retriever settings
    pub retriever: RetrieverSettings,

    /// Reranker settings
    pub rerank: RerankSettings,

    /// CRAG evaluator settings
    pub crag: CragSettings,

    /// Shared-resource concurrency bounds
    pub limits: LimitSettings,

    /// Default token budget for packed passages
    pub token_budget: usize,

    /// Overall request deadline (ms)
    pub timeout_ms: u64,

    /// Enable the retrieval-result and rerank caches
    pub use_cache: bool,

    /// TTL for cached retrieval results (secs)
    pub result_cache_ttl_secs: u64,

    /// Bounded event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            router: RouterSettings::default(),
            retriever: RetrieverSettings::default(),
            rerank: RerankSettings::default(),
            crag: CragSettings::default(),
            limits: LimitSettings::default(),
            token_budget: request::TOKEN_BUDGET,
            timeout_ms: request::TIMEOUT_MS,
            use_cache: true,
            result_cache_ttl_secs: request::RESULT_CACHE_TTL_SECS,
            event_channel_capacity: concurrency::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterSettings {
    /// Queries shorter than this skip retrieval entirely
    pub min_words_for_retrieval: usize,

    /// Enable the MultiStep strategy
    pub enable_multi_step: bool,

    /// Enable the Graph strategy
    pub enable_graph: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            min_words_for_retrieval: request::MIN_WORDS_FOR_RETRIEVAL,
            enable_multi_step: false,
            enable_graph: false,
        }
    }
}

/// Hybrid retriever settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrieverSettings {
    /// Candidates from the dense ANN pass
    pub dense_top_k: usize,

    /// Candidates from the sparse BM25 pass
    pub sparse_top_k: usize,

    /// Fused candidate cap (k1 at the dense stage)
    pub max_candidates: usize,

    /// RRF k parameter
    pub rrf_k: f32,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            dense_top_k: retrieval::DENSE_TOP_K,
            sparse_top_k: retrieval::SPARSE_TOP_K,
            max_candidates: retrieval::MAX_CANDIDATES,
            rrf_k: retrieval::RRF_K,
        }
    }
}

/// Reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RerankSettings {
    /// Candidates forwarded into the cross-encoder (k2)
    pub rerank_k: usize,

    /// Skip reranking below this candidate count
    pub min_candidates_to_rerank: usize,

    /// Skip reranking below this query word count
    pub min_query_words_to_rerank: usize,

    /// Pairs per cross-encoder batch
    pub batch_size: usize,

    /// Cross-encoder scores below this are dropped
    pub min_rerank_score: f32,

    /// Cross-encoder call budget (ms)
    pub timeout_ms: u64,

    /// TTL for cached rankings (secs)
    pub cache_ttl_secs: u64,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            rerank_k: rerank::RERANK_K,
            min_candidates_to_rerank: rerank::MIN_CANDIDATES,
            min_query_words_to_rerank: rerank::MIN_QUERY_WORDS,
            batch_size: rerank::BATCH_SIZE,
            min_rerank_score: rerank::MIN_SCORE,
            timeout_ms: rerank::TIMEOUT_MS,
            cache_ttl_secs: rerank::CACHE_TTL_SECS,
        }
    }
}

/// CRAG evaluator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CragSettings {
    /// Quality strictly above this is Relevant
    pub relevant_above: f32,

    /// Quality at or below this is Irrelevant
    pub irrelevant_at_or_below: f32,

    /// Allow the web-search fallback for Irrelevant results
    pub allow_web_fallback: bool,
}

impl Default for CragSettings {
    fn default() -> Self {
        Self {
            relevant_above: crag::RELEVANT_ABOVE,
            irrelevant_at_or_below: crag::IRRELEVANT_AT_OR_BELOW,
            allow_web_fallback: false,
        }
    }
}

/// Shared-resource concurrency bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSettings {
    /// Concurrent embedder calls
    pub max_concurrent_embeds: usize,

    /// Concurrent index searches
    pub max_concurrent_searches: usize,

    /// Concurrent cross-encoder batches
    pub max_concurrent_rerank_batches: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_embeds: concurrency::MAX_EMBEDS,
            max_concurrent_searches: concurrency::MAX_SEARCHES,
            max_concurrent_rerank_batches: concurrency::MAX_RERANK_BATCHES,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retrieval.validate()
    }
}

impl RetrievalSettings {
    /// Validate the retrieval section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_budget == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.token_budget".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.timeout_ms".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if self.retriever.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.retriever.rrf_k".to_string(),
                message: format!("Must be positive, got {}", self.retriever.rrf_k),
            });
        }

        if self.rerank.rerank_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rerank.rerank_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.retriever.max_candidates < self.rerank.rerank_k {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.retriever.max_candidates".to_string(),
                message: format!(
                    "Must be >= rerank_k ({}), got {}",
                    self.rerank.rerank_k, self.retriever.max_candidates
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.rerank.min_rerank_score) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rerank.min_rerank_score".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.rerank.min_rerank_score),
            });
        }

        if self.rerank.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rerank.batch_size".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("retrieval.crag.relevant_above", self.crag.relevant_above),
            (
                "retrieval.crag.irrelevant_at_or_below",
                self.crag.irrelevant_at_or_below,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {}", value),
                });
            }
        }

        if self.crag.irrelevant_at_or_below >= self.crag.relevant_above {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.crag.irrelevant_at_or_below".to_string(),
                message: format!(
                    "Must be below relevant_above ({}), got {}",
                    self.crag.relevant_above, self.crag.irrelevant_at_or_below
                ),
            });
        }

        for (field, value) in [
            ("retrieval.limits.max_concurrent_embeds", self.limits.max_concurrent_embeds),
            ("retrieval.limits.max_concurrent_searches", self.limits.max_concurrent_searches),
            (
                "retrieval.limits.max_concurrent_rerank_batches",
                self.limits.max_concurrent_rerank_batches,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Must be at least 1".to_string(),
                });
            }
        }

        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.event_channel_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.retriever.max_candidates > self.retriever.dense_top_k.max(self.retriever.sparse_top_k) {
            tracing::warn!(
                max_candidates = self.retriever.max_candidates,
                dense_top_k = self.retriever.dense_top_k,
                sparse_top_k = self.retriever.sparse_top_k,
                "max_candidates exceeds both source list sizes, fusion cannot fill it"
            );
        }

        Ok(())
    }
}

/// Load settings from config files and environment variables
///
/// Sources, in increasing precedence: `config/default.{toml,yaml}`, an
/// optional environment-specific file, then `LANTERN__`-prefixed
/// environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("LANTERN")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
