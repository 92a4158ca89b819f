//! Capability traits for pluggable backends
//!
//! The retrieval core consumes every heavy dependency through one of
//! these traits and receives the handles at construction time. Reference
//! implementations live in `lantern-retrieval::backends`; production
//! deployments swap in real model servers and indices.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::chunk::DocumentChunk;
use crate::error::Result;

/// Produces dense query/passage embeddings
///
/// Vectors are assumed L2-normalized; the dimension is fixed per index.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension
    fn dim(&self) -> usize;
}

/// Approximate nearest-neighbor search over dense vectors
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k by vector similarity, as `(chunk_id, score)` pairs
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    /// Resolve a chunk body by id
    async fn get(&self, chunk_id: &str) -> Result<Option<Arc<DocumentChunk>>>;
}

/// Lexical search with BM25 semantics over an inverted index
#[async_trait]
pub trait SparseIndex: Send + Sync {
    /// Top-k by BM25, as `(chunk_id, score)` pairs
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>>;
}

/// Cross-encoder that jointly attends over `(query, passage)` pairs
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score a batch of `(query, passage)` pairs; the encoder may
    /// parallelize internally but the call is one unit of work
    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;

    /// Stable model identifier, part of the rerank cache key
    fn model_id(&self) -> &str;
}

/// A single web search hit
#[derive(Debug, Clone)]
pub struct WebHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Optional web-search collaborator used by the CRAG fallback
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<WebHit>>;
}

/// Get/set cache with TTL
///
/// The cache is allowed to fail silently: `get` returning `None` means
/// "unknown", and a dropped `set` only costs a recomputation. Callers
/// must never treat cache absence as an empty result.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
}
