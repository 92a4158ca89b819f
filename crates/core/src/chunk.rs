//! Document chunk data model
//!
//! Chunks are built offline by the indexer and are read-only during query
//! serving. Every pipeline stage that rescores a chunk produces a fresh
//! `ScoredChunk` wrapping the same shared body; upstream values are never
//! mutated in place.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A passage of a source document, as produced by the offline indexer
///
/// `chunk_id` is content-addressed: the same `source_uri` and byte range
/// always hash to the same id, so duplicates collapse across retrieval
/// sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    /// Stable hash of `source_uri` + `byte_range`
    pub chunk_id: String,
    /// Where the chunk came from (file path, URL, ...)
    pub source_uri: String,
    /// Byte range within the source document
    pub byte_range: (usize, usize),
    /// Chunk text
    pub text: String,
    /// Token count under the model-side tokenizer (>= 1)
    pub token_count: usize,
    /// Language tag ("en", "rust", "web", ...)
    pub language: String,
    /// Dense embedding, L2-normalized; dimension is uniform per index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    /// Build a chunk, deriving `chunk_id` and falling back to an
    /// approximate token count when the indexer did not supply one.
    pub fn new(source_uri: impl Into<String>, byte_range: (usize, usize), text: impl Into<String>) -> Self {
        let source_uri = source_uri.into();
        let text = text.into();
        let chunk_id = Self::compute_id(&source_uri, byte_range);
        let token_count = crate::tokens::approximate_token_count(&text);

        Self {
            chunk_id,
            source_uri,
            byte_range,
            text,
            token_count,
            language: "en".to_string(),
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    /// Override the token count (indexer-supplied, model tokenizer)
    pub fn with_token_count(mut self, token_count: usize) -> Self {
        self.token_count = token_count.max(1);
        self
    }

    /// Set the language tag
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Attach an embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Content-addressed chunk id: first 128 bits of
    /// SHA-256(source_uri, byte_range), hex-encoded.
    pub fn compute_id(source_uri: &str, byte_range: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_uri.as_bytes());
        hasher.update(byte_range.0.to_le_bytes());
        hasher.update(byte_range.1.to_le_bytes());
        let digest = hasher.finalize();
        hex_lower(&digest[..16])
    }
}

/// Which pipeline stage produced a score
///
/// Provenance only ever advances: Dense/Sparse -> Fused -> Reranked.
/// Web chunks enter the pool late and go straight to Reranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Dense,
    Sparse,
    Fused,
    Reranked,
    Web,
}

/// A chunk with a score attached by one pipeline stage
///
/// Scores are only comparable within a single provenance. The chunk body
/// is shared; rescoring allocates a new `ScoredChunk`, not a new chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    /// Shared chunk body
    pub chunk: Arc<DocumentChunk>,
    /// Stage score, higher is better
    pub score: f32,
    /// Stage that assigned the score
    pub provenance: Provenance,
}

impl ScoredChunk {
    pub fn new(chunk: Arc<DocumentChunk>, score: f32, provenance: Provenance) -> Self {
        Self {
            chunk,
            score,
            provenance,
        }
    }

    /// Produce a rescored copy sharing the same chunk body
    pub fn rescored(&self, score: f32, provenance: Provenance) -> Self {
        Self {
            chunk: Arc::clone(&self.chunk),
            score,
            provenance,
        }
    }

    /// Shorthand for the shared chunk id
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", b);
    }
    out
}
