//! Core traits and types for the lantern retrieval core
//!
//! This crate provides foundational types used across the other crates:
//! - The document chunk data model shared by every pipeline stage
//! - Capability traits for pluggable backends (embedder, indices,
//!   cross-encoder, web search, cache)
//! - Error types
//! - Approximate token counting for text that arrives without an
//!   indexer-assigned count

pub mod chunk;
pub mod error;
pub mod tokens;
pub mod traits;

pub use chunk::{DocumentChunk, Provenance, ScoredChunk};
pub use error::{Error, Result};
pub use tokens::approximate_token_count;
pub use traits::{Cache, CrossEncoder, Embedder, SparseIndex, VectorIndex, WebHit, WebSearch};
