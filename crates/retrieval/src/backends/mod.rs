//! Reference backend implementations
//!
//! Self-contained implementations of the capability traits, good enough
//! to run the full pipeline locally and in tests. Production
//! deployments substitute real model servers and indices behind the
//! same traits.

pub mod embeddings;
pub mod keyword_scorer;
pub mod memory_index;
pub mod sparse;

pub use embeddings::SimpleEmbedder;
pub use keyword_scorer::KeywordCrossEncoder;
pub use memory_index::MemoryVectorIndex;
pub use sparse::{SparseConfig, TantivySparseIndex};
