//! Deterministic hash embeddings
//!
//! No model involved: each word hashes into a bucket of the output
//! vector, so texts sharing vocabulary land near each other under
//! cosine similarity. Deterministic across processes, which the
//! retrieval-result cache relies on in tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use lantern_core::{Embedder, Result};

/// Hash-bucket embedder
pub struct SimpleEmbedder {
    dim: usize,
}

impl Default for SimpleEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl SimpleEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Synchronous embedding used by both the trait impl and indexing
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dim as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_normalized() {
        let embedder = SimpleEmbedder::default();
        let v = embedder.embed_sync("reciprocal rank fusion");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_deterministic() {
        let embedder = SimpleEmbedder::default();
        assert_eq!(embedder.embed_sync("same text"), embedder.embed_sync("same text"));
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = SimpleEmbedder::default();
        let a = embedder.embed_sync("rust borrow checker lifetimes");
        let b = embedder.embed_sync("rust borrow checker rules");
        let c = embedder.embed_sync("gradient descent optimizer momentum");

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = SimpleEmbedder::default();
        let v = embedder.embed_sync("");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
