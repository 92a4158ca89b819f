//! In-memory vector index
//!
//! Brute-force cosine search over the chunk store. Fine for corpora in
//! the tens of thousands; beyond that, put a real ANN index behind the
//! `VectorIndex` trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use lantern_core::{DocumentChunk, Embedder, Error, Result, VectorIndex};

/// Brute-force in-memory `VectorIndex`
#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: RwLock<HashMap<String, Arc<DocumentChunk>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk; it must already carry an embedding
    pub fn insert(&self, chunk: DocumentChunk) -> Result<()> {
        if chunk.embedding.is_none() {
            return Err(Error::Backend(format!(
                "chunk {} has no embedding",
                chunk.chunk_id
            )));
        }
        self.chunks
            .write()
            .insert(chunk.chunk_id.clone(), Arc::new(chunk));
        Ok(())
    }

    /// Embed and insert chunks that arrive without vectors
    pub async fn index_with(
        &self,
        embedder: &dyn Embedder,
        chunks: Vec<DocumentChunk>,
    ) -> Result<()> {
        for mut chunk in chunks {
            if chunk.embedding.is_none() {
                chunk.embedding = Some(embedder.embed(&chunk.text).await?);
            }
            self.insert(chunk)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let chunks = self.chunks.read();

        let mut scored: Vec<(String, f32)> = chunks
            .values()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                if embedding.len() != vector.len() {
                    return None;
                }
                let dot: f32 = embedding.iter().zip(vector).map(|(a, b)| a * b).sum();
                Some((chunk.chunk_id.clone(), dot))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Arc<DocumentChunk>>> {
        Ok(self.chunks.read().get(chunk_id).cloned())
    }
}
