//! Cache layer
//!
//! Two typed key spaces over one abstract byte cache: cross-encoder
//! rankings and whole retrieval results. The underlying cache may fail
//! silently; decode errors and dropped writes are logged and treated as
//! misses. Empty results are never written, because absence under a key
//! means "unknown", not "no results".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use lantern_core::Cache;

use crate::fingerprint::Fingerprint;
use crate::types::RetrievalResult;

/// In-memory TTL cache, last-writer-wins
///
/// The reference `Cache` implementation; production deployments can
/// substitute anything byte-oriented behind the trait.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry count, expired entries included until next touch
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some((value, expiry)) if *expiry > Instant::now() => return Some(value.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.write().remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        self.entries.write().insert(key.to_string(), (value, expiry));
    }
}

async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let bytes = cache.get(key).await?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(key, error = %err, "cache decode failed, treating as miss");
            None
        }
    }
}

async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, bytes, ttl).await,
        Err(err) => {
            tracing::warn!(key, error = %err, "cache encode failed, skipping write");
        }
    }
}

/// Cached cross-encoder ranking: post-filter `(chunk_id, score)` pairs
/// in rank order
pub type CachedRanking = Vec<(String, f32)>;

/// Typed wrapper for the reranker key space
#[derive(Clone)]
pub struct RerankCache {
    inner: Arc<dyn Cache>,
    ttl: Duration,
}

impl RerankCache {
    pub fn new(inner: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    pub async fn get(&self, key: &Fingerprint) -> Option<CachedRanking> {
        get_json(self.inner.as_ref(), &Self::namespaced(key)).await
    }

    pub async fn set(&self, key: &Fingerprint, ranking: &CachedRanking) {
        set_json(self.inner.as_ref(), &Self::namespaced(key), ranking, self.ttl).await;
    }

    fn namespaced(key: &Fingerprint) -> String {
        format!("rerank:{}", key)
    }
}

/// Typed wrapper for the retrieval-result key space
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<dyn Cache>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(inner: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    pub async fn get(&self, key: &Fingerprint) -> Option<RetrievalResult> {
        get_json(self.inner.as_ref(), &Self::namespaced(key)).await
    }

    /// Store a result; empty results are skipped by contract
    pub async fn set(&self, key: &Fingerprint, result: &RetrievalResult) {
        if result.chunks.is_empty() {
            return;
        }
        set_json(self.inner.as_ref(), &Self::namespaced(key), result, self.ttl).await;
    }

    fn namespaced(key: &Fingerprint) -> String {
        format!("retrieval:{}", key)
    }
}
