//! Semaphore bounds for shared backends
//!
//! When an outer mode (council, benchmark) runs several model calls in
//! parallel, the embedder, indices, and cross-encoder are shared
//! resources. Each enforces its own bound; a request holds a permit only
//! for the duration of the guarded call.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use lantern_config::LimitSettings;

use crate::RetrievalError;

/// Per-backend concurrency bounds
pub struct ResourceLimits {
    embeds: Arc<Semaphore>,
    searches: Arc<Semaphore>,
    rerank_batches: Arc<Semaphore>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new(&LimitSettings::default())
    }
}

impl ResourceLimits {
    pub fn new(settings: &LimitSettings) -> Self {
        Self {
            embeds: Arc::new(Semaphore::new(settings.max_concurrent_embeds)),
            searches: Arc::new(Semaphore::new(settings.max_concurrent_searches)),
            rerank_batches: Arc::new(Semaphore::new(settings.max_concurrent_rerank_batches)),
        }
    }

    pub async fn acquire_embed(&self) -> Result<OwnedSemaphorePermit, RetrievalError> {
        Self::acquire(&self.embeds).await
    }

    pub async fn acquire_search(&self) -> Result<OwnedSemaphorePermit, RetrievalError> {
        Self::acquire(&self.searches).await
    }

    pub async fn acquire_rerank_batch(&self) -> Result<OwnedSemaphorePermit, RetrievalError> {
        Self::acquire(&self.rerank_batches).await
    }

    async fn acquire(semaphore: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit, RetrievalError> {
        // Acquire fails only if the semaphore is closed, which we never do
        Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RetrievalError::BackendUnavailable("resource limiter closed".to_string()))
    }
}
