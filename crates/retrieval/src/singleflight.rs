//! Per-fingerprint single-flight coalescing
//!
//! At most one computation is in flight per fingerprint. The first
//! arrival inserts a shared future and does the work; later arrivals
//! clone the handle and await the same outcome. Entries are removed on
//! completion, so a request arriving after the result is delivered
//! computes fresh (the result cache covers that window).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::fingerprint::Fingerprint;

type SharedWork<V> = Shared<BoxFuture<'static, V>>;

/// Fingerprint-keyed single-flight map
///
/// `V` must be `Clone` because every coalesced caller receives its own
/// copy of the outcome; in practice it is `Result<Arc<_>, _>`.
pub struct SingleFlight<V: Clone> {
    inflight: Mutex<HashMap<Fingerprint, SharedWork<V>>>,
    coalesced: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Run `work` under the fingerprint, or join a flight already in
    /// progress. Returns the outcome and whether this caller led it;
    /// `None` means a coalesced caller abandoned the wait because
    /// `wait_cancel` tripped.
    ///
    /// The leader always drives the flight to completion — its own
    /// cancellation is the work's business, checked inside the future —
    /// so the map never holds an undriven entry.
    pub async fn run<F>(
        &self,
        fingerprint: Fingerprint,
        wait_cancel: Option<&CancellationToken>,
        work: F,
    ) -> Option<(V, bool)>
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let (shared, leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&fingerprint) {
                Some(existing) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    (existing.clone(), false)
                }
                None => {
                    let shared = work().shared();
                    inflight.insert(fingerprint.clone(), shared.clone());
                    (shared, true)
                }
            }
        };

        let value = if leader {
            shared.clone().await
        } else {
            match wait_cancel {
                Some(token) => {
                    tokio::select! {
                        value = shared.clone() => value,
                        _ = token.cancelled() => return None,
                    }
                }
                None => shared.clone().await,
            }
        };

        // Whoever finishes first clears the entry; `ptr_eq` protects a
        // newer flight that may have been inserted under the same key.
        {
            let mut inflight = self.inflight.lock();
            if inflight
                .get(&fingerprint)
                .map_or(false, |existing| existing.ptr_eq(&shared))
            {
                inflight.remove(&fingerprint);
            }
        }

        Some((value, leader))
    }

    /// Callers that joined an existing flight instead of starting one
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Flights currently in progress
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}
