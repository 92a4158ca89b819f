//! Stage events for observers
//!
//! The event-stream consumer may be slow; retrieval must never block on
//! it. Emission goes through a bounded channel with `try_send`: overflow
//! drops the event and bumps a counter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::Correction;

/// Progress events emitted by the pipeline, best-effort
#[derive(Debug, Clone, Serialize)]
pub enum RetrievalEvent {
    Classified {
        strategy: &'static str,
        reasoning: String,
    },
    CandidatesFused {
        count: usize,
        degraded: bool,
    },
    Reranked {
        count: usize,
        skipped: bool,
        cache_hit: bool,
    },
    Packed {
        count: usize,
        tokens: usize,
    },
    Evaluated {
        decision: &'static str,
        score: f32,
    },
    CorrectionApplied {
        correction: Correction,
    },
    Completed {
        chunks: usize,
        total_ms: u64,
    },
}

/// Fire-and-forget emitter over a bounded channel
pub struct EventSink {
    tx: Option<mpsc::Sender<RetrievalEvent>>,
    dropped: AtomicU64,
}

impl EventSink {
    /// Sink with a live subscriber
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<RetrievalEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Sink with no subscriber; every emit is a cheap no-op
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Emit without waiting; a full or closed channel drops the event
    pub fn emit(&self, event: RetrievalEvent) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers() {
        let (sink, mut rx) = EventSink::bounded(4);
        sink.emit(RetrievalEvent::Packed { count: 3, tokens: 120 });

        match rx.recv().await {
            Some(RetrievalEvent::Packed { count, tokens }) => {
                assert_eq!(count, 3);
                assert_eq!(tokens, 120);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (sink, _rx) = EventSink::bounded(1);
        sink.emit(RetrievalEvent::Packed { count: 1, tokens: 1 });
        sink.emit(RetrievalEvent::Packed { count: 2, tokens: 2 });
        sink.emit(RetrievalEvent::Packed { count: 3, tokens: 3 });

        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_disabled_sink_counts_nothing() {
        let sink = EventSink::disabled();
        sink.emit(RetrievalEvent::Packed { count: 1, tokens: 1 });
        assert_eq!(sink.dropped(), 0);
    }
}
