//! Stable fingerprints for caching and single-flight
//!
//! All keys are content-addressed: normalized query text plus the
//! parameters that change the answer. Two requests that would do the
//! same work hash to the same fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::RetrieveOptions;

/// 128-bit hex fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a retrieval request: normalized query + every
    /// option that affects the produced result.
    pub fn of_request(query: &str, options: &RetrieveOptions) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update([0u8]);
        hasher.update(options.token_budget.to_le_bytes());
        hasher.update(options.max_candidates.to_le_bytes());
        hasher.update(options.rerank_k.to_le_bytes());
        hasher.update(options.min_relevance.to_le_bytes());
        hasher.update([options.allow_web_fallback as u8]);
        if let Some(strategy) = options.router_overrides.force_strategy {
            hasher.update([strategy as u8 + 1]);
        } else {
            hasher.update([0u8]);
        }
        Self(hex_lower(&hasher.finalize()[..16]))
    }

    /// Key for a cached cross-encoder ranking: normalized query, the
    /// candidate set (order-independent), and the model identity.
    pub fn of_rerank(query: &str, chunk_ids: &[&str], model_id: &str) -> Self {
        let mut sorted: Vec<&str> = chunk_ids.to_vec();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update([0u8]);
        for id in sorted {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(model_id.as_bytes());
        Self(hex_lower(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical query form: trimmed, lowercased, whitespace collapsed
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", b);
    }
    out
}
