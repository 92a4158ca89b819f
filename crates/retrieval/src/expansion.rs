//! Query expansion for the CRAG Partial correction
//!
//! Expands queries with synonyms from a static, language-neutral
//! mapping. Ships with defaults for common programming and systems
//! vocabulary; deployments extend the table from configuration.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::text::STOPWORDS;

/// Default synonym table for programming/systems terms
fn default_synonyms() -> HashMap<String, Vec<String>> {
    let entries: &[(&str, &[&str])] = &[
        ("async", &["asynchronous", "concurrent", "non-blocking"]),
        ("sync", &["synchronous", "blocking"]),
        ("error", &["failure", "fault", "exception"]),
        ("bug", &["defect", "fault"]),
        ("cache", &["caching", "memoization"]),
        ("config", &["configuration", "settings"]),
        ("function", &["method", "routine", "procedure"]),
        ("db", &["database", "datastore"]),
        ("vector", &["embedding", "dense"]),
        ("search", &["retrieval", "lookup", "query"]),
        ("speed", &["performance", "latency", "throughput"]),
        ("fast", &["quick", "performant", "low-latency"]),
        ("memory", &["ram", "allocation", "heap"]),
        ("thread", &["concurrency", "parallelism"]),
        ("auth", &["authentication", "authorization"]),
        ("deploy", &["deployment", "release", "rollout"]),
        ("test", &["testing", "verification"]),
        ("log", &["logging", "trace"]),
        ("queue", &["buffer", "channel"]),
        ("server", &["service", "daemon", "backend"]),
    ];

    entries
        .iter()
        .map(|(term, synonyms)| {
            (
                (*term).to_string(),
                synonyms.iter().map(|s| (*s).to_string()).collect(),
            )
        })
        .collect()
}

/// Result of expanding a query
#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    /// The query as given
    pub original: String,
    /// Original query with synonym terms appended
    pub expanded: String,
    /// The terms that were added
    pub added_terms: Vec<String>,
}

impl ExpandedQuery {
    pub fn was_expanded(&self) -> bool {
        !self.added_terms.is_empty()
    }
}

/// Synonym-table query expander
pub struct QueryExpander {
    synonyms: RwLock<HashMap<String, Vec<String>>>,
    /// Cap on synonyms appended per query term
    max_expansions_per_term: usize,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl QueryExpander {
    /// Expander preloaded with the shipped programming/systems table
    pub fn with_defaults() -> Self {
        Self {
            synonyms: RwLock::new(default_synonyms()),
            max_expansions_per_term: 3,
        }
    }

    /// Empty expander; every expansion is a no-op until synonyms are added
    pub fn empty() -> Self {
        Self {
            synonyms: RwLock::new(HashMap::new()),
            max_expansions_per_term: 3,
        }
    }

    /// Merge additional synonym entries (config-driven)
    pub fn add_synonyms(&self, entries: HashMap<String, Vec<String>>) {
        let mut synonyms = self.synonyms.write();
        for (term, mut alternatives) in entries {
            synonyms
                .entry(term.to_lowercase())
                .or_default()
                .append(&mut alternatives);
        }
    }

    /// Expand a query by appending synonyms of its non-stopword terms
    ///
    /// Terms already present in the query are not appended again, so
    /// `expanded == original` whenever the table has nothing to add.
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let synonyms = self.synonyms.read();
        let mut added: Vec<String> = Vec::new();

        for word in query.to_lowercase().split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() || STOPWORDS.contains(word) {
                continue;
            }
            if let Some(alternatives) = synonyms.get(word) {
                for alt in alternatives.iter().take(self.max_expansions_per_term) {
                    let lower = alt.to_lowercase();
                    let already_present = query.to_lowercase().contains(&lower)
                        || added.iter().any(|a| a == &lower);
                    if !already_present {
                        added.push(lower);
                    }
                }
            }
        }

        let expanded = if added.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, added.join(" "))
        };

        if !added.is_empty() {
            tracing::debug!(original = query, expanded = %expanded, "query expanded");
        }

        ExpandedQuery {
            original: query.to_string(),
            expanded,
            added_terms: added,
        }
    }
}
