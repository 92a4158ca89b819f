//! Query router / classifier
//!
//! Decides whether to retrieve at all, and with which strategy, before
//! any embedding or index call. Pure pattern tables over the query text;
//! sub-millisecond, never fails. The `NoRetrieve` shortcut is the reason
//! this module exists: greetings and arithmetic skip the entire pipeline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use lantern_config::constants::request;
use lantern_config::RouterSettings;

/// Retrieval strategy chosen for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Skip retrieval entirely
    NoRetrieve,
    /// One hybrid retrieval pass (the default)
    Single,
    /// Decompose into sub-questions (feature-gated)
    MultiStep,
    /// Entity-relationship traversal (feature-gated)
    Graph,
}

/// Coarse complexity grade, informative for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// Output of the classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryClassification {
    pub strategy: Strategy,
    pub complexity: Complexity,
    pub reasoning: String,
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Queries shorter than this skip retrieval
    pub min_words_for_retrieval: usize,
    /// Enable the MultiStep strategy
    pub enable_multi_step: bool,
    /// Enable the Graph strategy
    pub enable_graph: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_words_for_retrieval: request::MIN_WORDS_FOR_RETRIEVAL,
            enable_multi_step: false,
            enable_graph: false,
        }
    }
}

impl From<&RouterSettings> for RouterConfig {
    fn from(settings: &RouterSettings) -> Self {
        Self {
            min_words_for_retrieval: settings.min_words_for_retrieval,
            enable_multi_step: settings.enable_multi_step,
            enable_graph: settings.enable_graph,
        }
    }
}

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(hi|hiya|hello|hey|yo|howdy|good\s+(morning|afternoon|evening))[\s!.,]*$")
        .expect("greeting pattern")
});

static ACKNOWLEDGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(thanks|thank\s+you|thx|ty|ok|okay|cool|got\s+it|great|nice|sounds\s+good)[\s!.,]*$")
        .expect("acknowledgment pattern")
});

static ARITHMETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-+*/()\d\s.]+\s*=?\s*$").expect("arithmetic pattern"));

static MULTI_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(compare|analyze|analyse|synthesize|contrast|evaluate)\b|\?.+\?|\band\s+(also|then)\b")
        .expect("multi-step pattern")
});

/// Two-plus capitalized multi-word noun phrases suggest an entity graph
static ENTITY_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+").expect("entity phrase pattern")
});

/// Classify a query
///
/// Priority: NoRetrieve > MultiStep > Graph > Single; the first strategy
/// whose feature flag is set wins. Infallible by contract.
pub fn classify(query: &str, cfg: &RouterConfig) -> QueryClassification {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.is_empty() {
        return QueryClassification {
            strategy: Strategy::NoRetrieve,
            complexity: Complexity::Trivial,
            reasoning: "empty".to_string(),
        };
    }

    let word_count = normalized.split_whitespace().count();

    if GREETING.is_match(&normalized) {
        return no_retrieve("greeting");
    }
    if ACKNOWLEDGMENT.is_match(&normalized) {
        return no_retrieve("acknowledgment");
    }
    if ARITHMETIC.is_match(&normalized) {
        return no_retrieve("arithmetic");
    }
    if word_count < cfg.min_words_for_retrieval {
        return no_retrieve("below minimum word count");
    }

    let complexity = grade_complexity(&normalized, word_count);

    if cfg.enable_multi_step && MULTI_STEP.is_match(&normalized) {
        return QueryClassification {
            strategy: Strategy::MultiStep,
            complexity,
            reasoning: "multiple sub-questions or ranked verbs".to_string(),
        };
    }

    if cfg.enable_graph && ENTITY_PHRASE.find_iter(&normalized).count() >= 2 {
        return QueryClassification {
            strategy: Strategy::Graph,
            complexity,
            reasoning: "multiple named entities".to_string(),
        };
    }

    QueryClassification {
        strategy: Strategy::Single,
        complexity,
        reasoning: "default".to_string(),
    }
}

fn no_retrieve(reasoning: &str) -> QueryClassification {
    QueryClassification {
        strategy: Strategy::NoRetrieve,
        complexity: Complexity::Trivial,
        reasoning: reasoning.to_string(),
    }
}

fn grade_complexity(normalized: &str, word_count: usize) -> Complexity {
    if MULTI_STEP.is_match(normalized) || word_count > 15 {
        Complexity::Complex
    } else if word_count >= 5 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_default(query: &str) -> QueryClassification {
        classify(query, &RouterConfig::default())
    }

    #[test]
    fn test_empty_is_no_retrieve() {
        let c = classify_default("");
        assert_eq!(c.strategy, Strategy::NoRetrieve);
        assert_eq!(c.reasoning, "empty");

        let c = classify_default("   \t ");
        assert_eq!(c.strategy, Strategy::NoRetrieve);
        assert_eq!(c.reasoning, "empty");
    }

    #[test]
    fn test_greetings_skip_retrieval() {
        for q in ["hi", "Hello!", "hey", "good morning", "HOWDY"] {
            let c = classify_default(q);
            assert_eq!(c.strategy, Strategy::NoRetrieve, "query: {q}");
            assert_eq!(c.complexity, Complexity::Trivial);
        }
    }

    #[test]
    fn test_acknowledgments_skip_retrieval() {
        for q in ["thanks", "thank you", "ok", "got it"] {
            assert_eq!(classify_default(q).strategy, Strategy::NoRetrieve, "query: {q}");
        }
    }

    #[test]
    fn test_arithmetic_skips_retrieval() {
        for q in ["2 + 2", "(3 * 4) / 2 =", "10.5 - 3"] {
            assert_eq!(classify_default(q).strategy, Strategy::NoRetrieve, "query: {q}");
        }
    }

    #[test]
    fn test_single_word_below_minimum() {
        let c = classify_default("borrowck");
        assert_eq!(c.strategy, Strategy::NoRetrieve);
        assert_eq!(c.reasoning, "below minimum word count");
    }

    #[test]
    fn test_factual_query_is_single() {
        let c = classify_default("how does reciprocal rank fusion work");
        assert_eq!(c.strategy, Strategy::Single);
        assert_eq!(c.complexity, Complexity::Moderate);
    }

    #[test]
    fn test_multi_step_requires_flag() {
        let query = "compare tokio and async-std scheduling";
        assert_eq!(classify_default(query).strategy, Strategy::Single);

        let cfg = RouterConfig {
            enable_multi_step: true,
            ..RouterConfig::default()
        };
        assert_eq!(classify(query, &cfg).strategy, Strategy::MultiStep);
    }

    #[test]
    fn test_graph_requires_flag_and_two_entities() {
        let query = "how does Apache Kafka relate to Apache Zookeeper";
        assert_eq!(classify_default(query).strategy, Strategy::Single);

        let cfg = RouterConfig {
            enable_graph: true,
            ..RouterConfig::default()
        };
        assert_eq!(classify(query, &cfg).strategy, Strategy::Graph);

        // One entity is not enough
        let c = classify("what is Apache Kafka good for", &cfg);
        assert_eq!(c.strategy, Strategy::Single);
    }

    #[test]
    fn test_multi_step_outranks_graph() {
        let cfg = RouterConfig {
            enable_multi_step: true,
            enable_graph: true,
            ..RouterConfig::default()
        };
        let c = classify("compare Apache Kafka with Rabbit Mq for streaming", &cfg);
        assert_eq!(c.strategy, Strategy::MultiStep);
    }

    #[test]
    fn test_long_query_is_complex() {
        let q = "why does the borrow checker reject a mutable reference taken while an immutable one from the same scope is still alive here";
        assert_eq!(classify_default(q).complexity, Complexity::Complex);
    }
}
