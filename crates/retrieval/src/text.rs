//! Small text helpers shared by the scoring stages

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Common English stopwords, enough for keyword extraction; not a
/// linguistic resource.
pub(crate) static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "can",
        "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
        "during", "before", "after", "between", "under", "then", "once", "here", "there", "when",
        "where", "why", "how", "what", "which", "who", "whom", "this", "that", "these", "those",
        "all", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
        "same", "so", "than", "too", "very", "just", "and", "but", "if", "or", "because", "until",
        "while", "about", "i", "me", "my", "we", "our", "you", "your", "it", "its", "they", "them",
        "their",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric keywords with stopwords removed
pub(crate) fn keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Logistic squash of `x` around `center` with the given slope
pub(crate) fn sigmoid(x: f32, center: f32, slope: f32) -> f32 {
    1.0 / (1.0 + (-slope * (x - center)).exp())
}
