//! Approximate token counting
//!
//! Indexed chunks carry token counts assigned by the model-side
//! tokenizer. Text that enters the pipeline at query time (web snippets,
//! ad-hoc passages) has no such count, so we approximate one from
//! Unicode word segmentation. The approximation deliberately overcounts
//! slightly so the budget packer errs on the safe side.

use unicode_segmentation::UnicodeSegmentation;

/// Tokens-per-word fudge factor. Subword tokenizers emit roughly 1.3
/// tokens per English word; code-heavy text lands a little higher.
const TOKENS_PER_WORD: f32 = 1.3;

/// Approximate the token count of `text`, never returning zero for
/// non-empty input.
pub fn approximate_token_count(text: &str) -> usize {
    let words = text.unicode_words().count();
    if words == 0 {
        return usize::from(!text.trim().is_empty());
    }
    ((words as f32 * TOKENS_PER_WORD).ceil() as usize).max(1)
}
