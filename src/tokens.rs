//! Approximate token counting for budget accounting.
//!
//! Counts are estimates: the research loop compares them against a soft
//! budget, so a cheap, stable number matters more than exact provider parity.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Characters per token for the heuristic estimator.
pub const CHARS_PER_TOKEN: usize = 4;

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("cl100k_base tokenizer unavailable, using char heuristic: {e}");
        None
    }
});

pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// cl100k_base BPE count, falling back to [`HeuristicEstimator`] if the
/// tokenizer cannot be loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenEstimator;

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        match CL100K.as_ref() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => HeuristicEstimator.estimate(text),
        }
    }
}

/// `ceil(chars / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Count tokens with the default estimator.
pub fn count_tokens(text: &str) -> usize {
    TiktokenEstimator.estimate(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(HeuristicEstimator.estimate(""), 0);
        assert_eq!(HeuristicEstimator.estimate("abc"), 1);
        assert_eq!(HeuristicEstimator.estimate("abcd"), 1);
        assert_eq!(HeuristicEstimator.estimate("abcde"), 2);
    }

    #[test]
    fn heuristic_counts_chars_not_bytes() {
        assert_eq!(HeuristicEstimator.estimate("ééééé"), 2);
    }

    #[test]
    fn tiktoken_counts_are_positive_and_monotone() {
        let short = count_tokens("neural networks");
        let long = count_tokens("neural networks learn representations from data");
        assert!(short > 0);
        assert!(long > short);
        assert_eq!(count_tokens(""), 0);
    }
}
