//! Approximate token counting.
//!
//! Exact tokenization depends on the model behind the completion service,
//! so every budget in roundtable is computed with an estimate. The
//! [`TokenCounter`] trait lets callers plug in a better estimator; the
//! free function [`count_tokens`] applies the `chars / 2` fallback when a
//! counter cannot handle its input.
//!
//! # Estimation rule ([`ApproxCounter`])
//!
//! - Each CJK ideograph, kana, or full-width character counts as one token.
//! - Each other whitespace-delimited run counts as `ceil(len / 4)` tokens.
//! - Whitespace is free.

use anyhow::Result;

/// Estimates the number of model tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Returns the estimated token count, or an error when the counter
    /// cannot process the input.
    fn count(&self, text: &str) -> Result<usize>;
}

/// Default estimator mixing a per-character rule for dense scripts with
/// a 4-chars-per-token rule for space-delimited text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxCounter;

/// Approximate characters-per-token ratio for space-delimited scripts.
const CHARS_PER_TOKEN: usize = 4;

impl TokenCounter for ApproxCounter {
    fn count(&self, text: &str) -> Result<usize> {
        let mut tokens: usize = 0;
        let mut run: usize = 0;
        for ch in text.chars() {
            if ch.is_whitespace() {
                tokens += run.div_ceil(CHARS_PER_TOKEN);
                run = 0;
            } else if is_dense_script(ch) {
                tokens += run.div_ceil(CHARS_PER_TOKEN) + 1;
                run = 0;
            } else {
                run += 1;
            }
        }
        Ok(tokens + run.div_ceil(CHARS_PER_TOKEN))
    }
}

/// Counter that always reports the `chars / 2` calibration value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHalfCounter;

impl TokenCounter for CharHalfCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(fallback_count(text))
    }
}

/// `character_count / 2`, calibrated for dense, non-space-delimited scripts.
pub fn fallback_count(text: &str) -> usize {
    text.chars().count() / 2
}

/// Count tokens with `counter`, falling back to [`fallback_count`] if it fails.
pub fn count_tokens(counter: &dyn TokenCounter, text: &str) -> usize {
    match counter.count(text) {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!("token counter failed ({e}), using chars/2 estimate");
            fallback_count(text)
        }
    }
}

/// CJK ideographs, kana, hangul, and full-width forms.
fn is_dense_script(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF     // hiragana, katakana
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFF00..=0xFFEF   // half/full-width forms
        | 0x3000..=0x303F   // CJK punctuation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl TokenCounter for Broken {
        fn count(&self, _text: &str) -> Result<usize> {
            anyhow::bail!("encoder unavailable")
        }
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(ApproxCounter.count("").unwrap(), 0);
        assert_eq!(ApproxCounter.count("   \n\t").unwrap(), 0);
    }

    #[test]
    fn test_latin_words() {
        // "hello" -> 2, "world" -> 2
        assert_eq!(ApproxCounter.count("hello world").unwrap(), 4);
        assert_eq!(ApproxCounter.count("a b c").unwrap(), 3);
    }

    #[test]
    fn test_dense_script_one_per_char() {
        assert_eq!(ApproxCounter.count("予算会議").unwrap(), 4);
        // mixed: "Q3" -> 1, then four ideographs
        assert_eq!(ApproxCounter.count("Q3予算会議").unwrap(), 5);
    }

    #[test]
    fn test_fallback_on_failure() {
        assert_eq!(count_tokens(&Broken, "abcdefgh"), 4);
        assert_eq!(count_tokens(&ApproxCounter, "abcdefgh"), 2);
    }

    #[test]
    fn test_char_half_counter() {
        assert_eq!(CharHalfCounter.count("四月の売上").unwrap(), 2);
    }
}
