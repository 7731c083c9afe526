//! Chunk quality heuristic.
//!
//! A pure function from chunk text to an integer score, kept separate from
//! the packing logic in [`crate::context`] so weights can be tuned and
//! tested on their own.
//!
//! ```text
//! score = length tier                        (ideal 2 / acceptable 1 / else 0)
//!       + digits present                     (+2)
//!       + percent sign present               (+1)
//!       + tabular markers (| \t "table" 表)  (+2)
//!       + importance keyword hits            (+1 each, capped at +3)
//! ```

use serde::Deserialize;

/// Tunable weights and thresholds for [`score`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Inclusive character range of the ideal length tier.
    pub ideal_chars: (usize, usize),
    /// Inclusive character range of the acceptable length tier.
    pub acceptable_chars: (usize, usize),
    pub ideal_score: u32,
    pub acceptable_score: u32,
    pub digit_bonus: u32,
    pub percent_bonus: u32,
    pub table_bonus: u32,
    pub keyword_bonus_cap: u32,
    /// Lowercase keywords that mark a chunk as important.
    pub keywords: Vec<String>,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            ideal_chars: (100, 500),
            acceptable_chars: (50, 1000),
            ideal_score: 2,
            acceptable_score: 1,
            digit_bonus: 2,
            percent_bonus: 1,
            table_bonus: 2,
            keyword_bonus_cap: 3,
            keywords: default_keywords(),
        }
    }
}

/// Words that commonly flag conclusions, totals and obligations.
pub fn default_keywords() -> Vec<String> {
    [
        "important",
        "key",
        "critical",
        "summary",
        "conclusion",
        "result",
        "total",
        "must",
        "重要",
        "結論",
        "要点",
        "合計",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Score a chunk's text; higher is better.
pub fn score(text: &str, weights: &ScoreWeights) -> u32 {
    let len = text.chars().count();
    let mut total = length_tier(len, weights);

    if text.chars().any(|c| c.is_ascii_digit() || ('０'..='９').contains(&c)) {
        total += weights.digit_bonus;
    }
    if text.contains('%') || text.contains('％') {
        total += weights.percent_bonus;
    }
    if is_tabular(text) {
        total += weights.table_bonus;
    }

    let lower = text.to_lowercase();
    let hits = weights
        .keywords
        .iter()
        .filter(|k| !k.is_empty() && lower.contains(k.as_str()))
        .count() as u32;
    total + hits.min(weights.keyword_bonus_cap)
}

fn length_tier(len: usize, weights: &ScoreWeights) -> u32 {
    let within = |(lo, hi): (usize, usize)| (lo..=hi).contains(&len);
    if within(weights.ideal_chars) {
        weights.ideal_score
    } else if within(weights.acceptable_chars) {
        weights.acceptable_score
    } else {
        0
    }
}

fn is_tabular(text: &str) -> bool {
    text.contains('|') || text.contains('\t') || text.to_lowercase().contains("table") || text.contains('表')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w() -> ScoreWeights {
        ScoreWeights::default()
    }

    #[test]
    fn test_length_tiers() {
        assert_eq!(score(&"a".repeat(200), &w()), 2);
        assert_eq!(score(&"a".repeat(60), &w()), 1);
        assert_eq!(score(&"a".repeat(1200), &w()), 0);
        assert_eq!(score("short", &w()), 0);
    }

    #[test]
    fn test_signal_bonuses() {
        assert_eq!(score("revenue 42", &w()), 2);
        assert_eq!(score("margin 5%", &w()), 3);
        assert_eq!(score("a | b", &w()), 2);
        assert_eq!(score("a\tb", &w()), 2);
        assert_eq!(score("see Table", &w()), 2);
        assert_eq!(score("売上％", &w()), 1);
    }

    #[test]
    fn test_keyword_bonus_capped() {
        let text = "important key critical summary conclusion";
        assert_eq!(score(text, &w()), 3);
        assert_eq!(score("Key takeaway", &w()), 1);
    }

    #[test]
    fn test_custom_weights() {
        let weights = ScoreWeights {
            digit_bonus: 10,
            keywords: vec![],
            ..ScoreWeights::default()
        };
        assert_eq!(score("total 7", &weights), 10);
    }
}
