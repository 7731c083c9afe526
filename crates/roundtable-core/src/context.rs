//! Token-budgeted grounding context assembly.
//!
//! Turns retrieved chunk texts into a [`ContextBundle`]: the chunks are
//! ranked by [`crate::score::score`], then packed greedily into
//! `max_tokens`, each under a sequential `[Source N]` label.
//!
//! # Packing rules
//!
//! 1. Sort by score, descending; ties keep retrieval order.
//! 2. A chunk that fits the remaining budget is added whole.
//! 3. A chunk that does not fit is truncated to the remaining budget if it
//!    is one of the three best-scored chunks and at least 70% of the
//!    budget is still free. Otherwise it is skipped.
//! 4. If nothing was packed, the best chunk is cut down to the budget so a
//!    non-empty input never produces an empty bundle.
//!
//! Every section is costed as rendered (label included), and the bundle's
//! token total never exceeds `max_tokens`.

use serde::{Deserialize, Serialize};

use crate::score::{score, ScoreWeights};
use crate::tokens::{count_tokens, ApproxCounter};

/// Appended to a section whose chunk was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = " …[truncated]";

/// Ranks eligible for partial inclusion.
const TRUNCATABLE_RANKS: usize = 3;

/// Minimum free share of the budget before a partial inclusion is allowed.
const TRUNCATION_FREE_RATIO: f64 = 0.7;

/// One labelled chunk in a [`ContextBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// 1-based position in presentation order.
    pub label: usize,
    pub text: String,
    /// Estimated tokens of the rendered section.
    pub tokens: usize,
    pub truncated: bool,
    /// Rendered without its `[Source N]` label; only for budgets too small
    /// to hold one.
    #[serde(default)]
    pub bare: bool,
}

impl Section {
    pub fn render(&self) -> String {
        if self.bare {
            self.text.clone()
        } else {
            render_section(self.label, &self.text)
        }
    }
}

/// Grounding context: selected chunks in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub sections: Vec<Section>,
    /// Running token total over `sections`.
    pub tokens: usize,
    pub max_tokens: usize,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Sections joined with blank lines.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_section(label: usize, text: &str) -> String {
    format!("[Source {label}] {text}")
}

/// Scores and packs chunks into a [`ContextBundle`].
pub struct ContextAssembler {
    weights: ScoreWeights,
    counter: ApproxCounter,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl ContextAssembler {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            weights,
            counter: ApproxCounter,
        }
    }

    /// Pack `chunks` into at most `max_tokens`.
    ///
    /// Returns an empty bundle only when `chunks` holds no non-blank text
    /// or `max_tokens` is 0.
    pub fn assemble<S: AsRef<str>>(&self, chunks: &[S], max_tokens: usize) -> ContextBundle {
        let mut ranked: Vec<(u32, &str)> = chunks
            .iter()
            .map(|c| c.as_ref().trim())
            .filter(|t| !t.is_empty())
            .map(|t| (score(t, &self.weights), t))
            .collect();
        // sort_by is stable: equal scores keep retrieval order
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut bundle = ContextBundle {
            max_tokens,
            ..ContextBundle::default()
        };

        for (rank, (_, text)) in ranked.iter().enumerate() {
            let label = bundle.sections.len() + 1;
            let remaining = max_tokens - bundle.tokens;
            let cost = self.cost(label, text);

            if cost <= remaining {
                self.push(&mut bundle, label, text.to_string(), cost, false, false);
                continue;
            }

            let free_ratio = remaining as f64 / max_tokens.max(1) as f64;
            if rank < TRUNCATABLE_RANKS && free_ratio >= TRUNCATION_FREE_RATIO {
                if let Some((body, tokens)) =
                    self.truncate_to_fit(Some(label), text, remaining, TRUNCATION_MARKER)
                {
                    tracing::debug!(rank, cost, remaining, "truncating chunk to fit context budget");
                    self.push(&mut bundle, label, body, tokens, true, false);
                }
            }
        }

        if bundle.is_empty() {
            if let Some((_, best)) = ranked.first() {
                self.fallback(&mut bundle, best, max_tokens);
            }
        }

        tracing::debug!(
            sections = bundle.sections.len(),
            candidates = ranked.len(),
            tokens = bundle.tokens,
            max_tokens,
            "assembled grounding context"
        );
        bundle
    }

    /// Hard-truncate `best` into an empty bundle, dropping first the
    /// truncation marker and then the label until something fits.
    fn fallback(&self, bundle: &mut ContextBundle, best: &str, max_tokens: usize) {
        let labelled = self
            .truncate_to_fit(Some(1), best, max_tokens, TRUNCATION_MARKER)
            .or_else(|| self.truncate_to_fit(Some(1), best, max_tokens, ""))
            .map(|(body, tokens)| (body, tokens, false));
        let fitted = labelled.or_else(|| {
            self.truncate_to_fit(None, best, max_tokens, "")
                .map(|(body, tokens)| (body, tokens, true))
        });
        match fitted {
            Some((body, tokens, bare)) => {
                let truncated = body != best;
                self.push(bundle, 1, body, tokens, truncated, bare);
            }
            None => tracing::warn!(max_tokens, "context budget too small for any chunk"),
        }
    }

    fn push(
        &self,
        bundle: &mut ContextBundle,
        label: usize,
        text: String,
        tokens: usize,
        truncated: bool,
        bare: bool,
    ) {
        bundle.tokens += tokens;
        bundle.sections.push(Section {
            label,
            text,
            tokens,
            truncated,
            bare,
        });
    }

    fn cost(&self, label: usize, text: &str) -> usize {
        self.rendered_cost(Some(label), text)
    }

    /// Tokens of `text` as rendered, with a `[Source N]` label if given.
    fn rendered_cost(&self, label: Option<usize>, text: &str) -> usize {
        match label {
            Some(label) => count_tokens(&self.counter, &render_section(label, text)),
            None => count_tokens(&self.counter, text),
        }
    }

    /// Longest char prefix of `text` that, followed by `marker`, fits
    /// `budget` once rendered. `None` if not even one character fits.
    fn truncate_to_fit(
        &self,
        label: Option<usize>,
        text: &str,
        budget: usize,
        marker: &str,
    ) -> Option<(String, usize)> {
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let candidate = |n: usize| format!("{}{marker}", text[..boundaries[n]].trim_end());

        // Largest n in [1, chars] with cost(prefix(n)) <= budget.
        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.rendered_cost(label, &candidate(mid)) <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        if lo == 0 {
            return None;
        }
        let body = candidate(lo);
        let tokens = self.rendered_cost(label, &body);
        (tokens <= budget).then_some((body, tokens))
    }
}

/// Assemble with default weights and the default token estimator.
pub fn build_context<S: AsRef<str>>(chunks: &[S], max_tokens: usize) -> ContextBundle {
    ContextAssembler::default().assemble(chunks, max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i % 10)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_input_empty_bundle() {
        let chunks: Vec<String> = vec![];
        let bundle = build_context(&chunks, 2000);
        assert!(bundle.is_empty());
        assert_eq!(bundle.tokens, 0);
        assert_eq!(bundle.render(), "");
    }

    #[test]
    fn test_higher_score_first_and_labels_sequential() {
        let plain = "general notes about the meeting room layout and chairs".to_string();
        let data = "revenue grew 12% in Q3 | total 4.2M".to_string();
        let bundle = build_context(&[plain.clone(), data.clone()], 2000);
        assert_eq!(bundle.sections.len(), 2);
        assert_eq!(bundle.sections[0].text, data);
        assert_eq!(bundle.sections[0].label, 1);
        assert_eq!(bundle.sections[1].text, plain);
        assert_eq!(bundle.sections[1].label, 2);
        assert!(bundle.render().starts_with("[Source 1] revenue"));
    }

    #[test]
    fn test_ties_keep_retrieval_order() {
        let chunks = vec!["alpha notes".to_string(), "beta notes".to_string(), "gamma notes".to_string()];
        let bundle = build_context(&chunks, 2000);
        let texts: Vec<&str> = bundle.sections.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha notes", "beta notes", "gamma notes"]);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let chunks: Vec<String> = (1..30).map(|i| words(i * 7)).collect();
        for max in [1, 5, 10, 37, 100, 250, 1000] {
            let bundle = build_context(&chunks, max);
            assert!(bundle.tokens <= max, "{} > {}", bundle.tokens, max);
            let sum: usize = bundle.sections.iter().map(|s| s.tokens).sum();
            assert_eq!(sum, bundle.tokens);
        }
    }

    #[test]
    fn test_oversized_single_chunk_truncated() {
        let big = words(2000);
        let bundle = build_context(&[big.clone()], 100);
        assert_eq!(bundle.sections.len(), 1);
        assert!(bundle.sections[0].truncated);
        assert!(bundle.sections[0].text.ends_with(TRUNCATION_MARKER));
        assert!(bundle.tokens <= 100);
        // fills most of the budget
        assert!(bundle.tokens >= 90);
    }

    #[test]
    fn test_partial_inclusion_requires_free_budget() {
        // First chunk takes ~40% of the budget, leaving less than 70% free,
        // so the oversized second chunk is skipped rather than truncated.
        let first = format!("{} 1", words(37));
        let second = words(500);
        let bundle = build_context(&[first.clone(), second], 100);
        assert_eq!(bundle.sections.len(), 1);
        assert_eq!(bundle.sections[0].text, first);
        assert!(!bundle.sections[0].truncated);
    }

    #[test]
    fn test_partial_inclusion_limited_to_top_ranks() {
        let small: Vec<String> = (0..3).map(|i| format!("r{i}")).collect();
        let mut chunks = vec![words(400), words(400), words(400)];
        chunks.extend(small);
        let bundle = build_context(&chunks, 100);
        // rank 0 is truncated to fill the budget; later large chunks cannot fit
        assert!(bundle.sections[0].truncated);
        assert!(bundle.sections.iter().skip(1).all(|s| !s.truncated));
        assert!(bundle.tokens <= 100);
    }

    #[test]
    fn test_tiny_budgets_still_yield_a_section() {
        let chunks = vec![words(300)];
        for max in 1..=6 {
            let bundle = build_context(&chunks, max);
            assert_eq!(bundle.sections.len(), 1, "budget {max}");
            assert!(bundle.sections[0].truncated);
            assert!(bundle.tokens <= max, "{} > {}", bundle.tokens, max);
            assert!(!bundle.render().is_empty());
        }

        let one = build_context(&chunks, 1);
        assert!(one.sections[0].bare);
        assert_eq!(one.render(), one.sections[0].text);
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let bundle = build_context(&["some text".to_string()], 0);
        assert!(bundle.is_empty());
    }

    #[test]
    fn test_blank_chunks_ignored() {
        let bundle = build_context(&["   ".to_string(), "\n".to_string()], 100);
        assert!(bundle.is_empty());
    }
}
