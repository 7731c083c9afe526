//! Filtered, deduplicated retrieval on top of a [`SearchIndex`].
//!
//! # Algorithm
//!
//! 1. Over-fetch `max(3k, 15)` candidates for the query.
//! 2. Walk them in rank order, skipping near-empty texts (fewer than
//!    `min_chars` characters) and texts already accepted (compared with
//!    whitespace normalized), until `k` are accepted.
//! 3. If fewer than `k / 2` survive, run one broadened query (the original
//!    plus generic importance terms) and merge its new results, still
//!    capped at `k`.
//!
//! Index failures and empty results are not errors: the caller gets an
//! empty list and proceeds without grounding.

use std::collections::HashSet;

use crate::index::{Hit, SearchIndex};

/// Appended to a query that returned too few usable results.
pub const BROADENING_TERMS: &str = "important key points main figures conclusion";

/// Minimum candidate fetch regardless of `k`.
const MIN_FETCH: usize = 15;

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Minimum characters for a result to count as usable.
    pub min_chars: usize,
    pub broadening_terms: String,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            min_chars: 20,
            broadening_terms: BROADENING_TERMS.to_string(),
        }
    }
}

/// Retrieve up to `k` distinct, non-trivial chunk texts for `query`.
pub async fn search_filtered(index: &dyn SearchIndex, query: &str, k: usize) -> Vec<String> {
    search_filtered_with(index, query, k, &RetrievalParams::default()).await
}

/// [`search_filtered`] with explicit parameters.
pub async fn search_filtered_with(
    index: &dyn SearchIndex,
    query: &str,
    k: usize,
    params: &RetrievalParams,
) -> Vec<String> {
    if k == 0 {
        return Vec::new();
    }
    let fetch = (3 * k).max(MIN_FETCH);
    let mut accepted = Accepted::new(k, params.min_chars);

    accepted.extend(fetch_hits(index, query, fetch).await);

    if accepted.results.len() * 2 < k {
        let broadened = format!("{} {}", query.trim(), params.broadening_terms);
        tracing::debug!(
            accepted = accepted.results.len(),
            k,
            "few usable results, broadening query"
        );
        accepted.extend(fetch_hits(index, &broadened, fetch).await);
    }

    if accepted.results.is_empty() {
        tracing::warn!(query = %truncate_for_log(query), "retrieval returned no usable chunks");
    } else {
        tracing::debug!(
            query = %truncate_for_log(query),
            results = accepted.results.len(),
            "retrieved grounding chunks"
        );
    }
    accepted.results
}

async fn fetch_hits(index: &dyn SearchIndex, query: &str, fetch: usize) -> Vec<Hit> {
    match index.search(query, fetch).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!("index search failed: {e:#}");
            Vec::new()
        }
    }
}

/// Accumulates distinct results up to a cap.
struct Accepted {
    k: usize,
    min_chars: usize,
    seen: HashSet<String>,
    results: Vec<String>,
}

impl Accepted {
    fn new(k: usize, min_chars: usize) -> Self {
        Self {
            k,
            min_chars,
            seen: HashSet::new(),
            results: Vec::new(),
        }
    }

    fn extend(&mut self, hits: Vec<Hit>) {
        for hit in hits {
            if self.results.len() >= self.k {
                break;
            }
            let text = hit.chunk.text.trim();
            if text.chars().count() < self.min_chars {
                continue;
            }
            if self.seen.insert(normalize_whitespace(text)) {
                self.results.push(text.to_string());
            }
        }
    }
}

/// Collapse whitespace runs to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_for_log(query: &str) -> String {
    query.chars().take(40).collect()
}
