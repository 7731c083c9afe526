//! Completion capability and response filtering.
//!
//! The [`Generator`] trait is the boundary to the language-model service.
//! Timeouts and retries are the implementation's concern (see the
//! `roundtable` app crate); the orchestrator only sees a final
//! `Ok(text)` or a classified [`GenerationError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// Appended to a message cut at the length ceiling.
pub const ELLIPSIS_MARKER: &str = "…";

/// One completion call: system framing plus the user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

/// A language-model completion service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Cheap readiness check run before a discussion starts (credentials,
    /// reachability). Failures here are fatal to the caller.
    async fn ready(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    /// Produce a completion for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

/// Trim a response and cap it at `max_chars` characters, marking the cut.
pub fn filter_response(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(max_chars).collect();
    format!("{}{ELLIPSIS_MARKER}", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(filter_response("  Budget looks fine.\n", 100), "Budget looks fine.");
    }

    #[test]
    fn test_long_text_capped_with_marker() {
        let out = filter_response(&"a".repeat(50), 10);
        assert_eq!(out, format!("{}{}", "a".repeat(10), ELLIPSIS_MARKER));
    }

    #[test]
    fn test_cap_counts_chars_not_bytes() {
        let out = filter_response("予算予算予算", 4);
        assert_eq!(out, "予算予算…");
    }
}
