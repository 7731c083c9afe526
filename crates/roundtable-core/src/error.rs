//! Failure classification and error types.
//!
//! Completion failures carry a [`FailureKind`] derived from their message
//! text so callers can decide whether to retry (rate limits, timeouts) or
//! fail fast (authentication). Within a discussion step, failures become
//! placeholder messages; before the first step they surface as
//! [`DiscussionError::Unavailable`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a completion-service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    AuthFailed,
    Timeout,
    ResourceExhausted,
    Unknown,
}

/// An HTTP status code in the positions providers and our clients report
/// it: `HTTP 429`, `status: 403`, `API error 504 Gateway Timeout`.
static STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:http(?:/\d(?:\.\d)?)?|status(?:\s+code)?|error|code)\s*[:=]?\s*(\d{3})\b").unwrap()
});

/// Checked in order; the first category with a matching needle wins.
const PATTERNS: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::RateLimited,
        &["rate limit", "rate_limit", "ratelimit", "quota", "too many requests"],
    ),
    (
        FailureKind::AuthFailed,
        &[
            "unauthorized",
            "unauthorised",
            "forbidden",
            "api key",
            "api_key",
            "authentication",
            "permission denied",
        ],
    ),
    (
        FailureKind::Timeout,
        &["timeout", "timed out", "deadline exceeded", "deadline_exceeded"],
    ),
    (
        FailureKind::ResourceExhausted,
        &["out of memory", "memory", "resource exhausted", "resource_exhausted", "capacity"],
    ),
];

impl FailureKind {
    /// Classify a failure message. A reported HTTP status decides first;
    /// otherwise case-insensitive substrings do.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let by_status = STATUS_REGEX
            .captures_iter(&lower)
            .find_map(|c| Self::from_status(&c[1]));
        if let Some(kind) = by_status {
            return kind;
        }
        PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(FailureKind::Unknown)
    }

    fn from_status(code: &str) -> Option<Self> {
        match code {
            "429" => Some(FailureKind::RateLimited),
            "401" | "403" => Some(FailureKind::AuthFailed),
            "408" | "504" => Some(FailureKind::Timeout),
            _ => None,
        }
    }

    /// Short human-readable reason, used in placeholder messages.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate limited",
            FailureKind::AuthFailed => "authentication failed",
            FailureKind::Timeout => "timed out",
            FailureKind::ResourceExhausted => "resources exhausted",
            FailureKind::Unknown => "generation failed",
        }
    }

    /// Whether repeating the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationError {
    /// Build an error whose kind is classified from `message`.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(e: anyhow::Error) -> Self {
        // {:#} keeps the context chain, which often holds the status code
        GenerationError::classified(format!("{e:#}"))
    }
}

/// Hard failures of the discussion API.
#[derive(Debug, Error)]
pub enum DiscussionError {
    /// The completion service could not be reached before any step ran.
    #[error("generation service unavailable ({}): {}", .0.kind, .0.message)]
    Unavailable(#[source] GenerationError),

    /// The state's cursor is outside its roles/turns. Indicates a caller bug.
    #[error(
        "turn index invalid: role_index {role_index}, turn_index {turn_index} \
         for {roles} roles and {total_turns} turns"
    )]
    TurnIndexInvalid {
        role_index: usize,
        turn_index: usize,
        roles: usize,
        total_turns: usize,
    },

    #[error("invalid discussion setup: {0}")]
    InvalidSetup(String),
}

impl DiscussionError {
    /// Failure category when the error came from the completion service.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DiscussionError::Unavailable(e) => Some(e.kind),
            _ => None,
        }
    }
}
