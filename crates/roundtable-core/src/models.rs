//! Core data models used throughout roundtable.
//!
//! These types represent the reference document, its chunks, and the
//! messages that make up a discussion transcript. All of them are plain,
//! serializable values so a discussion can be carried across process
//! boundaries.

use serde::{Deserialize, Serialize};

use crate::tokens::{count_tokens, ApproxCounter};

/// Role label used for directive entries in a transcript.
pub const DIRECTIVE_ROLE: &str = "system";

/// Extracted reference document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub byte_len: usize,
    pub estimated_tokens: usize,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimated_tokens = count_tokens(&ApproxCounter, &text);
        Self {
            byte_len: text.len(),
            estimated_tokens,
            text,
        }
    }
}

/// A span of a document's text.
///
/// `start..end` are byte offsets into the source text; consecutive chunks
/// may overlap, and `text == source[start..end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier derived from the index and content hash.
    pub id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Approximate token count of `text`.
    pub tokens: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Quality score under the default weights; see [`crate::score`].
    pub fn quality(&self) -> u32 {
        crate::score::score(&self.text, &crate::score::ScoreWeights::default())
    }
}

impl AsRef<str> for Chunk {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// What produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A round-robin persona turn.
    #[default]
    Turn,
    /// A grounding pass produced before turn 0.
    Preliminary,
    /// A caller-supplied instruction with priority over persona framing.
    Directive,
}

/// One transcript entry. Created once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    /// Position in the transcript.
    pub sequence: usize,
    #[serde(default)]
    pub kind: MessageKind,
}

impl Message {
    pub fn is_directive(&self) -> bool {
        self.kind == MessageKind::Directive
    }
}

/// Roles in first-appearance order, skipping directive entries.
pub fn roles_in_transcript(transcript: &[Message]) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for m in transcript.iter().filter(|m| !m.is_directive()) {
        if !roles.iter().any(|r| r == &m.role) {
            roles.push(m.role.clone());
        }
    }
    roles
}
