//! # Roundtable Core
//!
//! Shared, I/O-free logic for roundtable: document models, token
//! estimation, chunking, retrieval, context assembly, and the resumable
//! discussion state machine.
//!
//! This crate performs no network or filesystem access. The embedding and
//! completion services are consumed through the [`index::Embedder`],
//! [`index::SearchIndex`] and [`generate::Generator`] traits; concrete
//! providers live in the `roundtable` app crate.
//!
//! ## Data flow
//!
//! ```text
//! text ─▶ chunk ─▶ index (build once) ─▶ retrieve(query) ─▶ context ─┐
//!                                                                    ▼
//!        transcript ◀── filter ◀── Generator ◀── prompt ◀── discussion::step
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, chunks, messages |
//! | [`tokens`] | Approximate token counting |
//! | [`chunk`] | Recursive overlapping chunker |
//! | [`index`] | Embedding/search capability wrappers |
//! | [`retrieve`] | Filtered, deduplicated retrieval |
//! | [`score`] | Chunk quality heuristic |
//! | [`context`] | Token-budgeted context packing |
//! | [`prompt`] | Persona and turn prompts |
//! | [`generate`] | Completion capability + response filter |
//! | [`error`] | Failure classification and error types |
//! | [`discussion`] | Turn scheduler and execution modes |
//! | [`actions`] | Action-item summary of a transcript |
//! | [`analysis`] | Heuristic document structure analysis |

pub mod actions;
pub mod analysis;
pub mod chunk;
pub mod context;
pub mod discussion;
pub mod error;
pub mod generate;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod score;
pub mod tokens;
