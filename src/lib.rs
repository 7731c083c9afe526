//! # Roundtable
//!
//! Document-grounded multi-persona discussions.
//!
//! Roundtable splits a reference document into chunks, indexes them, and
//! runs a round-robin discussion between caller-defined roles in which
//! every message is generated with a token-budgeted grounding context
//! retrieved from the document.
//!
//! This crate is the application layer: configuration, concrete
//! embedding and completion providers, document preparation, session
//! files and the `rtable` CLI. The I/O-free logic lives in
//! [`roundtable_core`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Document │──▶│ Chunk+Index  │──▶│  Retriever +  │
//! │  (text)  │   │ keyword/vec  │   │  Context pack │
//! └──────────┘   └──────────────┘   └──────┬────────┘
//!                                          ▼
//!                 ┌──────────┐      ┌──────────────┐
//!                 │ session  │◀────▶│ Orchestrator │──▶ Generator
//!                 │  (JSON)  │      │  step / run  │   (OpenAI/Ollama)
//!                 └──────────┘      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rtable analyze report.txt
//! rtable run report.txt --topic "quarterly budget" --role CFO --role COO --turns 2
//! rtable start report.txt --topic "quarterly budget" --role CFO --role COO --state s.json
//! rtable step --state s.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Completion providers |
//! | [`http`] | Retrying JSON requests |
//! | [`ingest`] | Document loading, chunking and indexing |
//! | [`session`] | Stepwise session files |
//! | [`transcript`] | Transcript files and rendering |

pub mod config;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod session;
pub mod transcript;
