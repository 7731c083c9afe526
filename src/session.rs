//! Session files for stepwise discussions.
//!
//! `rtable start` writes a session, each `rtable step` reads it, advances
//! the discussion by one message and writes it back. A session holds the
//! complete [`DiscussionState`] plus the path of the grounding document,
//! so every step can run in a fresh process.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use roundtable_core::discussion::DiscussionState;

/// Bumped when the file layout changes incompatibly.
pub const SESSION_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    /// Grounding document, if the discussion is grounded.
    #[serde(default)]
    pub document: Option<PathBuf>,
    pub state: DiscussionState,
}

impl Session {
    pub fn new(state: DiscussionState, document: Option<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            version: SESSION_VERSION,
            created_at: now,
            saved_at: now,
            document,
            state,
        }
    }
}

/// Write `session` to `path`, replacing any previous file.
pub fn save_session(path: &Path, session: &mut Session) -> Result<()> {
    session.saved_at = Utc::now();
    let json = serde_json::to_string_pretty(session)?;

    // an interrupted save must never truncate the previous session
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write session file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace session file: {}", path.display()))?;
    Ok(())
}

pub fn load_session(path: &Path) -> Result<Session> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    let session: Session = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
    if session.version != SESSION_VERSION {
        bail!(
            "Session file version {} is not supported (expected {})",
            session.version,
            SESSION_VERSION
        );
    }
    Ok(session)
}
