//! Transcript files and terminal rendering.
//!
//! Discussions are written as JSON ([`TranscriptFile`]) so they can be fed
//! back into `rtable continue`, `rtable guide` and `rtable actions`. Those
//! commands also accept a session file written by `rtable start`/`step`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use roundtable_core::models::{roles_in_transcript, Message, MessageKind};

use crate::session::Session;

/// Output format for discussion results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// A saved discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFile {
    pub topic: String,
    pub roles: Vec<String>,
    pub transcript: Vec<Message>,
}

impl TranscriptFile {
    pub fn new(topic: &str, transcript: Vec<Message>) -> Self {
        Self {
            topic: topic.to_string(),
            roles: roles_in_transcript(&transcript),
            transcript,
        }
    }
}

/// Read a transcript file or a session file.
pub fn load_transcript(path: &Path) -> Result<TranscriptFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript: {}", path.display()))?;

    if let Ok(file) = serde_json::from_str::<TranscriptFile>(&content) {
        return Ok(file);
    }
    if let Ok(session) = serde_json::from_str::<Session>(&content) {
        return Ok(TranscriptFile {
            topic: session.state.topic,
            roles: session.state.roles,
            transcript: session.state.transcript,
        });
    }
    match serde_json::from_str::<Vec<Message>>(&content) {
        Ok(transcript) if transcript.is_empty() => bail!("Transcript {} is empty", path.display()),
        Ok(transcript) => Ok(TranscriptFile::new("", transcript)),
        Err(e) => Err(e).with_context(|| {
            format!(
                "Failed to parse {}: expected a transcript or session file",
                path.display()
            )
        }),
    }
}

pub fn save_transcript(path: &Path, file: &TranscriptFile) -> Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write transcript: {}", path.display()))
}

/// One message as a terminal line.
pub fn render_message(message: &Message) -> String {
    match message.kind {
        MessageKind::Turn => format!("{}: {}", message.role, message.content),
        MessageKind::Preliminary => format!("{} (preparation): {}", message.role, message.content),
        MessageKind::Directive => format!(">> {}", message.content),
    }
}

/// Render a whole discussion in `format`.
pub fn render(file: &TranscriptFile, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(file)?),
        OutputFormat::Text => {
            let mut out = String::new();
            if !file.topic.is_empty() {
                out.push_str(&format!("Topic: {}\n\n", file.topic));
            }
            for message in &file.transcript {
                out.push_str(&render_message(message));
                out.push_str("\n\n");
            }
            Ok(out.trim_end().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str, sequence: usize, kind: MessageKind) -> Message {
        Message {
            role: role.into(),
            content: content.into(),
            sequence,
            kind,
        }
    }

    fn sample() -> TranscriptFile {
        TranscriptFile::new(
            "budget",
            vec![
                message("CFO", "notes", 0, MessageKind::Preliminary),
                message("CFO", "Cut travel.", 1, MessageKind::Turn),
                message("COO", "Agreed.", 2, MessageKind::Turn),
            ],
        )
    }

    #[test]
    fn test_text_rendering() {
        let text = render(&sample(), OutputFormat::Text).unwrap();
        assert_eq!(
            text,
            "Topic: budget\n\nCFO (preparation): notes\n\nCFO: Cut travel.\n\nCOO: Agreed."
        );
    }

    #[test]
    fn test_roles_derived_from_transcript() {
        assert_eq!(sample().roles, vec!["CFO", "COO"]);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        save_transcript(&path, &sample()).unwrap();
        assert_eq!(load_transcript(&path).unwrap(), sample());
    }

    #[test]
    fn test_load_bare_message_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"[{"role":"CFO","content":"hi","sequence":0}]"#).unwrap();
        let file = load_transcript(&path).unwrap();
        assert_eq!(file.roles, vec!["CFO"]);
        assert!(file.topic.is_empty());

        std::fs::write(&path, "[]").unwrap();
        assert!(load_transcript(&path).is_err());
        std::fs::write(&path, "not json").unwrap();
        assert!(load_transcript(&path).is_err());
    }
}
