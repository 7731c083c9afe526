//! Action-item summary of a finished discussion.

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::generate::{CompletionRequest, Generator};
use crate::models::Message;

/// Action items proposed per role.
pub const MAX_ACTIONS_PER_ROLE: usize = 5;
/// Team-wide next steps proposed.
pub const NEXT_STEPS: usize = 3;

/// Output language of the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ja,
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ja" | "japanese" => Ok(Language::Ja),
            other => Err(format!("unsupported language {other:?} (expected en or ja)")),
        }
    }
}

/// Build the action-item request for `transcript`. Directive entries are
/// left out.
pub fn action_items_request(transcript: &[Message], language: Language) -> CompletionRequest {
    let discussion = transcript
        .iter()
        .filter(|m| !m.is_directive())
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = match language {
        Language::En => format!(
            "Analyze the following discussion and summarize action items for each \
             participant (role).\n\n\
             ## Discussion:\n{discussion}\n\n\
             ## Instructions:\n\
             1. Identify specific actions that each role should take.\n\
             2. Assign a priority (High, Medium, Low) to each action.\n\
             3. State a deadline or completion criterion for each action.\n\
             4. Suggest at most {MAX_ACTIONS_PER_ROLE} action items per role.\n\
             5. Finally, propose {NEXT_STEPS} next steps for the whole team.\n\n\
             ## Output format:\n\
             # Action Items\n\n\
             ## [Role]\n\
             1. **Action**: description (Priority: High/Medium/Low)\n\n\
             ## Next Steps\n1. ...\n2. ...\n3. ..."
        ),
        Language::Ja => format!(
            "以下の議論を分析し、各参加者（役割）に対するアクションアイテムをまとめてください。\n\n\
             ## 議論内容:\n{discussion}\n\n\
             ## 指示:\n\
             1. 各役割が取るべき具体的なアクションを特定してください。\n\
             2. アクションには優先順位（高・中・低）をつけてください。\n\
             3. 各アクションの期限や完了条件を明確にしてください。\n\
             4. 役割ごとに最大{MAX_ACTIONS_PER_ROLE}つのアクションアイテムを提案してください。\n\
             5. 最後に全体の次のステップを{NEXT_STEPS}つ提案してください。\n\n\
             ## 出力形式:\n\
             # アクションアイテム一覧\n\n\
             ## [役割名]\n\
             1. **アクション**: 説明 (優先度: 高/中/低)\n\n\
             ## 次のステップ\n1. ...\n2. ...\n3. ..."
        ),
    };

    CompletionRequest {
        system: "You turn meeting transcripts into concise, prioritized action items.".to_string(),
        user,
    }
}

/// Generate the action-item summary for `transcript`.
///
/// # Errors
///
/// The classified [`GenerationError`] when the completion fails; an empty
/// transcript fails without calling the generator.
pub async fn generate_action_items(
    generator: &dyn Generator,
    transcript: &[Message],
    language: Language,
) -> Result<String, GenerationError> {
    if transcript.iter().all(Message::is_directive) {
        return Err(GenerationError::classified("transcript is empty"));
    }
    tracing::info!(messages = transcript.len(), ?language, "generating action items");
    let request = action_items_request(transcript, language);
    let text = generator.complete(&request).await?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::{MessageKind, DIRECTIVE_ROLE};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder(Mutex<Option<CompletionRequest>>);

    #[async_trait]
    impl Generator for Recorder {
        fn model_name(&self) -> &str {
            "recorder"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
            *self.0.lock().unwrap() = Some(request.clone());
            Ok("  # Action Items\n".to_string())
        }
    }

    fn transcript() -> Vec<Message> {
        vec![
            Message {
                role: "CFO".into(),
                content: "Cut travel by 10%.".into(),
                sequence: 0,
                kind: MessageKind::Turn,
            },
            Message {
                role: DIRECTIVE_ROLE.into(),
                content: "Focus on hiring.".into(),
                sequence: 1,
                kind: MessageKind::Directive,
            },
        ]
    }

    #[test]
    fn test_request_lists_turns_without_directives() {
        let req = action_items_request(&transcript(), Language::En);
        assert!(req.user.contains("CFO: Cut travel by 10%."));
        assert!(!req.user.contains("Focus on hiring."));
        assert!(req.user.contains("at most 5 action items per role"));
        assert!(req.user.contains("propose 3 next steps"));
    }

    #[test]
    fn test_japanese_request() {
        let req = action_items_request(&transcript(), Language::Ja);
        assert!(req.user.contains("最大5つ"));
        assert!(req.user.contains("次のステップを3つ"));
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("JA".parse::<Language>().unwrap(), Language::Ja);
        assert!("fr".parse::<Language>().is_err());
    }

    #[tokio::test]
    async fn test_generate_trims_output() {
        let generator = Recorder(Mutex::new(None));
        let out = generate_action_items(&generator, &transcript(), Language::En).await.unwrap();
        assert_eq!(out, "# Action Items");
        assert!(generator.0.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let generator = Recorder(Mutex::new(None));
        let err = generate_action_items(&generator, &[], Language::En).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Unknown);
        assert!(generator.0.lock().unwrap().is_none());
    }
}
