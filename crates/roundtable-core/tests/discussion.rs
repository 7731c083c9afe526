//! End-to-end behaviour of the discussion engine with stubbed capabilities.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use roundtable_core::chunk::build_chunks;
use roundtable_core::discussion::{DiscussionSettings, DiscussionState, Grounding, Orchestrator};
use roundtable_core::error::{DiscussionError, FailureKind, GenerationError};
use roundtable_core::generate::{CompletionRequest, Generator};
use roundtable_core::index::{build_vector_index, Embedder, KeywordIndex, SearchIndex};
use roundtable_core::models::{Message, MessageKind};

/// Deterministic generator: numbers its replies and echoes the last line
/// of the user prompt. Records every request.
#[derive(Default)]
struct ScriptGenerator {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptGenerator {
    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptGenerator {
    fn model_name(&self) -> &str {
        "script"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let last = request.user.lines().last().unwrap_or_default();
        Ok(format!("#{}: {last}", requests.len()))
    }
}

struct FailingGenerator {
    ready_error: Option<&'static str>,
    complete_error: &'static str,
}

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn ready(&self) -> Result<(), GenerationError> {
        match self.ready_error {
            Some(msg) => Err(GenerationError::classified(msg)),
            None => Ok(()),
        }
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
        Err(GenerationError::classified(self.complete_error))
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("connection refused")
    }
}

const BUDGET_DOC: &str = "The quarterly budget allocates 40% to operations.\n\n\
    Budget risk: supplier costs rose 12% last quarter.\n\n\
    The COO owns logistics and the budget for warehouses.";

fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn role_sequence(transcript: &[Message]) -> Vec<&str> {
    transcript.iter().map(|m| m.role.as_str()).collect()
}

fn ungrounded(generator: Arc<dyn Generator>) -> Orchestrator {
    Orchestrator::new(generator, DiscussionSettings::default())
}

#[tokio::test]
async fn test_round_robin_order() {
    let o = ungrounded(Arc::new(ScriptGenerator::default()));
    let mut state = o.start_discussion("t", &roles(&["A", "B", "C"]), 2).unwrap();

    let mut visited = Vec::new();
    let mut completions = Vec::new();
    while !state.is_complete() {
        visited.push((state.turn_index, state.roles[state.role_index].clone()));
        let outcome = o.step(state).await.unwrap();
        completions.push(outcome.is_complete);
        state = outcome.state;
    }

    let expected: Vec<(usize, String)> = [(0, "A"), (0, "B"), (0, "C"), (1, "A"), (1, "B"), (1, "C")]
        .iter()
        .map(|(t, r)| (*t, r.to_string()))
        .collect();
    assert_eq!(visited, expected);
    assert_eq!(completions, vec![false, false, false, false, false, true]);
    assert_eq!(state.transcript.len(), 6);
    assert_eq!(state.position(), Some(6));
}

#[tokio::test]
async fn test_stepwise_matches_bulk() {
    let names = roles(&["A", "B", "C"]);

    let bulk = ungrounded(Arc::new(ScriptGenerator::default()));
    let state = bulk.start_discussion("pricing", &names, 2).unwrap();
    let bulk_transcript = bulk.run_to_completion(state).await.unwrap();

    // each step round-trips the state through JSON, as a stateless caller would
    let stepwise = ungrounded(Arc::new(ScriptGenerator::default()));
    let mut json = serde_json::to_string(&stepwise.start_discussion("pricing", &names, 2).unwrap()).unwrap();
    for _ in 0..6 {
        let state: DiscussionState = serde_json::from_str(&json).unwrap();
        json = serde_json::to_string(&stepwise.step(state).await.unwrap().state).unwrap();
    }
    let state: DiscussionState = serde_json::from_str(&json).unwrap();
    assert!(state.is_complete());
    assert_eq!(state.transcript, bulk_transcript);
}

#[tokio::test]
async fn test_quarterly_budget_without_grounding() {
    let generator = Arc::new(ScriptGenerator::default());
    let o = ungrounded(generator.clone());
    let state = o.start_discussion("quarterly budget", &roles(&["CFO", "COO"]), 2).unwrap();
    let transcript = o.run_to_completion(state).await.unwrap();

    assert_eq!(transcript.len(), 4);
    assert_eq!(role_sequence(&transcript), vec!["CFO", "COO", "CFO", "COO"]);
    assert!(transcript.iter().enumerate().all(|(i, m)| m.sequence == i));
    assert!(transcript[3].content.ends_with("As COO, provide your next contribution to this discussion."));
    // history reaches later turns
    assert!(generator.requests()[1].user.contains("CFO: #1"));
}

#[tokio::test]
async fn test_degraded_grounding_still_completes() {
    let chunks = build_chunks(BUDGET_DOC, 30, 5);
    let index = build_vector_index(Arc::new(BrokenEmbedder), chunks, 8)
        .await
        .map(|i| Arc::new(i) as Arc<dyn SearchIndex>);
    assert!(index.is_none());

    let generator = Arc::new(ScriptGenerator::default());
    let o = Orchestrator::new(generator.clone(), DiscussionSettings::default()).with_index(index);
    let mut state = o.start_discussion("quarterly budget", &roles(&["CFO", "COO"]), 2).unwrap();
    while !state.is_complete() {
        let outcome = o.step(state).await.unwrap();
        assert_eq!(outcome.grounding, Grounding::Disabled);
        state = outcome.state;
    }

    assert_eq!(state.transcript.len(), 4);
    assert!(generator.requests().iter().all(|r| !r.system.contains("[Source")));
}

#[tokio::test]
async fn test_grounded_discussion_with_preliminary_pass() {
    let index: Arc<dyn SearchIndex> = Arc::new(KeywordIndex::new(build_chunks(BUDGET_DOC, 30, 5)));
    let generator = Arc::new(ScriptGenerator::default());
    let o = Orchestrator::new(generator.clone(), DiscussionSettings::default()).with_index(Some(index));

    let mut state = o.start_discussion("quarterly budget", &roles(&["CFO", "COO"]), 1).unwrap();
    let mut groundings = Vec::new();
    while !state.is_complete() {
        let outcome = o.step(state).await.unwrap();
        groundings.push(outcome.grounding);
        state = outcome.state;
    }

    let kinds: Vec<MessageKind> = state.transcript.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::Preliminary, MessageKind::Preliminary, MessageKind::Turn, MessageKind::Turn]
    );
    assert_eq!(role_sequence(&state.transcript), vec!["CFO", "COO", "CFO", "COO"]);
    assert!(groundings.iter().all(|g| matches!(g, Grounding::Applied { .. })));

    let requests = generator.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].system.contains("preparing for a discussion"));
    assert!(requests[2].system.contains("[Source 1]"));
    assert!(requests[2].system.contains("cite the section"));
    assert!(requests[2].user.contains("CFO (preparation notes)"));
}

#[tokio::test]
async fn test_continuation_restarts_role_cycle() {
    let o = ungrounded(Arc::new(ScriptGenerator::default()));
    let names = roles(&["CFO", "COO"]);
    let transcript: Vec<Message> = ["CFO", "COO", "CFO"]
        .iter()
        .enumerate()
        .map(|(i, role)| Message {
            role: role.to_string(),
            content: format!("point {i}"),
            sequence: i,
            kind: MessageKind::Turn,
        })
        .collect();

    let continued = o
        .continue_discussion("quarterly budget", transcript.clone(), &names, 1)
        .await
        .unwrap();

    assert_eq!(&continued[..3], &transcript[..]);
    assert_eq!(role_sequence(&continued), vec!["CFO", "COO", "CFO", "CFO", "COO"]);

    let unchanged = o
        .continue_discussion("quarterly budget", transcript.clone(), &names, 0)
        .await
        .unwrap();
    assert_eq!(unchanged, transcript);
}

#[tokio::test]
async fn test_guidance_applies_directive_and_strips_it() {
    let generator = Arc::new(ScriptGenerator::default());
    let o = ungrounded(generator.clone());
    let state = o.start_discussion("quarterly budget", &roles(&["CFO", "COO"]), 1).unwrap();
    let transcript = o.run_to_completion(state).await.unwrap();

    let guided = o
        .apply_guidance("quarterly budget", transcript, "Discuss hiring plans", 1)
        .await
        .unwrap();

    assert_eq!(guided.len(), 4);
    assert!(guided.iter().all(|m| !m.is_directive()));
    assert_eq!(role_sequence(&guided), vec!["CFO", "COO", "CFO", "COO"]);
    let sequences: Vec<usize> = guided.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 3, 4]);

    // two opening turns, one facilitation note, two guided turns
    let requests = generator.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests[2].user.contains("Requested direction: Discuss hiring plans"));
    assert!(requests[3].system.starts_with("HIGHEST PRIORITY"));
    assert!(requests[3].system.contains("Discuss hiring plans\nFacilitator note: #3"));
    assert!(requests[4].system.contains("Discuss hiring plans"));
}

#[tokio::test]
async fn test_guidance_without_facilitation_note() {
    let generator = Arc::new(ScriptGenerator::default());
    let settings = DiscussionSettings {
        facilitation_note: false,
        ..DiscussionSettings::default()
    };
    let o = Orchestrator::new(generator.clone(), settings);
    let transcript = vec![Message {
        role: "CFO".into(),
        content: "We overspent.".into(),
        sequence: 0,
        kind: MessageKind::Turn,
    }];

    let guided = o.apply_guidance("budget", transcript, "Be specific", 2).await.unwrap();
    assert_eq!(role_sequence(&guided), vec!["CFO", "CFO", "CFO"]);
    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].system.contains("Facilitator note"));

    let err = o.apply_guidance("budget", Vec::new(), "Be specific", 1).await.unwrap_err();
    assert!(matches!(err, DiscussionError::InvalidSetup(_)));
}

#[tokio::test]
async fn test_failed_generation_becomes_placeholder() {
    let o = ungrounded(Arc::new(FailingGenerator {
        ready_error: None,
        complete_error: "HTTP 429 Too Many Requests",
    }));
    let state = o.start_discussion("budget", &roles(&["A", "B"]), 2).unwrap();

    let first = o.step(state).await.unwrap();
    assert_eq!(first.failure, Some(FailureKind::RateLimited));
    assert_eq!(first.message.content, "[A: response unavailable (rate limited)]");

    let transcript = o.run_to_completion(first.state).await.unwrap();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[3].content, "[B: response unavailable (rate limited)]");
}

#[tokio::test]
async fn test_unavailable_service_fails_at_connect() {
    let generator = Arc::new(FailingGenerator {
        ready_error: Some("401 Unauthorized: invalid API key"),
        complete_error: "unused",
    });
    let result = Orchestrator::connect(generator, None, DiscussionSettings::default()).await;
    let Err(err) = result else {
        panic!("connect should fail");
    };
    assert!(matches!(err, DiscussionError::Unavailable(_)));
    assert_eq!(err.failure_kind(), Some(FailureKind::AuthFailed));
}
