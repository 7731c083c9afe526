//! Round-robin discussion engine.
//!
//! A discussion is a [`DiscussionState`] value advanced one message at a
//! time by [`Orchestrator::step`]. The state is plain data: a caller may
//! serialize it between steps and resume in another process.
//!
//! # State machine
//!
//! ```text
//!            start_discussion
//!                   │
//!      index && preliminary?──no──┐
//!                   │yes          │
//!                   ▼             ▼
//!   Preparing{next_role} ──▶ Discussing{turn_index, role_index} ──▶ complete
//!   (one pass per role)       (one message per role per turn)
//! ```
//!
//! In `Discussing`, each step emits a message for `roles[role_index]` and
//! advances the cursor:
//!
//! ```text
//! role_index' = (role_index + 1) mod R
//! turn_index' = turn_index + 1   if role_index' == 0
//! complete    = turn_index' * R + role_index' >= R * total_turns
//! ```
//!
//! Generation failures inside a step become bracketed placeholder
//! messages; the discussion always continues. Only setup errors, a dead
//! completion service at [`Orchestrator::connect`], and invalid cursors
//! are returned as [`DiscussionError`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{ContextAssembler, ContextBundle};
use crate::error::{DiscussionError, FailureKind};
use crate::generate::{filter_response, CompletionRequest, Generator};
use crate::index::SearchIndex;
use crate::models::{roles_in_transcript, Message, MessageKind, DIRECTIVE_ROLE};
use crate::prompt;
use crate::retrieve::{search_filtered_with, RetrievalParams};
use crate::score::ScoreWeights;

/// Tunables for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct DiscussionSettings {
    /// Chunks retrieved per turn.
    pub k: usize,
    /// Chunks retrieved for each preliminary pass.
    pub preliminary_k: usize,
    /// Token budget of a turn's grounding context.
    pub context_max_tokens: usize,
    /// Token budget of a preliminary pass's grounding context.
    pub preliminary_max_tokens: usize,
    /// Transcript entries shown to each turn.
    pub history_window: usize,
    /// Messages longer than this are cut and marked.
    pub max_message_chars: usize,
    /// Run one grounding pass per role before turn 0 when an index exists.
    pub preliminary: bool,
    /// Blend a generated facilitation note into guidance directives.
    pub facilitation_note: bool,
    pub retrieval: RetrievalParams,
    pub weights: ScoreWeights,
}

impl Default for DiscussionSettings {
    fn default() -> Self {
        Self {
            k: 5,
            preliminary_k: 10,
            context_max_tokens: 2000,
            preliminary_max_tokens: 3000,
            history_window: 5,
            max_message_chars: 1200,
            preliminary: true,
            facilitation_note: true,
            retrieval: RetrievalParams::default(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Where a discussion is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Preliminary grounding passes; `next_role` is the next role to prepare.
    Preparing { next_role: usize },
    /// Round-robin turns.
    Discussing,
}

/// Complete, serializable state of one discussion.
///
/// In the `Discussing` phase the number of turn messages generated since
/// the state was created is `turn_index * roles.len() + role_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionState {
    pub topic: String,
    pub roles: Vec<String>,
    pub total_turns: usize,
    pub turn_index: usize,
    pub role_index: usize,
    pub phase: Phase,
    pub transcript: Vec<Message>,
}

impl DiscussionState {
    fn new(topic: &str, roles: Vec<String>, total_turns: usize, transcript: Vec<Message>, phase: Phase) -> Self {
        Self {
            topic: topic.trim().to_string(),
            roles,
            total_turns,
            turn_index: 0,
            role_index: 0,
            phase,
            transcript,
        }
    }

    /// Turn messages generated so far under this state's cursor, or `None`
    /// when the cursor arithmetic overflows.
    pub fn position(&self) -> Option<usize> {
        self.turn_index
            .checked_mul(self.roles.len())?
            .checked_add(self.role_index)
    }

    /// Total turn messages this state will generate.
    pub fn target(&self) -> usize {
        self.roles.len().saturating_mul(self.total_turns)
    }

    /// The turn cursor points at a role and does not run past the target.
    fn cursor_in_range(&self) -> bool {
        self.role_index < self.roles.len()
            && self.turn_index <= self.total_turns
            && self.position().is_some_and(|p| p <= self.target())
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Discussing
            && self.cursor_in_range()
            && self.position() == Some(self.target())
    }

    /// Role that the next step will speak as, or `None` when complete or
    /// the cursor is invalid.
    pub fn current_role(&self) -> Option<&str> {
        if self.is_complete() {
            return None;
        }
        let idx = match self.phase {
            Phase::Preparing { next_role } => next_role,
            Phase::Discussing if self.cursor_in_range() => self.role_index,
            Phase::Discussing => return None,
        };
        self.roles.get(idx).map(String::as_str)
    }

    fn invalid_cursor(&self) -> DiscussionError {
        DiscussionError::TurnIndexInvalid {
            role_index: match self.phase {
                Phase::Preparing { next_role } => next_role,
                Phase::Discussing => self.role_index,
            },
            turn_index: self.turn_index,
            roles: self.roles.len(),
            total_turns: self.total_turns,
        }
    }

    /// Move the cursor past the message just generated.
    fn advance(&mut self) {
        match self.phase {
            Phase::Preparing { next_role } => {
                let next = next_role + 1;
                self.phase = if next >= self.roles.len() {
                    Phase::Discussing
                } else {
                    Phase::Preparing { next_role: next }
                };
            }
            Phase::Discussing => {
                self.role_index = (self.role_index + 1) % self.roles.len();
                if self.role_index == 0 {
                    self.turn_index += 1;
                }
            }
        }
    }

    fn push(&mut self, role: &str, content: String, kind: MessageKind) -> Message {
        let message = Message {
            role: role.to_string(),
            content,
            sequence: self.transcript.len(),
            kind,
        };
        self.transcript.push(message.clone());
        message
    }
}

/// How a step's prompt was grounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Grounding {
    /// No retrieval index; the prompt carries no citation instructions.
    Disabled,
    /// An index exists but retrieval produced no usable context.
    Empty,
    /// Context was packed into the prompt.
    Applied { sections: usize, tokens: usize },
}

impl Grounding {
    fn of(bundle: &ContextBundle) -> Self {
        if bundle.is_empty() {
            Grounding::Empty
        } else {
            Grounding::Applied {
                sections: bundle.sections.len(),
                tokens: bundle.tokens,
            }
        }
    }
}

/// Result of one [`Orchestrator::step`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub message: Message,
    pub state: DiscussionState,
    pub is_complete: bool,
    pub grounding: Grounding,
    /// Set when the message is a placeholder for a failed generation.
    pub failure: Option<FailureKind>,
}

/// Drives discussions against a completion service and an optional
/// grounding index.
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    index: Option<Arc<dyn SearchIndex>>,
    settings: DiscussionSettings,
    assembler: ContextAssembler,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn Generator>, settings: DiscussionSettings) -> Self {
        let assembler = ContextAssembler::new(settings.weights.clone());
        Self {
            generator,
            index: None,
            settings,
            assembler,
        }
    }

    /// Ground turns in `index`. `None` runs without grounding.
    pub fn with_index(mut self, index: Option<Arc<dyn SearchIndex>>) -> Self {
        self.index = index;
        self
    }

    /// Build an orchestrator after checking that the completion service
    /// is ready.
    ///
    /// # Errors
    ///
    /// [`DiscussionError::Unavailable`] with the classified failure when
    /// [`Generator::ready`] fails.
    pub async fn connect(
        generator: Arc<dyn Generator>,
        index: Option<Arc<dyn SearchIndex>>,
        settings: DiscussionSettings,
    ) -> Result<Self, DiscussionError> {
        if let Err(e) = generator.ready().await {
            tracing::error!(model = generator.model_name(), kind = ?e.kind, "generation service unavailable: {}", e.message);
            return Err(DiscussionError::Unavailable(e));
        }
        tracing::info!(
            model = generator.model_name(),
            grounded = index.is_some(),
            "discussion engine ready"
        );
        Ok(Self::new(generator, settings).with_index(index))
    }

    pub fn settings(&self) -> &DiscussionSettings {
        &self.settings
    }

    pub fn is_grounded(&self) -> bool {
        self.index.is_some()
    }

    /// Create the initial state for a discussion.
    ///
    /// # Errors
    ///
    /// [`DiscussionError::InvalidSetup`] for a blank topic, no roles, a
    /// blank or repeated role, or zero turns.
    pub fn start_discussion(
        &self,
        topic: &str,
        roles: &[String],
        total_turns: usize,
    ) -> Result<DiscussionState, DiscussionError> {
        if topic.trim().is_empty() {
            return Err(DiscussionError::InvalidSetup("topic is empty".into()));
        }
        if total_turns == 0 {
            return Err(DiscussionError::InvalidSetup("total_turns must be at least 1".into()));
        }
        let roles = validate_roles(roles)?;
        let phase = if self.settings.preliminary && self.index.is_some() {
            Phase::Preparing { next_role: 0 }
        } else {
            Phase::Discussing
        };
        tracing::info!(
            topic = %topic.trim(),
            roles = roles.len(),
            total_turns,
            preliminary = matches!(phase, Phase::Preparing { .. }),
            "starting discussion"
        );
        Ok(DiscussionState::new(topic, roles, total_turns, Vec::new(), phase))
    }

    /// Generate exactly one message and advance the state.
    ///
    /// # Errors
    ///
    /// [`DiscussionError::TurnIndexInvalid`] when the state is already
    /// complete or its cursor lies outside its roles.
    pub async fn step(&self, mut state: DiscussionState) -> Result<StepOutcome, DiscussionError> {
        let role = match state.current_role() {
            Some(role) => role.to_string(),
            None => return Err(state.invalid_cursor()),
        };

        let (message, grounding, failure) = match state.phase {
            Phase::Preparing { .. } => self.preliminary_step(&mut state, &role).await,
            Phase::Discussing => self.turn_step(&mut state, &role).await,
        };
        state.advance();
        let is_complete = state.is_complete();

        tracing::debug!(
            role = %role,
            sequence = message.sequence,
            turn_index = state.turn_index,
            role_index = state.role_index,
            is_complete,
            "step complete"
        );
        Ok(StepOutcome {
            message,
            state,
            is_complete,
            grounding,
            failure,
        })
    }

    async fn turn_step(
        &self,
        state: &mut DiscussionState,
        role: &str,
    ) -> (Message, Grounding, Option<FailureKind>) {
        let window = prompt::history_window(&state.transcript, self.settings.history_window);

        let (bundle, grounding) = match &self.index {
            Some(index) => {
                let query = prompt::retrieval_query(&state.topic, role, window);
                let bundle = self
                    .grounding_context(index.as_ref(), &query, self.settings.k, self.settings.context_max_tokens)
                    .await;
                let grounding = Grounding::of(&bundle);
                (Some(bundle), grounding)
            }
            None => (None, Grounding::Disabled),
        };

        let request = prompt::turn_request(&state.topic, role, bundle.as_ref(), window);
        let (content, failure) = self.generate(role, &request).await;
        let message = state.push(role, content, MessageKind::Turn);
        (message, grounding, failure)
    }

    async fn preliminary_step(
        &self,
        state: &mut DiscussionState,
        role: &str,
    ) -> (Message, Grounding, Option<FailureKind>) {
        let bundle = match &self.index {
            Some(index) => {
                let query = prompt::preliminary_query(&state.topic, role);
                self.grounding_context(
                    index.as_ref(),
                    &query,
                    self.settings.preliminary_k,
                    self.settings.preliminary_max_tokens,
                )
                .await
            }
            None => ContextBundle::default(),
        };

        if bundle.is_empty() {
            tracing::warn!(role, "no reference material for preliminary pass");
            let content = format!("[{role}: no reference material found for preparation]");
            let message = state.push(role, content, MessageKind::Preliminary);
            return (message, Grounding::Empty, None);
        }

        let grounding = Grounding::of(&bundle);
        let request = prompt::preliminary_request(role, &state.topic, &bundle);
        let (content, failure) = self.generate(role, &request).await;
        let message = state.push(role, content, MessageKind::Preliminary);
        (message, grounding, failure)
    }

    async fn grounding_context(
        &self,
        index: &dyn SearchIndex,
        query: &str,
        k: usize,
        max_tokens: usize,
    ) -> ContextBundle {
        let chunks = search_filtered_with(index, query, k, &self.settings.retrieval).await;
        self.assembler.assemble(&chunks, max_tokens)
    }

    /// Run one completion; failures become a placeholder.
    async fn generate(&self, role: &str, request: &CompletionRequest) -> (String, Option<FailureKind>) {
        match self.generator.complete(request).await {
            Ok(text) => (filter_response(&text, self.settings.max_message_chars), None),
            Err(e) => {
                tracing::warn!(role, kind = ?e.kind, "generation failed, using placeholder: {}", e.message);
                (placeholder(role, e.kind), Some(e.kind))
            }
        }
    }

    /// Step until complete and return the transcript.
    pub async fn run_to_completion(&self, mut state: DiscussionState) -> Result<Vec<Message>, DiscussionError> {
        while !state.is_complete() {
            state = self.step(state).await?.state;
        }
        Ok(state.transcript)
    }

    /// Append `additional_turns` rounds over `roles` to `transcript`.
    ///
    /// The role cycle restarts at `roles[0]` regardless of who spoke last.
    pub async fn continue_discussion(
        &self,
        topic: &str,
        transcript: Vec<Message>,
        roles: &[String],
        additional_turns: usize,
    ) -> Result<Vec<Message>, DiscussionError> {
        let state = self.continuation_state(topic, transcript, roles, additional_turns)?;
        tracing::info!(
            roles = state.roles.len(),
            additional_turns,
            existing = state.transcript.len(),
            "continuing discussion"
        );
        self.run_to_completion(state).await
    }

    /// State for a continuation, for callers that step it themselves.
    pub fn continuation_state(
        &self,
        topic: &str,
        transcript: Vec<Message>,
        roles: &[String],
        additional_turns: usize,
    ) -> Result<DiscussionState, DiscussionError> {
        if topic.trim().is_empty() {
            return Err(DiscussionError::InvalidSetup("topic is empty".into()));
        }
        let roles = validate_roles(roles)?;
        Ok(DiscussionState::new(
            topic,
            roles,
            additional_turns,
            transcript,
            Phase::Discussing,
        ))
    }

    /// Inject `instruction` as a directive, continue for
    /// `additional_turns` rounds, and return the transcript without
    /// directive entries.
    ///
    /// Roles are taken from `transcript` in first-appearance order.
    pub async fn apply_guidance(
        &self,
        topic: &str,
        mut transcript: Vec<Message>,
        instruction: &str,
        additional_turns: usize,
    ) -> Result<Vec<Message>, DiscussionError> {
        if instruction.trim().is_empty() {
            return Err(DiscussionError::InvalidSetup("guidance instruction is empty".into()));
        }
        let roles = roles_in_transcript(&transcript);
        if roles.is_empty() {
            return Err(DiscussionError::InvalidSetup(
                "transcript has no participants to guide".into(),
            ));
        }

        let note = if self.settings.facilitation_note {
            let window = prompt::history_window(&transcript, self.settings.history_window);
            let request = prompt::facilitation_request(topic, instruction, window);
            match self.generator.complete(&request).await {
                Ok(note) => Some(filter_response(&note, self.settings.max_message_chars)),
                Err(e) => {
                    tracing::warn!(kind = ?e.kind, "facilitation note failed, using instruction alone: {}", e.message);
                    None
                }
            }
        } else {
            None
        };

        transcript.push(Message {
            role: DIRECTIVE_ROLE.to_string(),
            content: prompt::blend_directive(instruction, note.as_deref()),
            sequence: transcript.len(),
            kind: MessageKind::Directive,
        });

        let transcript = self
            .continue_discussion(topic, transcript, &roles, additional_turns)
            .await?;
        Ok(transcript.into_iter().filter(|m| !m.is_directive()).collect())
    }
}

/// Visible stand-in for a message whose generation failed.
pub fn placeholder(role: &str, kind: FailureKind) -> String {
    format!("[{role}: response unavailable ({})]", kind.label())
}

fn validate_roles(roles: &[String]) -> Result<Vec<String>, DiscussionError> {
    if roles.is_empty() {
        return Err(DiscussionError::InvalidSetup("at least one role is required".into()));
    }
    let mut out: Vec<String> = Vec::with_capacity(roles.len());
    for role in roles {
        let role = role.trim();
        if role.is_empty() {
            return Err(DiscussionError::InvalidSetup("role names must not be empty".into()));
        }
        if role == DIRECTIVE_ROLE {
            return Err(DiscussionError::InvalidSetup(format!(
                "role name {DIRECTIVE_ROLE:?} is reserved"
            )));
        }
        if out.iter().any(|r| r == role) {
            return Err(DiscussionError::InvalidSetup(format!("duplicate role {role:?}")));
        }
        out.push(role.to_string());
    }
    Ok(out)
}
