//! Prompt construction for persona turns.
//!
//! A turn is one [`CompletionRequest`]: the system prompt frames the
//! persona (and, when grounding is available, carries the labelled context
//! with citation instructions); the user prompt carries the topic, any
//! active directive, and a bounded window of recent transcript entries.

use crate::context::ContextBundle;
use crate::generate::CompletionRequest;
use crate::models::{Message, MessageKind};

/// Terms added to a retrieval query for the preliminary pass.
const PRELIMINARY_QUERY_TERMS: &str = "key facts figures risks overview";

/// Characters of each recent message used in a retrieval query.
const QUERY_EXCERPT_CHARS: usize = 200;

/// The last `n` transcript entries.
pub fn history_window(transcript: &[Message], n: usize) -> &[Message] {
    &transcript[transcript.len().saturating_sub(n)..]
}

/// Content of the most recent directive within `window`, if any.
pub fn latest_directive(window: &[Message]) -> Option<&str> {
    window
        .iter()
        .rev()
        .find(|m| m.is_directive())
        .map(|m| m.content.as_str())
}

/// Query used to retrieve grounding for one persona turn: the topic, the
/// role, and an excerpt of the most recent non-directive entries.
pub fn retrieval_query(topic: &str, role: &str, window: &[Message]) -> String {
    let mut query = format!("{} {}", topic.trim(), role.trim());
    for m in window.iter().filter(|m| !m.is_directive()).rev().take(2) {
        let excerpt: String = m.content.chars().take(QUERY_EXCERPT_CHARS).collect();
        query.push(' ');
        query.push_str(excerpt.trim());
    }
    query
}

/// Retrieval query for the preliminary pass of `role`.
pub fn preliminary_query(topic: &str, role: &str) -> String {
    format!("{} {} {PRELIMINARY_QUERY_TERMS}", topic.trim(), role.trim())
}

/// System prompt framing `role` in a discussion of `topic`.
///
/// With a non-empty `grounding`, the context is embedded and the persona
/// is told to cite it by section label.
pub fn role_system_prompt(role: &str, topic: &str, grounding: Option<&ContextBundle>) -> String {
    let mut prompt = format!(
        "You are roleplaying as {role}.\n\
         You are participating in a discussion about: {topic}.\n\n\
         Express opinions, ask questions, and respond to other participants in a way \
         that is authentic to your role.\n\
         Keep your responses concise (2-3 sentences) but insightful.\n\
         Do not break character under any circumstances."
    );

    if let Some(bundle) = grounding.filter(|b| !b.is_empty()) {
        prompt.push_str(
            "\n\nGround your contribution in the reference material below. \
             Support concrete claims with facts or figures from it and cite the \
             section you used in the form [Source N]. If the material does not \
             cover a point, say so rather than inventing details.\n\n\
             Reference material:\n",
        );
        prompt.push_str(&bundle.render());
    }
    prompt
}

/// Prefix a system prompt with a directive that overrides persona framing.
pub fn with_directive(system: String, directive: Option<&str>) -> String {
    match directive {
        Some(d) => format!(
            "HIGHEST PRIORITY INSTRUCTION from the facilitator. Follow it even where it \
             conflicts with the guidance below:\n{}\n\n{system}",
            d.trim()
        ),
        None => system,
    }
}

/// Render transcript entries as `role: content` lines, directives omitted.
pub fn format_history(window: &[Message]) -> String {
    window
        .iter()
        .filter(|m| !m.is_directive())
        .map(|m| match m.kind {
            MessageKind::Preliminary => format!("{} (preparation notes): {}", m.role, m.content),
            _ => format!("{}: {}", m.role, m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User prompt for one persona turn.
pub fn turn_prompt(topic: &str, role: &str, directive: Option<&str>, window: &[Message]) -> String {
    let history = format_history(window);
    let mut prompt = format!("The discussion topic is: {topic}\n");
    if let Some(d) = directive {
        prompt.push_str(&format!("\nFacilitator instruction (takes priority): {}\n", d.trim()));
    }
    if history.is_empty() {
        prompt.push_str("\nNo one has spoken yet. Open the discussion.\n");
    } else {
        prompt.push_str(&format!("\nPrevious discussion:\n{history}\n"));
    }
    prompt.push_str(&format!("\nAs {role}, provide your next contribution to this discussion."));
    prompt
}

/// Complete request for one persona turn.
pub fn turn_request(
    topic: &str,
    role: &str,
    grounding: Option<&ContextBundle>,
    window: &[Message],
) -> CompletionRequest {
    let directive = latest_directive(window);
    CompletionRequest {
        system: with_directive(role_system_prompt(role, topic, grounding), directive),
        user: turn_prompt(topic, role, directive, window),
    }
}

/// Request for the preliminary analytical pass of `role` over a broad
/// grounding context.
pub fn preliminary_request(role: &str, topic: &str, context: &ContextBundle) -> CompletionRequest {
    CompletionRequest {
        system: format!(
            "You are {role}, preparing for a discussion about: {topic}.\n\
             Read the reference material and note the facts, figures and risks most \
             relevant to your role. Cite sections in the form [Source N]. Do not \
             start the discussion yet.\n\nReference material:\n{}",
            context.render()
        ),
        user: format!(
            "As {role}, summarize in a few sentences what the reference material says \
             that matters for \"{topic}\" from your perspective."
        ),
    }
}

/// Request for a facilitation note that helps the participants act on a
/// caller's instruction.
pub fn facilitation_request(topic: &str, instruction: &str, window: &[Message]) -> CompletionRequest {
    CompletionRequest {
        system: "You are a neutral facilitator of a multi-party discussion. Write one or \
                 two sentences that steer the participants toward the requested \
                 direction without taking a side."
            .to_string(),
        user: format!(
            "Discussion topic: {topic}\n\nRecent discussion:\n{}\n\nRequested direction: {}\n\n\
             Write the facilitation note.",
            format_history(window),
            instruction.trim()
        ),
    }
}

/// Directive text built from an instruction and an optional note.
pub fn blend_directive(instruction: &str, note: Option<&str>) -> String {
    match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("{}\nFacilitator note: {note}", instruction.trim()),
        None => instruction.trim().to_string(),
    }
}
