//! Prompt assembly for the generation step.
//!
//! Chat mode sends the recent turns, preceded by a synthetic exchange that
//! carries the rolling summary. Document mode sends a single grounded
//! question built from the retrieved passages. Both are pure functions of
//! their inputs.

use serde::Serialize;

use crate::models::{Role, Turn};

pub const SUMMARY_ACKNOWLEDGEMENT: &str = "I understand the context.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered messages handed to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    pub fn single(message: PromptMessage) -> Self {
        Self {
            messages: vec![message],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn present(summary: Option<&str>) -> Option<&str> {
    summary.filter(|s| !s.trim().is_empty())
}

/// Build the chat-mode prompt: summary exchange, then the recent turns.
pub fn compose_chat(summary: Option<&str>, recent_turns: &[Turn]) -> Prompt {
    let mut messages = Vec::with_capacity(recent_turns.len() + 2);

    if let Some(summary) = present(summary) {
        messages.push(PromptMessage::user(format!(
            "Previous conversation summary: {}",
            summary
        )));
        messages.push(PromptMessage::assistant(SUMMARY_ACKNOWLEDGEMENT));
    }

    messages.extend(recent_turns.iter().map(|t| PromptMessage {
        role: t.role,
        content: t.content.clone(),
    }));

    Prompt { messages }
}

/// Build the document-mode prompt around retrieved context.
pub fn compose_grounded(summary: Option<&str>, question: &str, retrieved: &str) -> Prompt {
    let mut content = format!(
        "Context from documents: {}\n\nQuestion: {}\n\nAnswer based only on the context above.",
        retrieved, question
    );
    if let Some(summary) = present(summary) {
        content = format!("Previous conversation: {}\n\n{}", summary, content);
    }
    Prompt::single(PromptMessage::user(content))
}

/// Compose a prompt for either mode.
///
/// With `retrieved_text`, the latest user turn is the question and the
/// prompt is grounded; without it, the prompt is the chat transcript.
pub fn compose(summary: Option<&str>, recent_turns: &[Turn], retrieved_text: Option<&str>) -> Prompt {
    match retrieved_text {
        None => compose_chat(summary, recent_turns),
        Some(retrieved) => {
            let question = recent_turns
                .iter()
                .rev()
                .find(|t| t.role == Role::User)
                .map(|t| t.content.as_str())
                .unwrap_or_default();
            compose_grounded(summary, question, retrieved)
        }
    }
}
