//! Rolling conversation summaries.
//!
//! The [`Summarizer`] condenses a window of turns with one generation call.
//! It is best-effort: any failure yields [`Summary::Fallback`], whose text is
//! [`FALLBACK_SUMMARY`]. [`extend_summary`] appends a new summary to the
//! prior one so earlier context is never lost.

use std::sync::Arc;
use std::time::Duration;

use crate::compose::{Prompt, PromptMessage};
use crate::generation::{generate_with_timeout, GenerationProvider};
use crate::models::Turn;

pub const FALLBACK_SUMMARY: &str = "Previous conversation context.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Generated(String),
    Fallback,
}

impl Summary {
    pub fn as_str(&self) -> &str {
        match self {
            Summary::Generated(text) => text,
            Summary::Fallback => FALLBACK_SUMMARY,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Summary::Fallback)
    }
}

/// True when a conversation holding `count` turns is due for a summary.
pub fn summary_due(count: usize, every: usize) -> bool {
    every > 0 && count > 0 && count % every == 0
}

/// Join a new summary onto any prior summary with a blank line.
pub fn extend_summary(prior: Option<&str>, new: &str) -> String {
    match prior.filter(|p| !p.trim().is_empty()) {
        Some(prior) => format!("{}\n\n{}", prior, new),
        None => new.to_string(),
    }
}

/// Build the summarization request for a window of turns.
pub fn summary_prompt(turns: &[Turn]) -> Prompt {
    let transcript = turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n");

    Prompt::single(PromptMessage::user(format!(
        "Summarize this conversation concisely in 2-3 sentences:\n\n{}\n\nSummary:",
        transcript
    )))
}

pub struct Summarizer {
    generator: Arc<dyn GenerationProvider>,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn GenerationProvider>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub async fn summarize(&self, turns: &[Turn]) -> Summary {
        if turns.is_empty() {
            return Summary::Fallback;
        }

        let prompt = summary_prompt(turns);
        match generate_with_timeout(self.generator.as_ref(), &prompt, self.timeout).await {
            Ok(text) if !text.trim().is_empty() => Summary::Generated(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!("summary generation returned empty text, using fallback");
                Summary::Fallback
            }
            Err(e) => {
                tracing::warn!("summary generation failed, using fallback: {:#}", e);
                Summary::Fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DisabledGenerator;
    use crate::models::Role;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Fixed(&'static str);

    #[async_trait]
    impl GenerationProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _prompt: &Prompt) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn turns() -> Vec<Turn> {
        [(Role::User, "hello"), (Role::Assistant, "hi!")]
            .iter()
            .enumerate()
            .map(|(i, (role, content))| Turn {
                id: i.to_string(),
                conversation_id: "c".into(),
                seq: i as i64 + 1,
                role: *role,
                content: content.to_string(),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn cadence_hits_multiples_only() {
        assert!(!summary_due(0, 15));
        assert!(!summary_due(14, 15));
        assert!(summary_due(15, 15));
        assert!(!summary_due(16, 15));
        assert!(summary_due(30, 15));
        assert!(!summary_due(30, 0));
    }

    #[test]
    fn extend_appends_with_blank_line() {
        assert_eq!(extend_summary(None, "first"), "first");
        assert_eq!(extend_summary(Some(""), "first"), "first");
        assert_eq!(extend_summary(Some("first"), "second"), "first\n\nsecond");
    }

    #[test]
    fn prompt_contains_transcript() {
        let prompt = summary_prompt(&turns());
        let content = &prompt.messages[0].content;
        assert!(content.contains("user: hello\nassistant: hi!"));
        assert!(content.ends_with("Summary:"));
    }

    #[tokio::test]
    async fn generated_summary_is_trimmed() {
        let s = Summarizer::new(Arc::new(Fixed("  They greeted.  ")), Duration::from_secs(1));
        assert_eq!(
            s.summarize(&turns()).await,
            Summary::Generated("They greeted.".into())
        );
    }

    #[tokio::test]
    async fn failures_fall_back() {
        let s = Summarizer::new(Arc::new(DisabledGenerator), Duration::from_secs(1));
        let summary = s.summarize(&turns()).await;
        assert!(summary.is_fallback());
        assert_eq!(summary.as_str(), FALLBACK_SUMMARY);

        let s = Summarizer::new(Arc::new(Fixed("   ")), Duration::from_secs(1));
        assert!(s.summarize(&turns()).await.is_fallback());
        assert!(s.summarize(&[]).await.is_fallback());
    }
}
