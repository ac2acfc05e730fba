//! Conversation orchestration.
//!
//! The [`Orchestrator`] owns the per-message workflow: persist the user
//! turn, summarize on cadence, build the context window, compose a prompt
//! for the conversation's mode, generate, and persist the reply. It also
//! fronts the surrounding operations (users, uploads, listings, deletion)
//! so the CLI and HTTP server share one code path.
//!
//! # Message flow
//!
//! ```text
//! user message ─► append turn ─► count % summarize_every == 0 ? ─► summarize + extend
//!                                        │
//!                                        ▼
//!                          latest context_window turns
//!                           │                     │
//!                      chat mode            document mode
//!                  compose_chat(..)   earliest artifact ─► retrieve ─► compose_grounded(..)
//!                           │                     │
//!                           └──────► generate ◄───┘  (fallback reply on failure)
//!                                        │
//!                                 append assistant turn
//! ```
//!
//! Provider failures never surface as errors here: every fallback is
//! reported on the [`Reply`] instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::compose::{compose_chat, compose_grounded, Prompt};
use crate::config::Config;
use crate::embedding::{create_provider, Embedder};
use crate::error::ChatError;
use crate::generation::{create_generator, generate_with_timeout, GenerationProvider};
use crate::ingest::{prepare_upload, UploadReport};
use crate::models::{Conversation, ConversationDetail, DocumentInfo, Mode, Role, Turn, User};
use crate::retrieval::{retrieve, RetrievalSource};
use crate::store::ConversationStore;
use crate::summarize::{extend_summary, summary_due, Summarizer};

pub const CHAT_FALLBACK_REPLY: &str = "Sorry, I'm having trouble responding right now.";
pub const DOCUMENT_FALLBACK_REPLY: &str = "Sorry, I couldn't process your question.";
pub const UPLOAD_PROMPT_REPLY: &str = "Please upload a document to start RAG conversation.";

/// Tunables for the orchestrator, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_tokens: usize,
    pub top_k: usize,
    pub summarize_every: usize,
    pub summary_window: usize,
    pub context_window: usize,
    pub title_chars: usize,
    pub generation_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            top_k: 3,
            summarize_every: 15,
            summary_window: 15,
            context_window: 10,
            title_chars: 50,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens: config.chunking.max_tokens,
            top_k: config.retrieval.top_k,
            summarize_every: config.conversation.summarize_every,
            summary_window: config.conversation.summary_window,
            context_window: config.conversation.context_window,
            title_chars: config.conversation.title_chars,
            generation_timeout: config.generation.call_deadline(),
        }
    }
}

/// The assistant's answer to one user message.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub conversation_id: String,
    pub text: String,
    /// The text is a canned fallback because generation failed.
    pub degraded: bool,
    /// A summary was produced before this reply.
    pub summarized: bool,
    /// How document context was selected; `None` outside document mode.
    pub retrieval: Option<RetrievalSource>,
    pub turn: Turn,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedConversation {
    pub conversation: Conversation,
    pub reply: Reply,
}

/// Result of [`Orchestrator::create_user`].
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    /// `false` when a user with the same email already existed.
    pub created: bool,
}

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    embedder: Arc<Embedder>,
    generator: Arc<dyn GenerationProvider>,
    summarizer: Summarizer,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        embedder: Arc<Embedder>,
        generator: Arc<dyn GenerationProvider>,
        settings: Settings,
    ) -> Self {
        let summarizer = Summarizer::new(generator.clone(), settings.generation_timeout);
        Self {
            store,
            embedder,
            generator,
            summarizer,
            settings,
        }
    }

    /// Build providers from config and wire them to `store`.
    pub fn from_config(config: &Config, store: Arc<dyn ConversationStore>) -> anyhow::Result<Self> {
        let embedder = Embedder::new(create_provider(&config.embedding)?, &config.embedding);
        let generator = create_generator(&config.generation)?;
        tracing::info!(
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            "orchestrator ready"
        );
        Ok(Self::new(
            store,
            Arc::new(embedder),
            generator,
            Settings::from_config(config),
        ))
    }

    // ---- users ----

    /// Create a user, or return the existing one with the same email.
    pub async fn create_user(&self, name: &str, email: &str) -> Result<Registration, ChatError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(ChatError::MissingField("name"));
        }
        if email.is_empty() {
            return Err(ChatError::MissingField("email"));
        }

        if let Some(user) = self.store.find_user_by_email(email).await? {
            tracing::info!(user_id = %user.id, "user already exists");
            return Ok(Registration {
                user,
                created: false,
            });
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.store.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "created user");
        Ok(Registration {
            user,
            created: true,
        })
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ChatError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ChatError::UserNotFound(id.to_string()))
    }

    // ---- conversations ----

    /// Create a conversation from its first message and answer it.
    ///
    /// Document-mode conversations have no document yet, so they get a
    /// fixed prompt to upload one instead of a generated reply.
    pub async fn start_conversation(
        &self,
        user_id: &str,
        first_message: &str,
        mode: Mode,
    ) -> Result<StartedConversation, ChatError> {
        if first_message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.get_user(user_id).await?;

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: first_message.chars().take(self.settings.title_chars).collect(),
            mode,
            summary: None,
            created_at: now,
            last_updated: now,
        };
        self.store.create_conversation(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id, %mode, "started conversation");

        self.store
            .append_turn(&conversation.id, Role::User, first_message)
            .await?;

        let reply = match mode {
            Mode::Chat => self.respond(&conversation, first_message).await?,
            Mode::Document => {
                let turn = self
                    .store
                    .append_turn(&conversation.id, Role::Assistant, UPLOAD_PROMPT_REPLY)
                    .await?;
                Reply {
                    conversation_id: conversation.id.clone(),
                    text: turn.content.clone(),
                    degraded: false,
                    summarized: false,
                    retrieval: None,
                    turn,
                }
            }
        };

        Ok(StartedConversation {
            conversation,
            reply,
        })
    }

    /// Handle one user message.
    ///
    /// The user turn is persisted before anything can fail on the model
    /// side; a document-mode conversation without a document returns
    /// [`ChatError::NoDocument`] after that write.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Reply, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let mut conversation = self.conversation(conversation_id).await?;

        let turn = self
            .store
            .append_turn(conversation_id, Role::User, content)
            .await?;

        // seq is the turn count; only the sender that lands on a multiple summarizes.
        let count = usize::try_from(turn.seq).unwrap_or_default();
        let summarized = self.maybe_summarize(&mut conversation, count).await?;

        let mut reply = self.respond(&conversation, content).await?;
        reply.summarized = summarized;
        Ok(reply)
    }

    pub async fn conversation_detail(&self, id: &str) -> Result<ConversationDetail, ChatError> {
        let conversation = self.conversation(id).await?;
        let turns = self.store.list_turns(id).await?;
        Ok(ConversationDetail {
            conversation,
            turns,
        })
    }

    /// A user's conversations, most recently active first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.store.list_conversations(user_id).await?)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ChatError> {
        if !self.store.delete_conversation(id).await? {
            return Err(ChatError::ConversationNotFound(id.to_string()));
        }
        tracing::info!(conversation_id = %id, "deleted conversation");
        Ok(())
    }

    // ---- documents ----

    /// Extract, chunk, embed and store an uploaded file.
    pub async fn upload_document(
        &self,
        conversation_id: &str,
        filename: &str,
        bytes: &[u8],
        title: Option<&str>,
    ) -> Result<UploadReport, ChatError> {
        self.conversation(conversation_id).await?;
        tracing::info!(conversation_id, filename, bytes = bytes.len(), "uploading document");

        let (artifact, report) = prepare_upload(
            &self.embedder,
            conversation_id,
            filename,
            title,
            bytes,
            self.settings.max_tokens,
        )
        .await?;

        self.store.save_document(&artifact).await?;
        tracing::info!(
            document_id = %report.document_id,
            chunks = report.chunks_count,
            degraded = report.degraded_embeddings,
            "document saved"
        );
        Ok(report)
    }

    pub async fn list_documents(&self, conversation_id: &str) -> Result<Vec<DocumentInfo>, ChatError> {
        self.conversation(conversation_id).await?;
        Ok(self.store.list_documents(conversation_id).await?)
    }

    // ---- internals ----

    async fn conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))
    }

    /// Summarize the latest window when `count` hits the cadence.
    async fn maybe_summarize(
        &self,
        conversation: &mut Conversation,
        count: usize,
    ) -> Result<bool, ChatError> {
        if !summary_due(count, self.settings.summarize_every) {
            return Ok(false);
        }

        let window = self
            .store
            .recent_turns(&conversation.id, self.settings.summary_window)
            .await?;
        let summary = self.summarizer.summarize(&window).await;
        let extended = extend_summary(conversation.summary.as_deref(), summary.as_str());

        self.store
            .update_summary(&conversation.id, &extended)
            .await?;
        tracing::info!(
            conversation_id = %conversation.id,
            turns = count,
            fallback = summary.is_fallback(),
            "conversation summarized"
        );
        conversation.summary = Some(extended);
        Ok(true)
    }

    /// Compose, generate and persist the assistant turn for `query`.
    async fn respond(&self, conversation: &Conversation, query: &str) -> Result<Reply, ChatError> {
        let summary = conversation.summary.as_deref();

        let (prompt, retrieval, fallback) = match conversation.mode {
            Mode::Chat => {
                let window = self
                    .store
                    .recent_turns(&conversation.id, self.settings.context_window)
                    .await?;
                (compose_chat(summary, &window), None, CHAT_FALLBACK_REPLY)
            }
            Mode::Document => {
                let artifact = self
                    .store
                    .get_document(&conversation.id)
                    .await?
                    .ok_or_else(|| ChatError::NoDocument(conversation.id.clone()))?;
                let retrieved = retrieve(
                    &self.embedder,
                    query,
                    artifact.chunks(),
                    artifact.vectors(),
                    self.settings.top_k,
                )
                .await;
                (
                    compose_grounded(summary, query, &retrieved.text),
                    Some(retrieved.source),
                    DOCUMENT_FALLBACK_REPLY,
                )
            }
        };

        let (text, degraded) = match self.generate(&prompt).await {
            Some(text) => (text, false),
            None => (fallback.to_string(), true),
        };

        let turn = self
            .store
            .append_turn(&conversation.id, Role::Assistant, &text)
            .await?;

        Ok(Reply {
            conversation_id: conversation.id.clone(),
            text,
            degraded,
            summarized: false,
            retrieval,
            turn,
        })
    }

    async fn generate(&self, prompt: &Prompt) -> Option<String> {
        match generate_with_timeout(self.generator.as_ref(), prompt, self.settings.generation_timeout)
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                tracing::warn!("generation returned empty text, using fallback reply");
                None
            }
            Err(e) => {
                tracing::warn!("generation failed, using fallback reply: {:#}", e);
                None
            }
        }
    }
}
