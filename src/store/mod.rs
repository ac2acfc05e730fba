//! Persistence abstraction for users, conversations, turns and documents.
//!
//! The [`ConversationStore`] trait is the only way the orchestrator touches
//! storage. Two backends ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | the CLI and HTTP server (sqlx, WAL) |
//! | [`InMemoryStore`] | tests and embedding in other programs |
//!
//! Implementations must be `Send + Sync`. Turn sequence numbers are assigned
//! by the store, so two writers can never produce the same `seq` for one
//! conversation.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Conversation, DocumentArtifact, DocumentInfo, Role, Turn, User};

/// Abstract storage backend for ragchat.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append_turn`](ConversationStore::append_turn) | Persist a turn with the next `seq` and bump `last_updated` |
/// | [`recent_turns`](ConversationStore::recent_turns) | Latest `n` turns, oldest first |
/// | [`update_summary`](ConversationStore::update_summary) | Replace the rolling summary |
/// | [`save_document`](ConversationStore::save_document) | Store an artifact with its chunks and vectors atomically |
/// | [`get_document`](ConversationStore::get_document) | The conversation's earliest artifact |
/// | [`delete_conversation`](ConversationStore::delete_conversation) | Remove a conversation and everything under it |
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// A user's conversations, most recently active first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// Append a turn. The store assigns `seq` and updates the
    /// conversation's `last_updated`.
    async fn append_turn(&self, conversation_id: &str, role: Role, content: &str) -> Result<Turn>;

    /// The latest `limit` turns in ascending `seq` order.
    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// All turns in ascending `seq` order.
    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>>;

    async fn update_summary(&self, conversation_id: &str, summary: &str) -> Result<()>;

    async fn save_document(&self, artifact: &DocumentArtifact) -> Result<()>;

    /// The earliest artifact uploaded to the conversation, if any.
    async fn get_document(&self, conversation_id: &str) -> Result<Option<DocumentArtifact>>;

    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<DocumentInfo>>;

    /// Returns `false` when the conversation did not exist.
    async fn delete_conversation(&self, id: &str) -> Result<bool>;
}
