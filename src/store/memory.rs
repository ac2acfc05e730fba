//! In-memory [`ConversationStore`] for tests and embedded use.
//!
//! All state sits behind one `std::sync::RwLock`, so every operation is
//! atomic with respect to the others. Nothing survives the process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::ConversationStore;
use crate::models::{Conversation, DocumentArtifact, DocumentInfo, Role, Turn, User};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    conversations: HashMap<String, Conversation>,
    /// Insertion order; per conversation this is also `seq` order.
    turns: Vec<Turn>,
    /// Upload order.
    documents: Vec<DocumentArtifact>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.email == user.email) {
            bail!("a user with email {} already exists", user.email);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.write()?
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.read()?.conversations.get(id).cloned())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .read()?
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(conversations)
    }

    async fn append_turn(&self, conversation_id: &str, role: Role, content: &str) -> Result<Turn> {
        let mut state = self.write()?;
        let now = Utc::now();

        match state.conversations.get_mut(conversation_id) {
            Some(conversation) => conversation.last_updated = now,
            None => bail!("conversation not found: {}", conversation_id),
        }

        let seq = state
            .turns
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .map(|t| t.seq)
            .max()
            .unwrap_or(0)
            + 1;

        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            created_at: now,
        };
        state.turns.push(turn.clone());
        Ok(turn)
    }

    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let mut turns = self.list_turns(conversation_id).await?;
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.split_off(skip))
    }

    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .read()?
            .turns
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn update_summary(&self, conversation_id: &str, summary: &str) -> Result<()> {
        let mut state = self.write()?;
        match state.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.summary = Some(summary.to_string());
                Ok(())
            }
            None => bail!("conversation not found: {}", conversation_id),
        }
    }

    async fn save_document(&self, artifact: &DocumentArtifact) -> Result<()> {
        let mut state = self.write()?;
        if !state.conversations.contains_key(&artifact.conversation_id) {
            bail!("conversation not found: {}", artifact.conversation_id);
        }
        state.documents.push(artifact.clone());
        Ok(())
    }

    async fn get_document(&self, conversation_id: &str) -> Result<Option<DocumentArtifact>> {
        Ok(self
            .read()?
            .documents
            .iter()
            .find(|d| d.conversation_id == conversation_id)
            .cloned())
    }

    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<DocumentInfo>> {
        Ok(self
            .read()?
            .documents
            .iter()
            .filter(|d| d.conversation_id == conversation_id)
            .map(DocumentArtifact::info)
            .collect())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        if state.conversations.remove(id).is_none() {
            return Ok(false);
        }
        state.turns.retain(|t| t.conversation_id != id);
        state.documents.retain(|d| d.conversation_id != id);
        Ok(true)
    }
}
