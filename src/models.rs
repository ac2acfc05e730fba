//! Core data models used throughout ragchat.
//!
//! These types represent users, conversations, turns, and the document
//! artifacts that flow between the upload pipeline, the persistence layer,
//! and the conversation orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            // Gemini-style history labels the assistant "model".
            "assistant" | "model" => Ok(Role::Assistant),
            other => anyhow::bail!("unknown role: {}", other),
        }
    }
}

/// Conversation mode, fixed when the conversation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    /// Answers are grounded in the conversation's uploaded document.
    Document,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Document => "document",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Mode::Chat),
            "document" | "rag" => Ok(Mode::Document),
            _ => Err(ChatError::InvalidMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation state without its turns.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub mode: Mode,
    /// Rolling summary; only ever extended.
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One message in a conversation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    /// 1-based position within the conversation.
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation together with its turns in order.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
}

/// Chunks and their embedding vectors for one uploaded document.
///
/// `chunks[i]` is embedded as `vectors[i]`. The constructor rejects any
/// other shape, so a stored artifact always satisfies the invariant.
#[derive(Debug, Clone)]
pub struct DocumentArtifact {
    pub id: String,
    pub conversation_id: String,
    pub title: String,
    /// Leading slice of the extracted text.
    pub preview: String,
    /// SHA-256 of the full extracted text.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// Fields of a [`DocumentArtifact`] other than chunks and vectors.
#[derive(Debug, Clone)]
pub struct ArtifactHeader {
    pub id: String,
    pub conversation_id: String,
    pub title: String,
    pub preview: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentArtifact {
    pub fn new(
        header: ArtifactHeader,
        chunks: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, ChatError> {
        if chunks.len() != vectors.len() {
            return Err(ChatError::ArtifactMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        Ok(Self {
            id: header.id,
            conversation_id: header.conversation_id,
            title: header.title,
            preview: header.preview,
            content_hash: header.content_hash,
            created_at: header.created_at,
            chunks,
            vectors,
        })
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            chunks_count: self.chunks.len(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry for an uploaded document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    pub chunks_count: usize,
    pub created_at: DateTime<Utc>,
}
