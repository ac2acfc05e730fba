//! Typed errors surfaced by the conversation core.
//!
//! Provider failures never appear here: the embedder, ranker, summarizer
//! and reply step each carry their own fallback value instead. What remains
//! are input errors the caller must act on, artifact consistency errors, and
//! storage failures from the persistence collaborator.

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("document is empty or no text could be extracted")]
    EmptyDocument,

    #[error("message content must not be empty")]
    EmptyMessage,

    #[error("chunk size must be > 0")]
    InvalidChunkSize,

    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("invalid conversation mode: '{0}' (expected chat or document)")]
    InvalidMode(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("no document uploaded for conversation {0}")]
    NoDocument(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Chunks and vectors disagree in length; the artifact is never stored.
    #[error("embedding produced {vectors} vectors for {chunks} chunks")]
    ArtifactMismatch { chunks: usize, vectors: usize },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    /// True for errors caused by the request rather than by the backend.
    pub fn is_input_error(&self) -> bool {
        !matches!(
            self,
            ChatError::ArtifactMismatch { .. } | ChatError::Storage(_)
        )
    }
}
