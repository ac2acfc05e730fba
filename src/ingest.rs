//! Document upload pipeline.
//!
//! Coordinates extraction → chunking → embedding → artifact assembly for a
//! single uploaded file. Embedding is fail-soft (zero vectors stand in for
//! failed chunks) but the chunk/vector length invariant is checked before an
//! artifact is ever built, so nothing inconsistent reaches the store.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::error::ChatError;
use crate::extract::{extract_text, DocumentFormat};
use crate::models::{ArtifactHeader, DocumentArtifact};

/// Characters of extracted text kept as the document preview.
pub const PREVIEW_CHARS: usize = 1000;

/// Outcome of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub document_id: String,
    pub filename: String,
    pub title: String,
    pub chunks_count: usize,
    pub embeddings_count: usize,
    /// Chunks whose vector is the zero fallback.
    pub degraded_embeddings: usize,
    /// Extracted text length in characters.
    pub text_length: usize,
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turn already-extracted text into a [`DocumentArtifact`].
pub async fn build_artifact(
    embedder: &Embedder,
    conversation_id: &str,
    title: &str,
    text: &str,
    max_tokens: usize,
) -> Result<(DocumentArtifact, usize), ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyDocument);
    }

    let chunks = chunk_text(text, max_tokens)?;
    tracing::info!("created {} chunks from '{}'", chunks.len(), title);

    let batch = embedder.embed(&chunks).await;
    let degraded = batch.failed.len();
    if degraded > 0 {
        tracing::warn!(
            "{} of {} chunk embeddings fell back to zero vectors",
            degraded,
            chunks.len()
        );
    }

    let header = ArtifactHeader {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        title: title.to_string(),
        preview: preview(text),
        content_hash: content_hash(text),
        created_at: Utc::now(),
    };

    let artifact = DocumentArtifact::new(header, chunks, batch.into_vectors())?;
    Ok((artifact, degraded))
}

/// Extract, chunk and embed an uploaded file.
///
/// `title` defaults to `filename`. Returns the artifact ready to persist and
/// the report describing it.
pub async fn prepare_upload(
    embedder: &Embedder,
    conversation_id: &str,
    filename: &str,
    title: Option<&str>,
    bytes: &[u8],
    max_tokens: usize,
) -> Result<(DocumentArtifact, UploadReport), ChatError> {
    let format = DocumentFormat::from_filename(filename)?;
    let text = extract_text(bytes, format)?;

    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(filename);

    let (artifact, degraded) =
        build_artifact(embedder, conversation_id, title, &text, max_tokens).await?;

    let report = UploadReport {
        document_id: artifact.id.clone(),
        filename: filename.to_string(),
        title: artifact.title.clone(),
        chunks_count: artifact.len(),
        embeddings_count: artifact.vectors().len(),
        degraded_embeddings: degraded,
        text_length: text.chars().count(),
    };

    Ok((artifact, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::{DisabledProvider, EmbeddingProvider};
    use crate::extract::ExtractError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Ones;

    #[async_trait]
    impl EmbeddingProvider for Ones {
        fn model_name(&self) -> &str {
            "ones"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; 4]; texts.len()])
        }
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>) -> Embedder {
        let config = EmbeddingConfig {
            min_interval_ms: 0,
            ..EmbeddingConfig::default()
        };
        Embedder::new(provider, &config)
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[tokio::test]
    async fn twelve_hundred_words_make_three_chunks() {
        let text = words(1200);
        let (artifact, report) = prepare_upload(
            &embedder(Arc::new(Ones)),
            "c1",
            "notes.txt",
            None,
            text.as_bytes(),
            500,
        )
        .await
        .unwrap();

        assert_eq!(report.chunks_count, 3);
        assert_eq!(report.embeddings_count, 3);
        assert_eq!(report.degraded_embeddings, 0);
        assert_eq!(report.title, "notes.txt");
        assert_eq!(artifact.chunks()[2].split_whitespace().count(), 200);
        assert_eq!(artifact.preview.chars().count(), PREVIEW_CHARS);
        assert_eq!(artifact.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn failed_embeddings_still_produce_artifact() {
        let (artifact, report) = prepare_upload(
            &embedder(Arc::new(DisabledProvider::new(8))),
            "c1",
            "a.txt",
            Some("  My Notes "),
            words(10).as_bytes(),
            4,
        )
        .await
        .unwrap();

        assert_eq!(report.chunks_count, 3);
        assert_eq!(report.degraded_embeddings, 3);
        assert_eq!(report.title, "My Notes");
        assert!(artifact.vectors().iter().all(|v| v == &vec![0.0; 8]));
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let err = prepare_upload(
            &embedder(Arc::new(Ones)),
            "c1",
            "blank.txt",
            None,
            b" \n\t ",
            500,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::EmptyDocument));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let err = prepare_upload(
            &embedder(Arc::new(Ones)),
            "c1",
            "deck.pptx",
            None,
            b"whatever",
            500,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ChatError::Extract(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn preview_is_char_safe() {
        let text = "é".repeat(PREVIEW_CHARS + 10);
        assert_eq!(preview(&text).chars().count(), PREVIEW_CHARS);
    }
}
