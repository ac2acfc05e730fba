//! Similarity ranking over a document's chunk vectors.
//!
//! [`retrieve`] embeds the query, scores every chunk by cosine similarity,
//! and joins the best `top_k` chunks (highest first) with blank lines. It
//! never fails: without usable vectors it falls back to the first `top_k`
//! chunks in document order, and without chunks it returns
//! [`NO_CONTENT_SENTINEL`].

use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};

/// Returned when there is nothing to retrieve from.
pub const NO_CONTENT_SENTINEL: &str = "No document content available.";

/// Separator between retrieved chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// How a [`Retrieved`] text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Ranked by similarity to the query.
    Ranked,
    /// Leading chunks in document order, used when ranking was impossible.
    DocumentOrder,
    /// No chunks were available; the text is the sentinel.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Position in the document's chunk sequence.
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub text: String,
    pub source: RetrievalSource,
    /// Selected chunks, best first. Empty unless `source` is `Ranked`.
    pub scores: Vec<ScoredChunk>,
}

/// Score every chunk vector against the query, best first.
///
/// The sort is stable, so chunks with equal scores keep document order.
pub fn rank(query_vec: &[f32], vectors: &[Vec<f32>]) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = vectors
        .iter()
        .enumerate()
        .map(|(index, v)| ScoredChunk {
            index,
            score: cosine_similarity(query_vec, v),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// Select the chunks most relevant to `query`.
pub async fn retrieve(
    embedder: &Embedder,
    query: &str,
    chunks: &[String],
    vectors: &[Vec<f32>],
    top_k: usize,
) -> Retrieved {
    if chunks.is_empty() || vectors.is_empty() {
        return Retrieved {
            text: NO_CONTENT_SENTINEL.to_string(),
            source: RetrievalSource::Empty,
            scores: Vec::new(),
        };
    }

    if chunks.len() != vectors.len() {
        tracing::warn!(
            chunks = chunks.len(),
            vectors = vectors.len(),
            "chunk/vector count mismatch, using document order"
        );
        return document_order(chunks, top_k);
    }

    let preview: String = query.chars().take(50).collect();
    tracing::debug!("retrieving relevant chunks for: '{}'", preview);

    let Some(query_vec) = embedder.embed_query(query).await else {
        tracing::warn!("query embedding failed, using document order");
        return document_order(chunks, top_k);
    };

    let mut scores = rank(&query_vec, vectors);
    scores.truncate(top_k);
    tracing::debug!(
        "top chunk scores: {:?}",
        scores
            .iter()
            .map(|s| format!("{:.3}", s.score))
            .collect::<Vec<_>>()
    );

    let text = scores
        .iter()
        .map(|s| chunks[s.index].as_str())
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR);

    Retrieved {
        text,
        source: RetrievalSource::Ranked,
        scores,
    }
}

fn document_order(chunks: &[String], top_k: usize) -> Retrieved {
    Retrieved {
        text: chunks
            .iter()
            .take(top_k)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR),
        source: RetrievalSource::DocumentOrder,
        scores: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::{DisabledProvider, EmbeddingProvider};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Maps "red"/"green"/"blue" to unit axes; anything else to the zero vector.
    struct Colors;

    #[async_trait]
    impl EmbeddingProvider for Colors {
        fn model_name(&self) -> &str {
            "colors"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "red" => vec![1.0, 0.0, 0.0],
                    "green" => vec![0.0, 1.0, 0.0],
                    "blue" => vec![0.0, 0.0, 1.0],
                    _ => vec![0.0, 0.0, 0.0],
                })
                .collect())
        }
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            min_interval_ms: 0,
            ..EmbeddingConfig::default()
        }
    }

    fn colors() -> Embedder {
        Embedder::new(Arc::new(Colors), &config())
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk {}", i)).collect()
    }

    #[test]
    fn rank_is_stable_on_ties() {
        let vectors = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
        ];
        let ranked = rank(&[1.0, 0.0], &vectors);
        let order: Vec<usize> = ranked.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn zero_vectors_rank_last() {
        let vectors = vec![vec![0.0, 0.0], vec![-1.0, 0.5], vec![0.2, 0.9]];
        let ranked = rank(&[0.0, 1.0], &vectors);
        assert_eq!(ranked[0].index, 2);
        assert_eq!(ranked[1].index, 1);
        assert_eq!(ranked[2].index, 0);
        assert_eq!(ranked[2].score, 0.0);
    }

    #[tokio::test]
    async fn empty_inputs_return_sentinel() {
        let embedder = colors();
        let r = retrieve(&embedder, "red", &[], &[], 3).await;
        assert_eq!(r.text, NO_CONTENT_SENTINEL);
        assert_eq!(r.source, RetrievalSource::Empty);

        let r = retrieve(&embedder, "red", &chunks(2), &[], 3).await;
        assert_eq!(r.source, RetrievalSource::Empty);
    }

    #[tokio::test]
    async fn ranked_order_best_first() {
        let embedder = colors();
        let chunks = vec![
            "about blue".to_string(),
            "about red".to_string(),
            "about green".to_string(),
            "about red again".to_string(),
        ];
        let vectors = vec![
            vec![0.0, 0.0, 1.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
        ];
        let r = retrieve(&embedder, "red", &chunks, &vectors, 2).await;
        assert_eq!(r.source, RetrievalSource::Ranked);
        assert_eq!(r.text, "about red again\n\nabout red");
        assert_eq!(r.scores.len(), 2);
        assert_eq!(r.scores[0].index, 3);
    }

    #[tokio::test]
    async fn top_k_larger_than_chunks() {
        let embedder = colors();
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let r = retrieve(&embedder, "green", &chunks(2), &vectors, 10).await;
        assert_eq!(r.text, "chunk 1\n\nchunk 0");
    }

    #[tokio::test]
    async fn failed_query_embedding_uses_document_order() {
        let embedder = Embedder::new(Arc::new(DisabledProvider::new(3)), &config());
        let vectors = vec![vec![1.0, 0.0, 0.0]; 5];
        let r = retrieve(&embedder, "anything", &chunks(5), &vectors, 3).await;
        assert_eq!(r.source, RetrievalSource::DocumentOrder);
        assert_eq!(r.text, "chunk 0\n\nchunk 1\n\nchunk 2");
    }

    #[tokio::test]
    async fn mismatched_lengths_use_document_order() {
        let embedder = colors();
        let vectors = vec![vec![1.0, 0.0, 0.0]; 2];
        let r = retrieve(&embedder, "red", &chunks(4), &vectors, 3).await;
        assert_eq!(r.source, RetrievalSource::DocumentOrder);
        assert_eq!(r.text, "chunk 0\n\nchunk 1\n\nchunk 2");
    }
}
