//! Whitespace-token text chunker.
//!
//! Splits document text into runs of at most `max_tokens` whitespace-delimited
//! tokens, rejoined with single spaces. Chunks keep source order, never
//! overlap, and are never empty.

use crate::error::ChatError;

/// Split text into chunks of at most `max_tokens` tokens each.
///
/// Fails with [`ChatError::EmptyDocument`] if the text is blank and with
/// [`ChatError::InvalidChunkSize`] if `max_tokens` is zero.
pub fn chunk_text(text: &str, max_tokens: usize) -> Result<Vec<String>, ChatError> {
    if max_tokens == 0 {
        return Err(ChatError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Err(ChatError::EmptyDocument);
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    let chunks = tokens
        .chunks(max_tokens)
        .map(|run| run.join(" "))
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    Ok(chunks)
}
