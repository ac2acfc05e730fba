use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

/// Vectors for a batch of texts, plus the indices that fell back to zero.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub failed: Vec<usize>,
}

impl EmbeddingBatch {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn into_vectors(self) -> Vec<Vec<f32>> {
        self.vectors
    }
}

/// Enforces a minimum interval between successive provider calls.
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the previous call.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Fail-soft front end over an [`EmbeddingProvider`].
///
/// Texts are sent in batches of `batch_size`. A batch that errors, times
/// out, or returns the wrong number of vectors is retried one text at a
/// time; a text that still fails, or whose vector has the wrong
/// dimensionality, becomes the zero vector.
///
/// Each provider call runs under [`EmbeddingConfig::call_deadline`], which
/// leaves the HTTP providers room to finish their own retries.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
    batch_size: usize,
    call_timeout: Duration,
    pacer: Pacer,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            dims: provider.dims(),
            provider,
            batch_size: config.batch_size.max(1),
            call_timeout: config.call_deadline(),
            pacer: Pacer::new(config.min_interval()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dims]
    }

    /// Embed every text. The result always holds `texts.len()` vectors.
    pub async fn embed(&self, texts: &[String]) -> EmbeddingBatch {
        let mut batch = EmbeddingBatch {
            vectors: Vec::with_capacity(texts.len()),
            failed: Vec::new(),
        };

        for (group_index, group) in texts.chunks(self.batch_size).enumerate() {
            let offset = group_index * self.batch_size;

            match self.call(group).await {
                Ok(vectors) if vectors.len() == group.len() => {
                    for (i, vector) in vectors.into_iter().enumerate() {
                        self.accept(&mut batch, offset + i, Ok(vector));
                    }
                }
                outcome => {
                    match outcome {
                        Err(e) => tracing::warn!(offset, size = group.len(), "embedding batch failed: {:#}", e),
                        Ok(vectors) => tracing::warn!(
                            offset,
                            expected = group.len(),
                            got = vectors.len(),
                            "embedding batch returned wrong number of vectors"
                        ),
                    }

                    if group.len() == 1 {
                        self.accept(&mut batch, offset, Err(anyhow::anyhow!("batch failed")));
                        continue;
                    }

                    for (i, text) in group.iter().enumerate() {
                        let single = self
                            .call(std::slice::from_ref(text))
                            .await
                            .and_then(|vectors| match vectors.into_iter().next() {
                                Some(vector) => Ok(vector),
                                None => bail!("provider returned no vector"),
                            });
                        self.accept(&mut batch, offset + i, single);
                    }
                }
            }
        }

        if batch.is_degraded() {
            tracing::warn!(
                failed = batch.failed.len(),
                total = texts.len(),
                "embedding fell back to zero vectors"
            );
        }
        batch
    }

    /// Embed a single query. `None` means the provider failed and no
    /// meaningful vector exists.
    pub async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let batch = self.embed(&[text.to_string()]).await;
        if batch.is_degraded() {
            return None;
        }
        batch.into_vectors().into_iter().next()
    }

    fn accept(&self, batch: &mut EmbeddingBatch, index: usize, vector: Result<Vec<f32>>) {
        match vector {
            Ok(v) if v.len() == self.dims => {
                tracing::debug!(index, "embedded item");
                batch.vectors.push(v);
            }
            Ok(v) => {
                tracing::warn!(index, expected = self.dims, got = v.len(), "embedding has wrong dimensionality");
                batch.failed.push(index);
                batch.vectors.push(self.zero_vector());
            }
            Err(e) => {
                tracing::warn!(index, "embedding failed: {:#}", e);
                batch.failed.push(index);
                batch.vectors.push(self.zero_vector());
            }
        }
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.pacer.wait().await;
        match tokio::time::timeout(self.call_timeout, self.provider.embed(texts)).await {
            Ok(result) => result,
            Err(_) => bail!("embedding call timed out after {:?}", self.call_timeout),
        }
    }
}
