//! Embedding service with retry.
//!
//! Wraps a provider's `embed` with two retries (1 s, then 2 s backoff).
//! When all attempts fail, the error carries the model, input count, and
//! total character volume so the failure is diagnosable from logs alone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::traits::LlmProvider;

const MAX_RETRIES: usize = 2;
const BACKOFF_SECONDS: [u64; MAX_RETRIES] = [1, 2];

/// Generates embeddings through an `LlmProvider`, with retry.
pub struct EmbeddingService {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a batch of texts.
    pub async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            match self.provider.embed(texts, &self.model).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let wait = BACKOFF_SECONDS[attempt];
                        warn!(
                            attempt = attempt + 1,
                            model = %self.model,
                            input_count = texts.len(),
                            "embedding attempt failed, retrying in {wait}s"
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let total_chars: usize = texts.iter().map(|t| t.len()).sum();
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("embedding failed"))).with_context(|| {
            format!(
                "embedding failed after {} attempts: model={}, input_count={}, total_chars={}",
                MAX_RETRIES + 1,
                self.model,
                texts.len(),
                total_chars
            )
        })
    }

    /// Embed a single text.
    pub async fn embed_single(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("provider returned no embedding"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
