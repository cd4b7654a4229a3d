//! The `LlmProvider` trait — the seam between the engine and any LM backend.

use async_trait::async_trait;

use sotto_core::types::{LlmResponse, Message, ToolDefinition};

/// Per-call request settings.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Trait all LM providers implement.
///
/// `chat` never raises into the agent loop: transport and API errors come
/// back as `LlmResponse::error(...)` content. `embed` is fallible — the
/// memory layer retries and degrades gracefully.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse;

    /// Generate embedding vectors for a batch of texts.
    async fn embed(&self, texts: &[String], model: &str) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
