//! Shared test doubles: a scripted LM provider and a deterministic embedder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use sotto_core::types::{LlmResponse, Message, ToolDefinition};
use sotto_providers::{LlmProvider, LlmRequestConfig};

use crate::memory::store::Embedder;

/// LM provider returning canned responses in sequence. When the script is
/// exhausted it returns a fixed plain response; when constructed with
/// `failing()`, every call errors.
pub struct MockProvider {
    responses: Mutex<Vec<LlmResponse>>,
    pub chat_calls: AtomicUsize,
    fail: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            chat_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn simple(text: &str) -> Self {
        Self::new(vec![LlmResponse {
            content: Some(text.into()),
            ..Default::default()
        }])
    }

    /// Provider whose chat always reports an error response and whose
    /// embed always fails.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            chat_calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _model: &str,
        _config: &LlmRequestConfig,
    ) -> LlmResponse {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return LlmResponse::error("Error calling LM: mock failure");
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            LlmResponse {
                content: Some("(no more responses)".into()),
                ..Default::default()
            }
        } else {
            responses.remove(0)
        }
    }

    async fn embed(&self, texts: &[String], _model: &str) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail {
            anyhow::bail!("mock embed failure");
        }
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn display_name(&self) -> &str {
        "MockProvider"
    }
}

/// Deterministic embedder mapping keyword hits to vector dimensions, so
/// related strings land near each other and unrelated ones do not.
pub struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }
}

pub fn stub_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let dims = ["rust", "coffee", "editor", "deploy", "name"];
    let mut v: Vec<f32> = dims
        .iter()
        .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
        .collect();
    // Length component keeps unrelated strings from being orthogonal-zero.
    v.push(1.0 + (lower.len() % 7) as f32 / 10.0);
    v
}

/// Shorthand for an LM response consisting only of tool calls.
pub fn tool_call_response(calls: Vec<sotto_core::types::ToolCall>) -> LlmResponse {
    LlmResponse {
        content: None,
        tool_calls: calls,
        ..Default::default()
    }
}

/// Shorthand for a plain-text LM response.
pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: Some(text.into()),
        ..Default::default()
    }
}

