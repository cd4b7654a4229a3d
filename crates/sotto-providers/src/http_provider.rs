//! HTTP client for OpenAI-compatible chat and embedding APIs.
//!
//! One provider covers OpenAI, OpenRouter, DeepSeek, Groq, vLLM, and any
//! other backend speaking `/chat/completions` + `/embeddings`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use sotto_core::config::ProviderConfig;
use sotto_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::traits::{LlmProvider, LlmRequestConfig};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Request body for the embeddings endpoint.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// Generic provider for OpenAI-compatible HTTP APIs.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig, default_model: &str) -> Self {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: default_model.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        debug!(
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let result = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "LM request failed");
                return LlmResponse::error(format!("Error calling LM: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(status = %status, body = %body, "LM API error");
            return LlmResponse::error(format!("Error calling LM: {status} — {body}"));
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(chat_resp) => {
                let llm: LlmResponse = chat_resp.into();
                debug!(
                    has_content = llm.content.is_some(),
                    tool_calls = llm.tool_calls.len(),
                    "LM response received"
                );
                llm
            }
            Err(e) => {
                error!(error = %e, "failed to parse LM response");
                LlmResponse::error(format!("Error parsing LM response: {e}"))
            }
        }
    }

    async fn embed(&self, texts: &[String], model: &str) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.url("embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embeddings API returned {status}: {body}");
        }

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        "http"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        let config = ProviderConfig {
            api_key: "test-key".to_string(),
            api_base: Some(server.uri()),
        };
        HttpProvider::new(&config, "test-model")
    }

    #[tokio::test]
    async fn test_chat_plain_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": "Hello there!"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await;

        assert_eq!(response.content.as_deref(), Some("Hello there!"));
        assert!(!response.has_tool_calls());
    }

    #[tokio::test]
    async fn test_chat_tool_call_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "list_dir", "arguments": "{\"path\": \".\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("list files")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await;

        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].function.name, "list_dir");
    }

    #[tokio::test]
    async fn test_chat_api_error_becomes_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await;

        let content = response.content.unwrap();
        assert!(content.starts_with("Error calling LM"));
        assert!(content.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [0.1, 0.2, 0.3]},
                    {"embedding": [0.4, 0.5, 0.6]}
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let vectors = provider
            .embed(&["one".to_string(), "two".to_string()], "embed-model")
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_empty_input() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        let vectors = provider.embed(&[], "embed-model").await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn test_embed_error_bubbles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result = provider.embed(&["text".to_string()], "embed-model").await;
        assert!(result.is_err());
    }
}
