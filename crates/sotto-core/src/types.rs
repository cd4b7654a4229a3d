//! Core chat types shared by the engine, providers, and adapters.
//!
//! Messages model the OpenAI chat-completions wire format. Rust enums catch
//! role/shape mismatches at compile time; the same types serialize to the
//! provider request body and to the session log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// A chat message. Each variant maps to a `role` field value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        /// Name of the tool that produced this result.
        #[serde(default)]
        name: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message with plain text content.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with multipart content (text + media refs).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: Some(tool_calls),
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        }
    }

    /// The role string for this message.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Plain-text view of the content, if there is one.
    ///
    /// Multipart user messages return their first text part.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System { content } => Some(content),
            Message::User {
                content: MessageContent::Text(text),
            } => Some(text),
            Message::User {
                content: MessageContent::Parts(parts),
            } => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    /// Whether this is an assistant turn that carries tool calls.
    pub fn has_tool_calls(&self) -> bool {
        matches!(
            self,
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } if !calls.is_empty()
        )
    }
}

/// User message content — plain text or multipart (media turns).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single part of a multipart user message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image reference payload (URL or base64 data URI).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ─────────────────────────────────────────────
// Tool calls and definitions
// ─────────────────────────────────────────────

/// A tool call requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Opaque ID, unique within one LM response; matches the tool result.
    pub id: String,
    /// Always "function".
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON-string arguments into a parameter map.
    ///
    /// Malformed arguments yield an empty map; the tool surfaces the
    /// missing-parameter error back to the LM.
    pub fn parsed_arguments(&self) -> HashMap<String, serde_json::Value> {
        serde_json::from_str(&self.function.arguments).unwrap_or_default()
    }
}

/// Function name and JSON-encoded arguments string.
///
/// The wire format requires `arguments` to be a JSON *string*, not an
/// object, regardless of how the provider returned it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool definition sent to the LM with every request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Schema of a function tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// LM responses
// ─────────────────────────────────────────────

/// Response from an LM provider after a chat completion call.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Text content (None when the turn is tool calls only).
    pub content: Option<String>,
    /// Tool calls, in the order the LM returned them.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
}

impl LlmResponse {
    /// An error surfaced as assistant content (never raises into the loop).
    pub fn error(msg: impl Into<String>) -> Self {
        LlmResponse {
            content: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Provider wire types
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible chat completion API.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Raw chat completion response, for deserialization.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantPayload,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantPayload {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl From<ChatCompletionResponse> for LlmResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        match resp.choices.into_iter().next() {
            Some(c) => LlmResponse {
                content: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                finish_reason: c.finish_reason,
                usage: resp.usage,
            },
            None => LlmResponse::error("No choices in response"),
        }
    }
}

// ─────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────

/// A conversation session: the ordered turn history for one
/// `channel:chat_id` pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Session {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Number of user turns in the session (drives extraction cadence).
    pub fn user_turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::User { .. }))
            .count()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_message_serialization() {
        let msg = Message::system("You are a helpful assistant.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are a helpful assistant.");
    }

    #[test]
    fn test_user_text_message_serialization() {
        let msg = Message::user("Hello, world!");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello, world!");
    }

    #[test]
    fn test_assistant_plain_serialization_omits_tool_calls() {
        let msg = Message::assistant("The answer is 42.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "The answer is 42.");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_assistant_tool_calls_serialization() {
        let calls = vec![ToolCall::new(
            "call_123",
            "web_search",
            r#"{"query": "rust"}"#,
        )];
        let msg = Message::assistant_tool_calls(None, calls);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        let calls = json["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["id"], "call_123");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "web_search");
        // Arguments must round-trip as a JSON string, not an object.
        assert!(calls[0]["function"]["arguments"].is_string());
    }

    #[test]
    fn test_tool_result_carries_name_and_id() {
        let msg = Message::tool_result("call_123", "read_file", "contents");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_123");
        assert_eq!(json["name"], "read_file");
        assert_eq!(json["content"], "contents");
    }

    #[test]
    fn test_tool_result_deserializes_without_name() {
        // Older session logs may lack the name field.
        let json = json!({"role": "tool", "tool_call_id": "c1", "content": "ok"});
        let msg: Message = serde_json::from_value(json).unwrap();
        match msg {
            Message::Tool { name, .. } => assert_eq!(name, ""),
            _ => panic!("Expected tool message"),
        }
    }

    #[test]
    fn test_parsed_arguments() {
        let tc = ToolCall::new("c1", "exec", r#"{"command": "ls"}"#);
        let args = tc.parsed_arguments();
        assert_eq!(args["command"], json!("ls"));
    }

    #[test]
    fn test_parsed_arguments_malformed_is_empty() {
        let tc = ToolCall::new("c1", "exec", "{not json");
        assert!(tc.parsed_arguments().is_empty());
    }

    #[test]
    fn test_has_tool_calls() {
        let plain = Message::assistant("hi");
        assert!(!plain.has_tool_calls());

        let with_calls =
            Message::assistant_tool_calls(None, vec![ToolCall::new("c1", "x", "{}")]);
        assert!(with_calls.has_tool_calls());
    }

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            Message::system("You are Sotto."),
            Message::user("What is 2+2?"),
            Message::assistant("The answer is 4."),
            Message::tool_result("call_1", "exec", "done"),
        ];

        let json_str = serde_json::to_string(&messages).unwrap();
        let deserialized: Vec<Message> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(messages, deserialized);
    }

    #[test]
    fn test_multipart_user_serialization() {
        let msg = Message::user_parts(vec![
            ContentPart::Text {
                text: "What's in this image?".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,abc123".to_string(),
                    detail: None,
                },
            },
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        let content = json["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
    }

    #[test]
    fn test_chat_completion_response_parsing() {
        let api_json = json!({
            "choices": [{
                "message": {"content": "Hello!", "tool_calls": null},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18}
        });

        let resp: ChatCompletionResponse = serde_json::from_value(api_json).unwrap();
        let llm: LlmResponse = resp.into();
        assert_eq!(llm.content.as_deref(), Some("Hello!"));
        assert!(!llm.has_tool_calls());
        assert_eq!(llm.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn test_chat_completion_with_tool_calls_parsing() {
        let api_json = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_42",
                        "type": "function",
                        "function": {"name": "exec", "arguments": "{\"command\": \"ls\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": null
        });

        let resp: ChatCompletionResponse = serde_json::from_value(api_json).unwrap();
        let llm: LlmResponse = resp.into();
        assert!(llm.content.is_none());
        assert_eq!(llm.tool_calls.len(), 1);
        assert_eq!(llm.tool_calls[0].function.name, "exec");
    }

    #[test]
    fn test_chat_completion_empty_choices() {
        let resp: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": [], "usage": null})).unwrap();
        let llm: LlmResponse = resp.into();
        assert_eq!(llm.content.as_deref(), Some("No choices in response"));
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = ChatCompletionRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("Hello")],
            tools: None,
            max_tokens: None,
            temperature: Some(0.7),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["temperature"], 0.7);
    }

    #[test]
    fn test_session_user_turn_count() {
        let mut session = Session::new("cli:direct");
        session.messages.push(Message::user("a"));
        session.messages.push(Message::assistant("b"));
        session.messages.push(Message::user("c"));
        assert_eq!(session.user_turn_count(), 2);
    }

    #[test]
    fn test_message_text_views() {
        assert_eq!(Message::user("hi").text(), Some("hi"));
        assert_eq!(Message::assistant("yo").text(), Some("yo"));
        assert_eq!(
            Message::tool_result("c", "exec", "out").text(),
            Some("out")
        );
        let multipart = Message::user_parts(vec![ContentPart::Text {
            text: "caption".into(),
        }]);
        assert_eq!(multipart.text(), Some("caption"));
    }
}
