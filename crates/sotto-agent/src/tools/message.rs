//! Message tool — lets the agent push messages to channels mid-turn.
//!
//! The agent loop writes the `(channel, chat_id)` context before every LM
//! call; the LM itself never knows which channel it is on. Because the
//! context lives on the tool instance, exactly one agent loop may drive a
//! registry at a time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use sotto_core::bus::OutboundMessage;

use super::base::{optional_string, require_string, Tool};

/// Callback used to publish outbound messages (normally the bus).
pub type SendCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Sends a message to the current (or an explicit) channel and chat.
pub struct MessageTool {
    send_callback: Option<SendCallback>,
    /// Per-request context, written by the agent loop before each LM call.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    pub fn new(send_callback: Option<SendCallback>) -> Self {
        Self {
            send_callback,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Set the conversation context for subsequent calls.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }

    #[cfg(test)]
    pub async fn context(&self) -> (String, String) {
        self.context.lock().await.clone()
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user. Defaults to the current conversation; \
         pass channel and chat_id to target a different one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel (optional)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat ID (optional)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;

        let (default_channel, default_chat) = self.context.lock().await.clone();
        let channel = optional_string(&params, "channel").unwrap_or(default_channel);
        let chat_id = optional_string(&params, "chat_id").unwrap_or(default_chat);

        debug!(channel = %channel, chat_id = %chat_id, "sending message via tool");

        if let Some(cb) = &self.send_callback {
            let msg = OutboundMessage::new(&channel, &chat_id, &content);
            cb(msg)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to send message: {e}"))?;
        } else {
            debug!("no send callback configured, message discarded");
        }

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
