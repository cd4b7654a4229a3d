//! Bus event types — messages flowing between adapters and the agent loop.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Channel tag used for internal announces (subagent results). On this
/// channel, `chat_id` holds the origin `"channel:chat_id"` pair.
pub const SYSTEM_CHANNEL: &str = "system";

/// A media attachment carried with an inbound message.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaAttachment {
    /// MIME type (e.g. "image/jpeg", "audio/ogg").
    pub mime_type: String,
    /// Local file path or URL.
    pub path: String,
}

/// An inbound message from a channel adapter to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "cli", "discord", "system").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Attached media, if any.
    pub media: Vec<MediaAttachment>,
    /// Adapter metadata, echoed back on the outbound so adapters can clear
    /// typing/reaction indicators. Recognized key: `channel_context`.
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Session key for history lookup.
    ///
    /// Normally `channel:chat_id`. For the system channel the `chat_id`
    /// already *is* the origin `"channel:chat_id"` pair, so it is returned
    /// as-is.
    pub fn session_key(&self) -> String {
        if self.channel == SYSTEM_CHANNEL {
            self.chat_id.clone()
        } else {
            format!("{}:{}", self.channel, self.chat_id)
        }
    }

    /// The out-of-band channel context, when the adapter attached one.
    pub fn channel_context(&self) -> Option<&str> {
        self.metadata
            .get("channel_context")
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// An outbound message from the agent to a channel adapter.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    /// Metadata echoed from the inbound message.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Build a reply to an inbound message, echoing its metadata.
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        OutboundMessage {
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            content: content.into(),
            metadata: msg.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_regular_channel() {
        let msg = InboundMessage::new("discord", "user_1", "channel_abc", "test");
        assert_eq!(msg.session_key(), "discord:channel_abc");
    }

    #[test]
    fn test_session_key_system_channel_passthrough() {
        // System announces carry the origin pair in chat_id already.
        let msg = InboundMessage::new("system", "subagent", "discord:channel_abc", "done");
        assert_eq!(msg.session_key(), "discord:channel_abc");
    }

    #[test]
    fn test_channel_context_from_metadata() {
        let mut msg = InboundMessage::new("discord", "u", "c", "hi");
        assert!(msg.channel_context().is_none());

        msg.metadata
            .insert("channel_context".into(), "recent channel history".into());
        assert_eq!(msg.channel_context(), Some("recent channel history"));
    }

    #[test]
    fn test_channel_context_empty_is_none() {
        let mut msg = InboundMessage::new("discord", "u", "c", "hi");
        msg.metadata.insert("channel_context".into(), "".into());
        assert!(msg.channel_context().is_none());
    }

    #[test]
    fn test_reply_echoes_metadata() {
        let mut msg = InboundMessage::new("cli", "user", "direct", "hello");
        msg.metadata.insert("message_id".into(), "42".into());

        let reply = OutboundMessage::reply_to(&msg, "hi there");
        assert_eq!(reply.channel, "cli");
        assert_eq!(reply.chat_id, "direct");
        assert_eq!(reply.content, "hi there");
        assert_eq!(reply.metadata.get("message_id").unwrap(), "42");
    }
}
