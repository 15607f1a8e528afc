//! JSON frames exchanged with chat clients.
//!
//! Inbound: `{"type": "text", "content": "..."}` (`type` optional), or the
//! control frame `{"type": "end"}` that closes the conversation.
//! Outbound: `{"type", "content", "timestamp", "messageId"?}`, one frame per
//! WebSocket text message.

// Rust guideline compliant 2026-02

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::{MessageId, MessageKind};

/// Outbound `type` of a responder reply.
pub const REPLY_FRAME_TYPE: &str = "ai";

/// Outbound `type` of server notices (welcome, conversation ended).
pub const SYSTEM_FRAME_TYPE: &str = "system";

/// Inbound `type` that ends the conversation. Needs no `content`.
pub const END_FRAME_TYPE: &str = "end";

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Malformed inbound frame: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Payload kind as sent by the client.
    pub kind: String,
    /// Message body. Empty for the end frame.
    pub content: String,
}

#[derive(Deserialize)]
struct RawInboundFrame {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    content: Option<String>,
}

fn default_kind() -> String {
    MessageKind::Text.as_str().to_string()
}

impl InboundFrame {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for invalid JSON, or when `content` is
    /// missing from anything but an end frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawInboundFrame =
            serde_json::from_str(text).map_err(|e| DecodeError(e.to_string()))?;
        let content = match raw.content {
            Some(content) => content,
            None if raw.kind == END_FRAME_TYPE => String::new(),
            None => return Err(DecodeError("missing field `content`".to_string())),
        };
        Ok(Self {
            kind: raw.kind,
            content,
        })
    }

    /// Whether the client asked to end the conversation.
    pub fn is_end(&self) -> bool {
        self.kind == END_FRAME_TYPE
    }

    /// Kind to persist. Unknown client types are stored as text.
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_wire(&self.kind).unwrap_or_default()
    }

    /// Trimmed body, or `None` if there is nothing to answer.
    pub fn text(&self) -> Option<&str> {
        let text = self.content.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    /// `"ai"` for replies, `"system"` for notices.
    #[serde(rename = "type")]
    pub kind: String,
    /// Body text.
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Id of the persisted reply, when it was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

impl OutboundFrame {
    /// A responder reply.
    pub fn reply(content: impl Into<String>, message_id: Option<MessageId>) -> Self {
        Self {
            kind: REPLY_FRAME_TYPE.to_string(),
            content: content.into(),
            timestamp: Utc::now().timestamp(),
            message_id,
        }
    }

    /// A server notice.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            kind: SYSTEM_FRAME_TYPE.to_string(),
            content: content.into(),
            timestamp: Utc::now().timestamp(),
            message_id: None,
        }
    }

    /// Serialize for the outbound queue.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
