//! Real-time transport frame types.
//!
//! Every frame on the chat socket is a JSON text frame of the shape
//! `{ id?, type, content?, chat_id?, user_id? }`. The `type` field selects
//! how the rest is interpreted; only [`EventKind::ChatMessage`] and
//! [`EventKind::MatchNotice`] are understood; anything else is dropped by the
//! receiver without affecting the connection.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, MessageId, UserId};

/// Wire `type` value for a delivered chat message.
pub const KIND_MESSAGE: &str = "message";

/// Wire `type` value for a new-match notification.
pub const KIND_MATCH: &str = "match";

/// A frame exactly as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Optional event identifier (the message id for chat messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Event kind discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Conversation the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Originating user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl WireFrame {
    /// Builds an outbound chat-message frame.
    #[must_use]
    pub fn chat_message(conversation: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: KIND_MESSAGE.to_string(),
            content: Some(content.into()),
            chat_id: Some(conversation.get()),
            user_id: None,
        }
    }
}

/// Recognized event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A chat message was delivered to this user.
    ChatMessage,
    /// Another user matched with this user.
    MatchNotice,
}

impl EventKind {
    /// Maps a wire discriminator to a kind, `None` when unrecognized.
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            KIND_MESSAGE => Some(Self::ChatMessage),
            KIND_MATCH => Some(Self::MatchNotice),
            _ => None,
        }
    }

    /// Returns the wire discriminator for this kind.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::ChatMessage => KIND_MESSAGE,
            Self::MatchNotice => KIND_MATCH,
        }
    }
}

/// A decoded inbound event with a recognized kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// What happened.
    pub kind: EventKind,
    /// Event identifier (message id for chat messages).
    pub id: Option<MessageId>,
    /// Conversation the event concerns.
    pub conversation_id: Option<ConversationId>,
    /// User that caused the event.
    pub sender_id: Option<UserId>,
    /// Payload text.
    pub content: Option<String>,
}

impl InboundEvent {
    /// Converts a wire frame, returning `None` for unrecognized kinds.
    #[must_use]
    pub fn from_frame(frame: WireFrame) -> Option<Self> {
        let kind = EventKind::from_wire(&frame.kind)?;
        Some(Self {
            kind,
            id: frame.id.map(MessageId::new),
            conversation_id: frame.chat_id.map(ConversationId::new),
            sender_id: frame.user_id.map(UserId::new),
            content: frame.content,
        })
    }

    /// Whether this event belongs to the given conversation.
    #[must_use]
    pub fn is_for(&self, conversation: ConversationId) -> bool {
        self.conversation_id == Some(conversation)
    }
}
