//! Chat data model shared by the client engine and the development backend.
//!
//! Identifiers are server-assigned integers wrapped in newtypes so that a
//! conversation id can never be passed where a message id is expected. All
//! types serialize to the JSON shapes used by the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identifier.
///
/// Monotonically increasing within a conversation, so ordering by id is
/// ordering by server acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation (one chat between two matched users).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(i64);

impl ConversationId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single chat message as stored by the server.
///
/// `is_mine` is derived on the client from the logged-in user id and is
/// never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Conversation this message belongs to.
    #[serde(rename = "chat_id")]
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Body text.
    pub content: String,
    /// Whether the recipient has read the message.
    #[serde(default)]
    pub is_read: bool,
    /// Server timestamp; `None` until the server has confirmed the message.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Whether the local user authored this message.
    #[serde(skip)]
    pub is_mine: bool,
}

impl Message {
    /// Recomputes [`Message::is_mine`] for the given local user.
    pub fn mark_ownership(&mut self, local_user: UserId) {
        self.is_mine = self.sender_id == local_user;
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub id: ConversationId,
    /// First participant.
    #[serde(rename = "user1_id")]
    pub user1: UserId,
    /// Second participant.
    #[serde(rename = "user2_id")]
    pub user2: UserId,
    /// Preview of the last message.
    #[serde(default)]
    pub last_message: String,
    /// Time of the last message, `None` for an empty conversation.
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Author of the last message.
    #[serde(default, rename = "last_message_user")]
    pub last_message_sender: Option<UserId>,
    /// Whether the local user has seen the last message.
    #[serde(default)]
    pub is_read: bool,
}

impl ConversationSummary {
    /// Returns the participant that is not `local_user`.
    #[must_use]
    pub fn peer_of(&self, local_user: UserId) -> UserId {
        if self.user1 == local_user {
            self.user2
        } else {
            self.user1
        }
    }

    /// Applies a handoff produced when a conversation view closes.
    pub fn apply(&mut self, update: &SummaryUpdate) {
        self.last_message.clone_from(&update.last_message);
        self.last_message_time = update.last_message_time;
        self.last_message_sender = Some(update.last_message_sender);
        self.is_read = update.is_read;
    }
}

/// Summary handoff emitted by a conversation view when it closes.
///
/// Lets the chat list refresh one row without reloading the whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryUpdate {
    /// Conversation the update is for.
    pub conversation_id: ConversationId,
    /// Text of the last visible message.
    pub last_message: String,
    /// Timestamp of the last visible message.
    pub last_message_time: Option<DateTime<Utc>>,
    /// Author of the last visible message.
    pub last_message_sender: UserId,
    /// Always `true` for a closing view: the user has just seen it.
    pub is_read: bool,
}
