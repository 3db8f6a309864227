//! Request and response bodies of the REST API.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, MessageId, UserId};

/// Path of the session handshake that precedes opening the chat socket.
pub const SESSION_START_PATH: &str = "/ws/start";

/// Path of the chat socket, relative to the API base path.
pub const CHAT_SOCKET_PATH: &str = "/ws/chat";

/// Query parameter carrying the session token on the socket URL.
pub const SESSION_QUERY_PARAM: &str = "session";

/// Response of `POST /ws/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Short-lived token that authorizes one socket connection.
    pub session_token: String,
}

/// Body of `POST /refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// User whose access token is being refreshed.
    pub user_id: UserId,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

/// Response of `POST /refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// New bearer token.
    pub access_token: String,
    /// Expiry of the new token, as reported by the server.
    #[serde(default)]
    pub access_expires: Option<String>,
}

/// Body of `POST /messages/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkMessagesRead {
    /// Messages to mark as read.
    pub message_ids: Vec<MessageId>,
    /// Conversation the messages belong to.
    pub chat_id: ConversationId,
    /// The reader; must be the receiver of every message.
    pub receiver_id: UserId,
}

/// Body of `POST /chat/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkConversationRead {
    /// Conversation to mark as read.
    pub chat_id: ConversationId,
    /// The reader; only messages addressed to them change.
    pub receiver_id: UserId,
}

/// Body of `POST /messages/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target conversation.
    pub chat_id: ConversationId,
    /// Author (the logged-in user).
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Body text.
    pub content: String,
}

/// Swipe decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    /// Express interest.
    Like,
    /// Pass.
    Dislike,
}

/// Body of `POST /swipe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeRequest {
    /// User being swiped on.
    pub target_id: UserId,
    /// Decision.
    pub action: SwipeAction,
}

/// Generic `{status, content}` acknowledgment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Status {
    /// Status string, e.g. `"ok"` or `"match"`.
    #[serde(default)]
    pub status: String,
    /// Optional detail.
    #[serde(default)]
    pub content: Option<String>,
}
