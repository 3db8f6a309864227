//! REST collaborator abstraction.
//!
//! Defines the [`ChatApi`] trait through which the engine reaches the
//! backend. Concrete implementations include:
//! - [`http::HttpApi`] -- `reqwest`-based client with bearer auth and
//!   refresh-and-retry-once on `401`
//! - [`memory::InMemoryApi`] -- in-process backend for tests

pub mod http;
pub mod memory;

use std::future::Future;

use url::Url;

use matchchat_proto::message::{ConversationId, ConversationSummary, Message, MessageId, UserId};
use matchchat_proto::profile::{CandidateProfile, SearchFilter};
use matchchat_proto::rest::{SendMessageRequest, SessionToken, Status, SwipeAction};

/// Errors that can occur during REST calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the response could not be read.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the credentials, and refreshing them did not help.
    #[error("unauthorized")]
    Unauthorized,

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// No credentials are available (logged out).
    #[error("not logged in")]
    NotAuthenticated,
}

/// Typed request/response operations of the backend.
///
/// The engine treats the backend as an external collaborator: every
/// operation is a single awaited call with no retry beyond the
/// authentication policy of the implementation.
pub trait ChatApi: Send + Sync + 'static {
    /// The logged-in user.
    fn local_user(&self) -> UserId;

    /// Base URL of the REST API; the chat socket URL is derived from it.
    fn base_url(&self) -> &Url;

    /// Requests a short-lived session token for opening the chat socket.
    fn start_session(&self) -> impl Future<Output = Result<SessionToken, ApiError>> + Send;

    /// Fetches the most recent `limit` messages of a conversation, ascending by id.
    fn latest_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Fetches up to `limit` messages with ids strictly below `before`, ascending.
    fn messages_before(
        &self,
        conversation: ConversationId,
        before: MessageId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Fetches up to `limit` messages with ids strictly above `after`, ascending.
    fn messages_after(
        &self,
        conversation: ConversationId,
        after: MessageId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Marks the given messages as read.
    fn mark_messages_read(
        &self,
        conversation: ConversationId,
        ids: &[MessageId],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Marks every message of a conversation as read.
    fn mark_conversation_read(
        &self,
        conversation: ConversationId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Posts a message and returns the server-confirmed record.
    fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Lists the conversations of the logged-in user.
    fn conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// Pages through swipe candidates after `last_seen`.
    fn search_candidates(
        &self,
        filter: &SearchFilter,
        last_seen: Option<UserId>,
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<CandidateProfile>, ApiError>> + Send;

    /// Records a swipe decision.
    fn swipe(
        &self,
        target: UserId,
        action: SwipeAction,
    ) -> impl Future<Output = Result<Status, ApiError>> + Send;

    /// Drops cached credentials; subsequent calls fail with
    /// [`ApiError::NotAuthenticated`].
    fn clear_credentials(&self);
}
