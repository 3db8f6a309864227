//! `reqwest`-backed implementation of [`ChatApi`].
//!
//! Every request carries the current access token as a bearer header. When
//! the server answers `401`, the client exchanges its refresh token for a new
//! access token via `POST /refresh` and retries the original request exactly
//! once. A second `401` surfaces as [`ApiError::Unauthorized`].

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use matchchat_proto::message::{ConversationId, ConversationSummary, Message, MessageId, UserId};
use matchchat_proto::profile::{CandidateProfile, SearchFilter};
use matchchat_proto::rest::{
    MarkConversationRead, MarkMessagesRead, RefreshRequest, SESSION_START_PATH,
    SendMessageRequest, SessionToken, Status, SwipeAction, SwipeRequest, TokenResponse,
};

use super::{ApiError, ChatApi};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Login material for one user.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The logged-in user.
    pub user_id: UserId,
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token used to obtain a new access token after a `401`.
    pub refresh_token: Option<String>,
}

/// HTTP client for the chat backend.
pub struct HttpApi {
    client: Client,
    base_url: Url,
    user_id: UserId,
    credentials: RwLock<Option<Credentials>>,
}

impl HttpApi {
    /// Creates a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the underlying HTTP client cannot be
    /// built (e.g., TLS backend initialization failure).
    pub fn new(base_url: Url, credentials: Credentials) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`HttpApi::new`] with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn with_timeout(
        base_url: Url,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            user_id: credentials.user_id,
            credentials: RwLock::new(Some(credentials)),
        })
    }

    /// Resolves an API path against the base URL, keeping any base path prefix.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{path}", self.base_url.path().trim_end_matches('/'));
        url.set_path(&joined);
        url.set_query(None);
        url
    }

    fn access_token(&self) -> Result<String, ApiError> {
        self.credentials
            .read()
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or(ApiError::NotAuthenticated)
    }

    /// Sends a request built by `build`, refreshing the token and retrying
    /// once if the server answers `401`.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let token = self.access_token()?;
        let response = build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("access token rejected, refreshing");
        let token = self.refresh().await?;
        let retry = build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("request still unauthorized after token refresh");
            return Err(ApiError::Unauthorized);
        }
        Ok(retry)
    }

    /// Exchanges the refresh token for a new access token.
    async fn refresh(&self) -> Result<String, ApiError> {
        let request = {
            let guard = self.credentials.read();
            let creds = guard.as_ref().ok_or(ApiError::NotAuthenticated)?;
            let refresh_token = creds.refresh_token.clone().ok_or(ApiError::Unauthorized)?;
            RefreshRequest {
                user_id: creds.user_id,
                refresh_token,
            }
        };

        let response = self
            .client
            .post(self.endpoint("/refresh"))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "token refresh rejected");
            return Err(ApiError::Unauthorized);
        }
        let tokens: TokenResponse = decode(response).await?;

        let mut guard = self.credentials.write();
        let creds = guard.as_mut().ok_or(ApiError::NotAuthenticated)?;
        creds.access_token.clone_from(&tokens.access_token);
        tracing::info!(user = %creds.user_id, "access token refreshed");
        Ok(tokens.access_token)
    }

    async fn fetch_messages(&self, url: Url) -> Result<Vec<Message>, ApiError> {
        let response = self.send_authorized(|| self.client.get(url.clone())).await?;
        let page: Option<Vec<Message>> = decode(response).await?;
        let mut page = page.unwrap_or_default();
        for message in &mut page {
            message.mark_ownership(self.user_id);
        }
        Ok(page)
    }

    fn messages_url(&self, conversation: ConversationId, cursor: Option<(&str, MessageId)>, limit: usize) -> Url {
        let mut url = self.endpoint(&format!("/chat/messages/{conversation}"));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some((name, id)) = cursor {
                query.append_pair(name, &id.to_string());
            }
        }
        url
    }
}

/// Checks the status and decodes a JSON body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Checks the status and discards the body.
fn expect_success(response: &Response) -> Result<(), ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(())
}

impl ChatApi for HttpApi {
    fn local_user(&self) -> UserId {
        self.user_id
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn start_session(&self) -> Result<SessionToken, ApiError> {
        let url = self.endpoint(SESSION_START_PATH);
        let response = self.send_authorized(|| self.client.post(url.clone())).await?;
        decode(response).await
    }

    async fn latest_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch_messages(self.messages_url(conversation, None, limit))
            .await
    }

    async fn messages_before(
        &self,
        conversation: ConversationId,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch_messages(self.messages_url(conversation, Some(("before_id", before)), limit))
            .await
    }

    async fn messages_after(
        &self,
        conversation: ConversationId,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch_messages(self.messages_url(conversation, Some(("after_id", after)), limit))
            .await
    }

    async fn mark_messages_read(
        &self,
        conversation: ConversationId,
        ids: &[MessageId],
    ) -> Result<(), ApiError> {
        let url = self.endpoint("/messages/read");
        let body = MarkMessagesRead {
            message_ids: ids.to_vec(),
            chat_id: conversation,
            receiver_id: self.user_id,
        };
        let response = self
            .send_authorized(|| self.client.post(url.clone()).json(&body))
            .await?;
        expect_success(&response)
    }

    async fn mark_conversation_read(&self, conversation: ConversationId) -> Result<(), ApiError> {
        let url = self.endpoint("/chat/read");
        let body = MarkConversationRead {
            chat_id: conversation,
            receiver_id: self.user_id,
        };
        let response = self
            .send_authorized(|| self.client.post(url.clone()).json(&body))
            .await?;
        expect_success(&response)
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ApiError> {
        let url = self.endpoint("/messages/send");
        let response = self
            .send_authorized(|| self.client.post(url.clone()).json(&request))
            .await?;
        let mut message: Message = decode(response).await?;
        message.mark_ownership(self.user_id);
        Ok(message)
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let url = self.endpoint("/chats");
        let response = self.send_authorized(|| self.client.get(url.clone())).await?;
        let list: Option<Vec<ConversationSummary>> = decode(response).await?;
        Ok(list.unwrap_or_default())
    }

    async fn search_candidates(
        &self,
        filter: &SearchFilter,
        last_seen: Option<UserId>,
        page_size: usize,
    ) -> Result<Vec<CandidateProfile>, ApiError> {
        let mut url = self.endpoint("/profiles/search");
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in filter.query_pairs() {
                query.append_pair(name, &value);
            }
            if let Some(last) = last_seen {
                query.append_pair("last_seen_id", &last.to_string());
            }
            query.append_pair("page_size", &page_size.to_string());
        }
        let response = self.send_authorized(|| self.client.get(url.clone())).await?;
        let page: Option<Vec<CandidateProfile>> = decode(response).await?;
        Ok(page.unwrap_or_default())
    }

    async fn swipe(&self, target: UserId, action: SwipeAction) -> Result<Status, ApiError> {
        let url = self.endpoint("/swipe");
        let body = SwipeRequest {
            target_id: target,
            action,
        };
        let response = self
            .send_authorized(|| self.client.post(url.clone()).json(&body))
            .await?;
        decode(response).await
    }

    fn clear_credentials(&self) {
        if self.credentials.write().take().is_some() {
            tracing::info!(user = %self.user_id, "credentials cleared");
        }
    }
}
