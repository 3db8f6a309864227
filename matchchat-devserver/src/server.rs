//! HTTP and WebSocket surface of the development backend.
//!
//! Serves the REST endpoints the client library calls plus the chat socket.
//! Accepted messages are pushed as `"message"` frames to every socket the
//! receiver has open; a mutual like pushes a `"match"` frame to both users.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};

use matchchat_proto::codec;
use matchchat_proto::frame::{EventKind, KIND_MATCH, KIND_MESSAGE, WireFrame};
use matchchat_proto::message::{ConversationId, ConversationSummary, Message, MessageId, UserId};
use matchchat_proto::profile::CandidateProfile;
use matchchat_proto::rest::{
    CHAT_SOCKET_PATH, MarkConversationRead, MarkMessagesRead, RefreshRequest,
    SESSION_START_PATH, SendMessageRequest, SessionToken, Status, SwipeRequest,
    TokenResponse,
};

use crate::store::{ChatStore, Page, StoreError};

/// Page size used when a history request names no limit.
const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Page size used when a search request names none.
const DEFAULT_SEARCH_PAGE: usize = 20;

/// Errors turned into HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("missing, unknown or expired access token")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let code = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::NotMember { .. }) => StatusCode::FORBIDDEN,
        };
        let body = Status {
            status: "error".to_string(),
            content: Some(self.to_string()),
        };
        (code, Json(body)).into_response()
    }
}

type HttpResult<T> = Result<Json<T>, HttpError>;

struct Grant {
    user: UserId,
    issued_at: Instant,
}

struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<WsMessage>,
}

/// Shared server state: the store, issued tokens and open sockets.
pub struct DevState {
    /// Users, conversations and history.
    pub store: ChatStore,
    access_tokens: RwLock<HashMap<String, Grant>>,
    refresh_tokens: RwLock<HashMap<String, UserId>>,
    sessions: RwLock<HashMap<String, UserId>>,
    connections: RwLock<HashMap<UserId, Vec<Connection>>>,
    token_lifetime: Option<Duration>,
    next_token: AtomicU64,
    next_connection: AtomicU64,
    reject_next: AtomicUsize,
    sessions_started: AtomicUsize,
}

impl Default for DevState {
    fn default() -> Self {
        Self::new()
    }
}

impl DevState {
    /// Creates a state whose access tokens never expire.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token_lifetime(None)
    }

    /// Creates a state whose access tokens are rejected after `lifetime`.
    #[must_use]
    pub fn with_token_lifetime(lifetime: Option<Duration>) -> Self {
        Self {
            store: ChatStore::new(),
            access_tokens: RwLock::new(HashMap::new()),
            refresh_tokens: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            token_lifetime: lifetime,
            next_token: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
            reject_next: AtomicUsize::new(0),
            sessions_started: AtomicUsize::new(0),
        }
    }

    /// Registers a user profile and returns fresh `(access, refresh)` tokens.
    pub async fn register_user(&self, profile: CandidateProfile) -> (String, String) {
        let user = profile.id;
        self.store.add_user(profile).await;
        self.issue_tokens(user).await
    }

    /// Issues a new access and refresh token pair for `user`.
    pub async fn issue_tokens(&self, user: UserId) -> (String, String) {
        let n = self.next_token.fetch_add(1, Ordering::Relaxed);
        let access = format!("access-{user}-{n}");
        let refresh = format!("refresh-{user}-{n}");
        self.install_tokens(user, &access, &refresh).await;
        (access, refresh)
    }

    /// Installs caller-chosen tokens, e.g. fixed ones for manual testing.
    pub async fn install_tokens(&self, user: UserId, access: &str, refresh: &str) {
        self.grant(user, access.to_string()).await;
        self.refresh_tokens
            .write()
            .await
            .insert(refresh.to_string(), user);
    }

    /// Makes the next `count` authorized requests fail with 401.
    pub fn reject_next_requests(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    /// Number of chat sessions started so far.
    #[must_use]
    pub fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }

    /// Number of open sockets for `user`.
    pub async fn connection_count(&self, user: UserId) -> usize {
        self.connections.read().await.get(&user).map_or(0, Vec::len)
    }

    /// Sends a close frame on every open socket.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user, list) in conns.iter() {
            for conn in list {
                tracing::info!(%user, connection = conn.id, "sending close frame");
                let _ = conn.sender.send(WsMessage::Close(None));
            }
        }
    }

    /// Pushes `frame` to every socket of `user`; returns how many took it.
    pub async fn push_frame(&self, user: UserId, frame: &WireFrame) -> usize {
        let text = match codec::encode(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode frame");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        conns.get(&user).map_or(0, |list| {
            list.iter()
                .filter(|c| c.sender.send(WsMessage::Text(text.clone().into())).is_ok())
                .count()
        })
    }

    /// Stores a message and pushes it to the receiver.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] when the sender may not post there.
    pub async fn deliver(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let message = self.store.insert_message(conversation, sender, content).await?;
        let frame = WireFrame {
            id: Some(message.id.get()),
            kind: KIND_MESSAGE.to_string(),
            content: Some(message.content.clone()),
            chat_id: Some(conversation.get()),
            user_id: Some(sender.get()),
        };
        let pushed = self.push_frame(message.receiver_id, &frame).await;
        tracing::debug!(message = %message.id, %conversation, pushed, "message delivered");
        Ok(message)
    }

    async fn grant(&self, user: UserId, access: String) {
        self.access_tokens.write().await.insert(
            access,
            Grant {
                user,
                issued_at: Instant::now(),
            },
        );
    }

    async fn authorize(&self, headers: &HeaderMap) -> Result<UserId, HttpError> {
        if self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tracing::debug!("forced rejection");
            return Err(HttpError::Unauthorized);
        }
        let token = parse_bearer(headers).ok_or(HttpError::Unauthorized)?;
        let tokens = self.access_tokens.read().await;
        let grant = tokens.get(token).ok_or(HttpError::Unauthorized)?;
        if let Some(lifetime) = self.token_lifetime
            && grant.issued_at.elapsed() > lifetime
        {
            return Err(HttpError::Unauthorized);
        }
        Ok(grant.user)
    }

    async fn register_connection(&self, user: UserId, sender: mpsc::UnboundedSender<WsMessage>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry(user)
            .or_default()
            .push(Connection { id, sender });
        id
    }

    async fn unregister_connection(&self, user: UserId, id: u64) {
        let mut conns = self.connections.write().await;
        if let Some(list) = conns.get_mut(&user) {
            list.retain(|c| c.id != id);
            if list.is_empty() {
                conns.remove(&user);
            }
        }
    }
}

fn parse_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Starts the server with an empty [`DevState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(DevState::new())).await
}

/// Starts the server with a pre-seeded [`DevState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<DevState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(state);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dev server error");
        }
    });

    Ok((bound_addr, handle))
}

fn router(state: Arc<DevState>) -> Router {
    Router::new()
        .route(SESSION_START_PATH, post(start_session))
        .route(CHAT_SOCKET_PATH, get(ws_handler))
        .route("/chat/messages/{chat_id}", get(history))
        .route("/chat/read", post(read_conversation))
        .route("/messages/read", post(read_messages))
        .route("/messages/send", post(send_message))
        .route("/chats", get(chats))
        .route("/profiles/search", get(search))
        .route("/swipe", post(swipe))
        .route("/refresh", post(refresh))
        .with_state(state)
}

async fn start_session(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
) -> HttpResult<SessionToken> {
    let user = state.authorize(&headers).await?;
    let n = state.next_token.fetch_add(1, Ordering::Relaxed);
    let token = format!("session-{user}-{n}");
    state.sessions.write().await.insert(token.clone(), user);
    state.sessions_started.fetch_add(1, Ordering::SeqCst);
    Ok(Json(SessionToken {
        session_token: token,
    }))
}

#[derive(Deserialize)]
struct SocketQuery {
    session: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DevState>>,
    Query(query): Query<SocketQuery>,
) -> Result<Response, HttpError> {
    // Session tokens are single use.
    let user = state
        .sessions
        .write()
        .await
        .remove(&query.session)
        .ok_or(HttpError::Unauthorized)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

/// Runs one chat socket until either side closes it.
async fn handle_socket(socket: WebSocket, user: UserId, state: Arc<DevState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = state.register_connection(user, tx).await;
    tracing::info!(%user, connection, "chat socket open");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(%user, "socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => handle_text(user, text.as_str(), &reader_state).await,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.unregister_connection(user, connection).await;
    tracing::info!(%user, connection, "chat socket closed");
}

/// Chat frames written by a client are stored and delivered like
/// `POST /messages/send`; anything else is ignored.
async fn handle_text(user: UserId, text: &str, state: &DevState) {
    let event = match codec::decode_event(text) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(%user, error = %e, "ignoring malformed client frame");
            return;
        }
    };
    if event.kind != EventKind::ChatMessage {
        return;
    }
    let (Some(conversation), Some(content)) = (event.conversation_id, event.content) else {
        return;
    };
    if let Err(e) = state.deliver(conversation, user, &content).await {
        tracing::warn!(%user, error = %e, "rejected socket message");
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    before_id: Option<i64>,
    after_id: Option<i64>,
}

async fn history(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> HttpResult<Vec<Message>> {
    let user = state.authorize(&headers).await?;
    let page = match (query.before_id, query.after_id) {
        (Some(_), Some(_)) => {
            return Err(HttpError::BadRequest(
                "before_id and after_id are exclusive".to_string(),
            ));
        }
        (Some(id), None) => Page::Before(MessageId::new(id)),
        (None, Some(id)) => Page::After(MessageId::new(id)),
        (None, None) => Page::Latest,
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let messages = state
        .store
        .history(ConversationId::new(chat_id), user, page, limit)
        .await?;
    Ok(Json(messages))
}

async fn read_messages(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(body): Json<MarkMessagesRead>,
) -> HttpResult<Status> {
    let user = state.authorize(&headers).await?;
    check_receiver(body.receiver_id, user)?;
    let changed = state
        .store
        .mark_read(body.chat_id, user, &body.message_ids)
        .await?;
    Ok(Json(ok(Some(changed.to_string()))))
}

async fn read_conversation(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(body): Json<MarkConversationRead>,
) -> HttpResult<Status> {
    let user = state.authorize(&headers).await?;
    check_receiver(body.receiver_id, user)?;
    let changed = state.store.mark_conversation_read(body.chat_id, user).await?;
    Ok(Json(ok(Some(changed.to_string()))))
}

fn check_receiver(receiver: UserId, user: UserId) -> Result<(), HttpError> {
    if receiver == user {
        Ok(())
    } else {
        Err(HttpError::BadRequest("receiver_id does not match token".to_string()))
    }
}

async fn send_message(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageRequest>,
) -> HttpResult<Message> {
    let user = state.authorize(&headers).await?;
    if body.sender_id != user {
        return Err(HttpError::BadRequest("sender_id does not match token".to_string()));
    }
    if body.content.trim().is_empty() {
        return Err(HttpError::BadRequest("empty message".to_string()));
    }
    let message = state.deliver(body.chat_id, user, &body.content).await?;
    Ok(Json(message))
}

async fn chats(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
) -> HttpResult<Vec<ConversationSummary>> {
    let user = state.authorize(&headers).await?;
    Ok(Json(state.store.summaries(user).await))
}

#[derive(Deserialize)]
struct SearchQuery {
    last_seen_id: Option<i64>,
    page_size: Option<usize>,
    min_age: Option<u32>,
    max_age: Option<u32>,
}

async fn search(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> HttpResult<Vec<CandidateProfile>> {
    let user = state.authorize(&headers).await?;
    let page = state
        .store
        .search(
            user,
            query.last_seen_id.map(UserId::new),
            query.page_size.unwrap_or(DEFAULT_SEARCH_PAGE),
            (query.min_age, query.max_age),
        )
        .await;
    Ok(Json(page))
}

async fn swipe(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(body): Json<SwipeRequest>,
) -> HttpResult<Status> {
    let user = state.authorize(&headers).await?;
    let Some(conversation) = state
        .store
        .record_swipe(user, body.target_id, body.action)
        .await
    else {
        return Ok(Json(ok(None)));
    };

    tracing::info!(%user, target = %body.target_id, %conversation, "match");
    for (to, other) in [(user, body.target_id), (body.target_id, user)] {
        let frame = WireFrame {
            id: Some(conversation.get()),
            kind: KIND_MATCH.to_string(),
            content: None,
            chat_id: Some(conversation.get()),
            user_id: Some(other.get()),
        };
        state.push_frame(to, &frame).await;
    }
    Ok(Json(Status {
        status: "match".to_string(),
        content: Some(conversation.to_string()),
    }))
}

async fn refresh(
    State(state): State<Arc<DevState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, HttpError> {
    let owner = state.refresh_tokens.read().await.get(&body.refresh_token).copied();
    if owner != Some(body.user_id) {
        return Err(HttpError::Unauthorized);
    }
    let n = state.next_token.fetch_add(1, Ordering::Relaxed);
    let access = format!("access-{}-{n}", body.user_id);
    state.grant(body.user_id, access.clone()).await;
    tracing::info!(user = %body.user_id, "access token refreshed");
    Ok(Json(TokenResponse {
        access_token: access,
        access_expires: state
            .token_lifetime
            .map(|l| (chrono::Utc::now() + l).to_rfc3339()),
    }))
}

fn ok(content: Option<String>) -> Status {
    Status {
        status: "ok".to_string(),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchchat_proto::rest::SwipeAction;
    use tokio_tungstenite::tungstenite;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    fn profile(id: UserId) -> CandidateProfile {
        CandidateProfile {
            id,
            display_name: Some(format!("user {id}")),
            age: Some(30),
            location: None,
            bio: None,
        }
    }

    struct Harness {
        addr: std::net::SocketAddr,
        state: Arc<DevState>,
        http: reqwest::Client,
        alice: String,
        bob: String,
        chat: ConversationId,
        _server: tokio::task::JoinHandle<()>,
    }

    async fn harness() -> Harness {
        let state = Arc::new(DevState::new());
        let (alice, _) = state.register_user(profile(ALICE)).await;
        let (bob, _) = state.register_user(profile(BOB)).await;
        let chat = state.store.create_conversation(ALICE, BOB).await;
        let (addr, server) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .unwrap();
        Harness {
            addr,
            state,
            http: reqwest::Client::new(),
            alice,
            bob,
            chat,
            _server: server,
        }
    }

    impl Harness {
        fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.addr)
        }

        async fn open_socket(
            &self,
            token: &str,
        ) -> tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        > {
            let session: SessionToken = self
                .http
                .post(self.url(SESSION_START_PATH))
                .bearer_auth(token)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            let url = format!(
                "ws://{}{CHAT_SOCKET_PATH}?session={}",
                self.addr, session.session_token
            );
            let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
            ws
        }
    }

    async fn wait_for_connection(state: &DevState, user: UserId) {
        for _ in 0..100 {
            if state.connection_count(user).await > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("socket never registered");
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let h = harness().await;
        let resp = h.http.get(h.url("/chats")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = h
            .http
            .get(h.url("/chats"))
            .bearer_auth("forged")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sent_message_is_pushed_to_the_receiver() {
        let h = harness().await;
        let mut bob_ws = h.open_socket(&h.bob).await;
        wait_for_connection(&h.state, BOB).await;

        let body = SendMessageRequest {
            chat_id: h.chat,
            sender_id: ALICE,
            receiver_id: BOB,
            content: "hi bob".into(),
        };
        let sent: Message = h
            .http
            .post(h.url("/messages/send"))
            .bearer_auth(&h.alice)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sent.receiver_id, BOB);

        let frame = loop {
            if let tungstenite::Message::Text(text) = bob_ws.next().await.unwrap().unwrap() {
                break codec::decode(text.as_str()).unwrap();
            }
        };
        assert_eq!(frame.kind, KIND_MESSAGE);
        assert_eq!(frame.id, Some(sent.id.get()));
        assert_eq!(frame.chat_id, Some(h.chat.get()));
        assert_eq!(frame.user_id, Some(ALICE.get()));
        assert_eq!(frame.content.as_deref(), Some("hi bob"));
    }

    #[tokio::test]
    async fn session_tokens_are_single_use() {
        let h = harness().await;
        let session: SessionToken = h
            .http
            .post(h.url(SESSION_START_PATH))
            .bearer_auth(&h.alice)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let url = format!(
            "ws://{}{CHAT_SOCKET_PATH}?session={}",
            h.addr, session.session_token
        );
        assert!(tokio_tungstenite::connect_async(&url).await.is_ok());
        assert!(tokio_tungstenite::connect_async(&url).await.is_err());
        assert_eq!(h.state.sessions_started(), 1);
    }

    #[tokio::test]
    async fn history_respects_cursor() {
        let h = harness().await;
        h.state.store.seed_history(h.chat, 50).await.unwrap();
        let page: Vec<Message> = h
            .http
            .get(h.url(&format!("/chat/messages/{}?limit=10&before_id=21", h.chat)))
            .bearer_auth(&h.bob)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, (11..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn read_marks_must_come_from_the_receiver() {
        let h = harness().await;
        h.state.store.seed_history(h.chat, 4).await.unwrap();

        let resp = h
            .http
            .post(h.url("/chat/read"))
            .bearer_auth(&h.alice)
            .json(&MarkConversationRead {
                chat_id: h.chat,
                receiver_id: BOB,
            })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = h
            .http
            .post(h.url("/messages/read"))
            .bearer_auth(&h.alice)
            .json(&MarkMessagesRead {
                message_ids: vec![MessageId::new(1), MessageId::new(2)],
                chat_id: h.chat,
                receiver_id: ALICE,
            })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let resp = h
            .http
            .post(h.url("/chat/read"))
            .bearer_auth(&h.bob)
            .json(&MarkConversationRead {
                chat_id: h.chat,
                receiver_id: BOB,
            })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn forced_rejection_then_refresh() {
        let h = harness().await;
        let (_, refresh) = h.state.issue_tokens(ALICE).await;
        h.state.reject_next_requests(1);

        let resp = h
            .http
            .get(h.url("/chats"))
            .bearer_auth(&h.alice)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let tokens: TokenResponse = h
            .http
            .post(h.url("/refresh"))
            .json(&RefreshRequest {
                user_id: ALICE,
                refresh_token: refresh,
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let resp = h
            .http
            .get(h.url("/chats"))
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn close_all_connections_closes_sockets() {
        let h = harness().await;
        let mut ws = h.open_socket(&h.alice).await;
        wait_for_connection(&h.state, ALICE).await;

        h.state.close_all_connections().await;
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }

    #[tokio::test]
    async fn mutual_like_notifies_both_users() {
        let h = harness().await;
        let carol = UserId::new(3);
        let (carol_token, _) = h.state.register_user(profile(carol)).await;
        let mut alice_ws = h.open_socket(&h.alice).await;
        wait_for_connection(&h.state, ALICE).await;

        let like = |token: &str, target: UserId| {
            h.http
                .post(h.url("/swipe"))
                .bearer_auth(token.to_string())
                .json(&SwipeRequest {
                    target_id: target,
                    action: SwipeAction::Like,
                })
                .send()
        };
        let first: Status = like(&h.alice, carol).await.unwrap().json().await.unwrap();
        assert_eq!(first.status, "ok");
        let second: Status = like(&carol_token, ALICE).await.unwrap().json().await.unwrap();
        assert_eq!(second.status, "match");

        let frame = loop {
            if let tungstenite::Message::Text(text) = alice_ws.next().await.unwrap().unwrap() {
                break codec::decode(text.as_str()).unwrap();
            }
        };
        assert_eq!(frame.kind, KIND_MATCH);
        assert_eq!(frame.user_id, Some(carol.get()));
    }
}
