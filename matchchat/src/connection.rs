//! Chat socket lifecycle: session handshake, receive loop and reconnect.
//!
//! A [`ConnectionManager`] owns at most one *supervisor* task per session.
//! The supervisor alternates between two phases, so the receive loop and the
//! reconnect loop can never run at the same time:
//!
//! ```text
//!  connect() ──► Connecting ──open──► Open ◄──────────────┐
//!                    │                  │ close / error     │ success
//!                    │ failure          ▼                   │
//!                    └───────────► Reconnecting ── sleep(backoff), retry
//!
//!  disconnect() from any state ──► Disconnected (cancels the supervisor)
//! ```
//!
//! Every await inside the supervisor races against a [`CancellationToken`],
//! so a manual disconnect interrupts a pending backoff sleep immediately.
//! Each reconnect attempt first requests a fresh session token, then
//! reopens the socket on the URL derived from it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use matchchat_proto::codec;
use matchchat_proto::frame::WireFrame;
use matchchat_proto::rest::{CHAT_SOCKET_PATH, SESSION_QUERY_PARAM};

use crate::api::{ApiError, ChatApi};
use crate::config::ReconnectConfig;
use crate::dispatch::{ClientEvent, EventDispatcher, Notice};
use crate::transport::{Connector, Frame, FrameReader, FrameWriter, TransportError};

/// Observable lifecycle state of the chat socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session; nothing is retried.
    Disconnected,
    /// First attempt of a session is in progress.
    Connecting,
    /// The socket is open and the receive loop is running.
    Open,
    /// The socket was lost; the backoff loop is retrying.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Errors returned by [`ConnectionManager::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The session handshake failed.
    #[error("session handshake failed: {0}")]
    Session(#[from] ApiError),

    /// The API base URL cannot be turned into a socket URL.
    #[error("unsupported API URL scheme {0:?}")]
    UnsupportedScheme(String),

    /// The socket could not be opened.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// `disconnect` was called while the first attempt was in progress.
    #[error("connect cancelled by disconnect")]
    Cancelled,
}

impl ConnectError {
    /// Whether retrying can never succeed (configuration problems).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::UnsupportedScheme(_))
    }
}

/// Exponential backoff: `base`, doubling per failure, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base.min(max),
        }
    }

    /// Returns the delay for the next attempt and doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Returns to the base delay after a successful open.
    pub fn reset(&mut self) {
        self.current = self.base.min(self.max);
    }
}

impl From<ReconnectConfig> for Backoff {
    fn from(config: ReconnectConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }
}

/// Derives the chat socket URL from the REST base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`; the path is the base path
/// followed by `/ws/chat`; the session token is the only query parameter.
///
/// # Errors
///
/// [`ConnectError::UnsupportedScheme`] for schemes other than
/// `http`, `https`, `ws` and `wss`.
pub fn transport_url(base: &Url, session_token: &str) -> Result<Url, ConnectError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConnectError::UnsupportedScheme(other.to_string())),
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| ConnectError::UnsupportedScheme(base.scheme().to_string()))?;
    let path = format!("{}{CHAT_SOCKET_PATH}", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair(SESSION_QUERY_PARAM, session_token);
    Ok(url)
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared<A, C: Connector> {
    api: Arc<A>,
    connector: C,
    reconnect: ReconnectConfig,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<C::Writer>>,
    session: parking_lot::Mutex<Option<Session>>,
    connecting: parking_lot::Mutex<Option<CancellationToken>>,
    lifecycle: tokio::sync::Mutex<()>,
    manual_close: AtomicBool,
}

/// Owns the chat socket of one logged-in user.
///
/// The state is explicit ([`state`](Self::state)) and observable
/// ([`subscribe_state`](Self::subscribe_state)); decoded inbound events and
/// lifecycle changes are published on the [`EventDispatcher`].
pub struct ConnectionManager<A: ChatApi, C: Connector> {
    shared: Arc<Shared<A, C>>,
}

enum Phase<R> {
    Receive(R),
    Reconnect,
}

enum ReceiveEnd {
    Cancelled,
    Lost,
}

impl<A: ChatApi, C: Connector> ConnectionManager<A, C> {
    /// Creates a manager in the [`ConnectionState::Disconnected`] state.
    pub fn new(
        api: Arc<A>,
        connector: C,
        reconnect: ReconnectConfig,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                api,
                connector,
                reconnect,
                dispatcher,
                state,
                writer: tokio::sync::Mutex::new(None),
                session: parking_lot::Mutex::new(None),
                connecting: parking_lot::Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                manual_close: AtomicBool::new(false),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Establishes a session and starts the supervisor.
    ///
    /// Any session already running is torn down first. Returns once the
    /// socket is open or the first attempt failed; after a failure the
    /// reconnect loop keeps retrying in the background unless the error is
    /// permanent.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first attempt, or
    /// [`ConnectError::Cancelled`] if [`disconnect`](Self::disconnect) ran
    /// while it was in progress.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let cancel = CancellationToken::new();
        *self.shared.connecting.lock() = Some(cancel.clone());
        self.shared.stop_session().await;
        self.shared.manual_close.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.shared.open_once() => Some(result),
        };
        self.shared.connecting.lock().take();
        let Some(attempt) = attempt else {
            tracing::info!("connect cancelled during first attempt");
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(ConnectError::Cancelled);
        };

        let (result, phase) = match attempt {
            Ok(reader) => {
                self.shared.set_state(ConnectionState::Open);
                tracing::info!("chat socket connected");
                (Ok(()), Phase::Receive(reader))
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(error = %e, "cannot connect, not retrying");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial connect failed, retrying in background");
                (Err(e), Phase::Reconnect)
            }
        };

        let task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            cancel.clone(),
            phase,
        ));
        *self.shared.session.lock() = Some(Session { cancel, task });
        result
    }

    /// Serializes and writes one frame.
    ///
    /// Returns `false` without queueing when the socket is not open or the
    /// write fails; callers must not assume delivery.
    pub async fn send(&self, frame: &WireFrame) -> bool {
        if !self.is_connected() {
            tracing::debug!(kind = %frame.kind, "socket not open, frame dropped");
            return false;
        }
        let text = match codec::encode(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound frame");
                return false;
            }
        };
        let mut writer = self.shared.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return false;
        };
        match writer.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "outbound frame not sent");
                false
            }
        }
    }

    /// Stops the session: no further reconnect attempts, socket closed.
    ///
    /// Idempotent. A pending backoff sleep, or a first attempt still in
    /// [`ConnectionState::Connecting`], is cancelled immediately.
    pub async fn disconnect(&self) {
        if let Some(connecting) = self.shared.connecting.lock().take() {
            connecting.cancel();
        }
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.shared.manual_close.store(true, Ordering::SeqCst);
        self.shared.stop_session().await;
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl<A: ChatApi, C: Connector> Drop for ConnectionManager<A, C> {
    fn drop(&mut self) {
        if let Some(session) = self.shared.session.lock().take() {
            session.cancel.cancel();
        }
    }
}

impl<A: ChatApi, C: Connector> Shared<A, C> {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
            self.dispatcher.publish(ClientEvent::StateChanged(next));
        }
    }

    /// Session handshake followed by opening the socket.
    async fn open_once(&self) -> Result<C::Reader, ConnectError> {
        let token = self.api.start_session().await?;
        let url = transport_url(self.api.base_url(), &token.session_token)?;
        tracing::debug!(
            transport = %self.connector.transport_type(),
            host = url.host_str().unwrap_or(""),
            path = url.path(),
            "opening chat socket"
        );
        let (writer, reader) = self.connector.open(&url).await?;
        *self.writer.lock().await = Some(writer);
        Ok(reader)
    }

    async fn stop_session(&self) {
        let session = self.session.lock().take();
        if let Some(Session { cancel, task }) = session {
            cancel.cancel();
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("connection supervisor panicked");
                }
            }
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.close().await;
        }
    }

    fn handle_text(&self, text: &str) {
        match codec::decode_event(text) {
            Ok(Some(event)) => self.dispatcher.publish(ClientEvent::Inbound(event)),
            Ok(None) => tracing::debug!("frame of unknown kind dropped"),
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame, skipping");
                self.dispatcher.publish(ClientEvent::Notice(Notice::MalformedFrame {
                    reason: e.to_string(),
                }));
            }
        }
    }
}

/// Supervisor task: receive until the socket is lost, then reconnect.
async fn supervise<A: ChatApi, C: Connector>(
    shared: Arc<Shared<A, C>>,
    cancel: CancellationToken,
    mut phase: Phase<C::Reader>,
) {
    let mut backoff = Backoff::from(shared.reconnect);
    loop {
        let reader = match phase {
            Phase::Receive(reader) => reader,
            Phase::Reconnect => match reconnect_loop(&shared, &cancel, &mut backoff).await {
                Some(reader) => reader,
                None => return,
            },
        };

        match receive_loop(&shared, &cancel, reader).await {
            ReceiveEnd::Cancelled => return,
            ReceiveEnd::Lost => {
                shared.writer.lock().await.take();
                if shared.manual_close.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    return;
                }
                phase = Phase::Reconnect;
            }
        }
    }
}

async fn receive_loop<A: ChatApi, C: Connector>(
    shared: &Shared<A, C>,
    cancel: &CancellationToken,
    mut reader: C::Reader,
) -> ReceiveEnd {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReceiveEnd::Cancelled,
            frame = reader.next_frame() => frame,
        };
        match frame {
            Some(Ok(Frame::Text(text))) => shared.handle_text(&text),
            Some(Ok(Frame::Close(reason))) => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "chat socket closed by server");
                return ReceiveEnd::Lost;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "chat socket read failed");
                return ReceiveEnd::Lost;
            }
            None => {
                tracing::info!("chat socket stream ended");
                return ReceiveEnd::Lost;
            }
        }
    }
}

/// Retries with backoff until open, or returns `None` when cancelled.
async fn reconnect_loop<A: ChatApi, C: Connector>(
    shared: &Shared<A, C>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Option<C::Reader> {
    shared.set_state(ConnectionState::Reconnecting);
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let delay = backoff.next_delay();
        tracing::info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after backoff"
        );
        shared
            .dispatcher
            .publish(ClientEvent::Reconnecting { attempt, delay });

        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            result = shared.open_once() => result,
        };
        match result {
            Ok(reader) => {
                backoff.reset();
                shared.set_state(ConnectionState::Open);
                tracing::info!(attempt, "chat socket reconnected");
                return Some(reader);
            }
            Err(e) => tracing::warn!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
}
