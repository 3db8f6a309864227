// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Reconnect behavior against the development backend.
//!
//! The server drops every socket with `close_all_connections`; the client
//! must move to `Reconnecting`, start a fresh session after the backoff
//! delay and resume live delivery. Backoff is shortened to keep tests fast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use matchchat::api::ChatApi;
use matchchat::api::http::{Credentials, HttpApi};
use matchchat::client::ChatClient;
use matchchat::config::{ClientConfig, ReconnectConfig};
use matchchat::connection::ConnectionState;
use matchchat::dispatch::ClientEvent;
use matchchat::transport::websocket::WsConnector;
use matchchat_devserver::server::{DevState, start_server_with_state};
use matchchat_proto::message::{ConversationId, UserId};
use matchchat_proto::rest::SendMessageRequest;
use tokio::sync::mpsc;
use url::Url;

type Client = ChatClient<HttpApi, WsConnector>;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const BASE_DELAY: Duration = Duration::from_millis(50);

struct Backend {
    base: Url,
    state: Arc<DevState>,
    chat: ConversationId,
    _server: tokio::task::JoinHandle<()>,
}

async fn backend() -> Backend {
    let state = Arc::new(DevState::new());
    for user in [ALICE, BOB] {
        state
            .install_tokens(user, &format!("token-{user}"), &format!("refresh-{user}"))
            .await;
    }
    let chat = state.store.create_conversation(ALICE, BOB).await;
    state.store.seed_history(chat, 4).await.unwrap();
    let (addr, server) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Backend {
        base: Url::parse(&format!("http://{addr}")).unwrap(),
        state,
        chat,
        _server: server,
    }
}

fn api_for(backend: &Backend, user: UserId) -> HttpApi {
    HttpApi::new(
        backend.base.clone(),
        Credentials {
            user_id: user,
            access_token: format!("token-{user}"),
            refresh_token: Some(format!("refresh-{user}")),
        },
    )
    .unwrap()
}

fn client_for(backend: &Backend, user: UserId) -> Client {
    let config = ClientConfig {
        reconnect: ReconnectConfig {
            base_delay: BASE_DELAY,
            max_delay: Duration::from_millis(400),
        },
        ..ClientConfig::default()
    };
    ChatClient::new(
        Arc::new(api_for(backend, user)),
        WsConnector::new(Duration::from_secs(5)),
        &config,
    )
}

async fn wait_for_sockets(state: &DevState, user: UserId, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.connection_count(user).await != count {
        assert!(
            Instant::now() < deadline,
            "expected {count} sockets for {user}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_state(client: &Client, want: ConnectionState) {
    let mut states = client.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("client never reached {want}"))
        .unwrap();
}

/// Collects `Reconnecting` events until the client is open again.
async fn reconnect_events(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<(u32, Duration)> {
    let mut seen = Vec::new();
    let mut reconnecting = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("dispatcher closed");
        match event {
            ClientEvent::StateChanged(ConnectionState::Reconnecting) => reconnecting = true,
            ClientEvent::Reconnecting { attempt, delay } => seen.push((attempt, delay)),
            ClientEvent::StateChanged(ConnectionState::Open) if reconnecting => return seen,
            _ => {}
        }
    }
}

#[tokio::test]
async fn server_close_triggers_reconnect_with_a_new_session() {
    let backend = backend().await;
    let alice = client_for(&backend, ALICE);
    let (_guard, mut events) = alice.subscribe_channel();
    alice.connect().await.unwrap();
    wait_for_sockets(&backend.state, ALICE, 1).await;
    assert_eq!(backend.state.sessions_started(), 1);

    backend.state.close_all_connections().await;

    let attempts = reconnect_events(&mut events).await;
    assert_eq!(attempts, vec![(1, BASE_DELAY)]);
    assert_eq!(alice.state(), ConnectionState::Open);
    wait_for_sockets(&backend.state, ALICE, 1).await;
    assert_eq!(backend.state.sessions_started(), 2);

    alice.disconnect().await;
}

#[tokio::test]
async fn failed_attempts_back_off_exponentially() {
    let backend = backend().await;
    let alice = client_for(&backend, ALICE);
    let (_guard, mut events) = alice.subscribe_channel();
    alice.connect().await.unwrap();
    wait_for_sockets(&backend.state, ALICE, 1).await;

    // The first attempt's session request and its post-refresh retry both fail.
    backend.state.reject_next_requests(2);
    backend.state.close_all_connections().await;

    let attempts = reconnect_events(&mut events).await;
    assert_eq!(attempts, vec![(1, BASE_DELAY), (2, BASE_DELAY * 2)]);
    assert_eq!(alice.state(), ConnectionState::Open);

    alice.disconnect().await;
}

#[tokio::test]
async fn live_delivery_resumes_after_reconnect() {
    let backend = backend().await;
    let alice = client_for(&backend, ALICE);
    alice.connect().await.unwrap();
    wait_for_sockets(&backend.state, ALICE, 1).await;
    alice.load_conversations().await.unwrap();
    let view = alice.open_conversation(backend.chat).await.unwrap();
    assert_eq!(view.messages().len(), 4);

    backend.state.close_all_connections().await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.state.sessions_started() < 2 {
        assert!(Instant::now() < deadline, "client never started a new session");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_state(&alice, ConnectionState::Open).await;
    wait_for_sockets(&backend.state, ALICE, 1).await;

    let sent = api_for(&backend, BOB)
        .send_message(SendMessageRequest {
            chat_id: backend.chat,
            sender_id: BOB,
            receiver_id: ALICE,
            content: "still there?".into(),
        })
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while view.messages().last().map(|m| m.id) != Some(sent.id) {
        assert!(Instant::now() < deadline, "message never arrived after reconnect");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(view.messages().len(), 5);

    view.close().await;
    alice.disconnect().await;
}

#[tokio::test]
async fn disconnect_stops_reconnecting() {
    let backend = backend().await;
    let alice = client_for(&backend, ALICE);
    alice.connect().await.unwrap();
    wait_for_sockets(&backend.state, ALICE, 1).await;

    alice.disconnect().await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    wait_for_sockets(&backend.state, ALICE, 0).await;

    tokio::time::sleep(BASE_DELAY * 6).await;
    assert_eq!(backend.state.sessions_started(), 1);
    assert_eq!(alice.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unreachable_server_is_retried_in_the_background() {
    // Bind then drop a listener to get a port with nothing behind it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let api = HttpApi::new(
        Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
        Credentials {
            user_id: ALICE,
            access_token: "token".into(),
            refresh_token: None,
        },
    )
    .unwrap();
    let config = ClientConfig {
        reconnect: ReconnectConfig {
            base_delay: BASE_DELAY,
            max_delay: BASE_DELAY,
        },
        ..ClientConfig::default()
    };
    let client: Client = ChatClient::new(
        Arc::new(api),
        WsConnector::new(Duration::from_secs(1)),
        &config,
    );

    let err = client.connect().await.unwrap_err();
    assert!(!err.is_permanent());
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
