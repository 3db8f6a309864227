// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! End-to-end chat between two clients through the development backend.
//!
//! Each test starts an in-process `matchchat-devserver`, seeds two users who
//! share one conversation, and drives real `HttpApi` + `WsConnector` clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use matchchat::api::ChatApi;
use matchchat::api::http::{Credentials, HttpApi};
use matchchat::client::ChatClient;
use matchchat::config::ClientConfig;
use matchchat::connection::ConnectionState;
use matchchat::transport::websocket::WsConnector;
use matchchat_devserver::server::{DevState, start_server_with_state};
use matchchat_proto::frame::WireFrame;
use matchchat_proto::message::{ConversationId, UserId};
use matchchat_proto::profile::{CandidateProfile, SearchFilter};
use matchchat_proto::rest::SendMessageRequest;
use url::Url;

type Client = ChatClient<HttpApi, WsConnector>;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

struct Backend {
    base: Url,
    state: Arc<DevState>,
    chat: ConversationId,
    _server: tokio::task::JoinHandle<()>,
}

fn profile(id: UserId, age: u32) -> CandidateProfile {
    CandidateProfile {
        id,
        display_name: Some(format!("user {id}")),
        age: Some(age),
        location: None,
        bio: None,
    }
}

async fn backend(history: usize) -> Backend {
    let state = Arc::new(DevState::new());
    for user in [ALICE, BOB] {
        state.store.add_user(profile(user, 30)).await;
        state
            .install_tokens(user, &format!("token-{user}"), &format!("refresh-{user}"))
            .await;
    }
    let chat = state.store.create_conversation(ALICE, BOB).await;
    state.store.seed_history(chat, history).await.unwrap();
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
    ChatClient::new(
        Arc::new(api_for(backend, user)),
        WsConnector::new(Duration::from_secs(5)),
        &ClientConfig::default(),
    )
}

/// Connects and waits until the server has registered the socket, so
/// pushes sent afterwards cannot race the registration.
async fn connect(client: &Client, backend: &Backend, user: UserId) {
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Open);
    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.state.connection_count(user).await == 0 {
        assert!(Instant::now() < deadline, "socket for {user} never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn message_sent_by_one_user_appears_in_the_other_users_view() {
    let backend = backend(5).await;
    let alice = client_for(&backend, ALICE);
    let bob = client_for(&backend, BOB);
    connect(&alice, &backend, ALICE).await;
    connect(&bob, &backend, BOB).await;
    alice.load_conversations().await.unwrap();
    bob.load_conversations().await.unwrap();

    let alice_view = alice.open_conversation(backend.chat).await.unwrap();
    let bob_view = bob.open_conversation(backend.chat).await.unwrap();
    assert_eq!(alice_view.messages().len(), 5);

    let sent = bob_view.send_text("  hello alice  ").await.unwrap();
    assert_eq!(sent.content, "hello alice");
    assert!(sent.is_mine);
    assert_eq!(bob_view.messages().last().unwrap().id, sent.id);

    wait_until("alice to receive the message", || {
        alice_view.messages().last().map(|m| m.id) == Some(sent.id)
    })
    .await;
    let received = alice_view.messages().pop().unwrap();
    assert_eq!(received.content, "hello alice");
    assert_eq!(received.sender_id, BOB);
    assert!(!received.is_mine);
    assert_eq!(alice_view.messages().len(), 6);

    alice_view.close().await;
    bob_view.close().await;
    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn message_for_an_unopened_conversation_updates_the_chat_list() {
    let backend = backend(3).await;
    let alice = client_for(&backend, ALICE);
    connect(&alice, &backend, ALICE).await;
    alice.load_conversations().await.unwrap();

    let bob_api = api_for(&backend, BOB);
    bob_api
        .send_message(SendMessageRequest {
            chat_id: backend.chat,
            sender_id: BOB,
            receiver_id: ALICE,
            content: "ping".into(),
        })
        .await
        .unwrap();

    wait_until("the chat list row to update", || {
        alice
            .conversations()
            .iter()
            .any(|row| row.id == backend.chat && row.last_message == "ping")
    })
    .await;
    let row = alice.conversations().into_iter().next().unwrap();
    assert_eq!(row.id, backend.chat);
    assert!(!row.is_read);
    assert_eq!(row.last_message_sender, Some(BOB));

    alice.disconnect().await;
}

#[tokio::test]
async fn frames_written_to_the_socket_are_delivered() {
    let backend = backend(0).await;
    let alice = client_for(&backend, ALICE);
    let bob = client_for(&backend, BOB);
    connect(&alice, &backend, ALICE).await;
    connect(&bob, &backend, BOB).await;
    alice.load_conversations().await.unwrap();
    let alice_view = alice.open_conversation(backend.chat).await.unwrap();
    assert!(alice_view.messages().is_empty());

    assert!(bob.send_frame(&WireFrame::chat_message(backend.chat, "over the socket")).await);

    wait_until("the socket message", || !alice_view.messages().is_empty()).await;
    assert_eq!(alice_view.messages()[0].content, "over the socket");

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn closing_a_view_hands_its_last_message_to_the_list() {
    let backend = backend(2).await;
    let alice = client_for(&backend, ALICE);
    alice.load_conversations().await.unwrap();

    let view = alice.open_conversation(backend.chat).await.unwrap();
    view.send_text("see you").await.unwrap();
    view.close().await;

    let row = alice.conversations().into_iter().next().unwrap();
    assert_eq!(row.last_message, "see you");
    assert_eq!(row.last_message_sender, Some(ALICE));
    assert!(row.is_read);
}

#[tokio::test]
async fn expired_token_is_refreshed_transparently() {
    let backend = backend(1).await;
    let alice = client_for(&backend, ALICE);
    backend.state.reject_next_requests(1);

    assert_eq!(alice.load_conversations().await.unwrap(), 1);
    // The original token still works, so the refreshed one must too.
    assert_eq!(alice.load_conversations().await.unwrap(), 1);
}

#[tokio::test]
async fn opening_the_chat_marks_received_history_read() {
    let backend = backend(5).await;
    let alice = client_for(&backend, ALICE);
    alice.load_conversations().await.unwrap();
    let before = alice.conversations();
    assert!(!before[0].is_read, "last seeded message was sent by bob");

    let view = alice.open_conversation(backend.chat).await.unwrap();
    view.close().await;

    alice.load_conversations().await.unwrap();
    assert!(alice.conversations()[0].is_read);
}

#[tokio::test]
async fn candidate_feed_pages_through_search_results() {
    let backend = backend(0).await;
    for id in 10..40 {
        backend.state.store.add_user(profile(UserId::new(id), 25)).await;
    }
    let alice = client_for(&backend, ALICE);
    let feed = alice.candidate_feed(SearchFilter::default());

    assert_eq!(feed.load_more().await.unwrap(), 20);
    assert_eq!(feed.current().unwrap().id, BOB);

    let mut seen = Vec::new();
    while let Some(current) = feed.current() {
        seen.push(current.id);
        feed.skip().await.unwrap();
    }
    // Bob plus users 10..40, each exactly once.
    assert_eq!(seen.len(), 31);
    assert!(feed.is_end_reached());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}
