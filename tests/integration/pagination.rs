// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! History paging through a long conversation on the development backend.
//!
//! With the default window (125 visible, 70 fetched on open, 40 shown,
//! pages of 30) a 200-message history cannot fit, so scrolling to either
//! end must evict from the other while keeping ids unique and ordered.

use std::sync::Arc;
use std::time::Duration;

use matchchat::api::http::{Credentials, HttpApi};
use matchchat::client::{ChatClient, ConversationView};
use matchchat::config::ClientConfig;
use matchchat::transport::websocket::WsConnector;
use matchchat::window::LoadOutcome;
use matchchat_devserver::server::{DevState, start_server_with_state};
use matchchat_proto::message::{ConversationId, UserId};
use url::Url;

type Client = ChatClient<HttpApi, WsConnector>;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const HISTORY: i64 = 200;
const MAX_VISIBLE: usize = 125;

async fn setup() -> (Client, ConversationId, tokio::task::JoinHandle<()>) {
    let state = Arc::new(DevState::new());
    state.install_tokens(ALICE, "token-a", "refresh-a").await;
    let chat = state.store.create_conversation(ALICE, BOB).await;
    state
        .store
        .seed_history(chat, usize::try_from(HISTORY).unwrap())
        .await
        .unwrap();
    let (addr, server) = start_server_with_state("127.0.0.1:0", state).await.unwrap();

    let api = HttpApi::new(
        Url::parse(&format!("http://{addr}")).unwrap(),
        Credentials {
            user_id: ALICE,
            access_token: "token-a".into(),
            refresh_token: Some("refresh-a".into()),
        },
    )
    .unwrap();
    let client = ChatClient::new(
        Arc::new(api),
        WsConnector::new(Duration::from_secs(5)),
        &ClientConfig::default(),
    );
    client.load_conversations().await.unwrap();
    (client, chat, server)
}

fn visible_ids(view: &ConversationView<HttpApi>) -> Vec<i64> {
    view.messages().iter().map(|m| m.id.get()).collect()
}

fn assert_window_sane(view: &ConversationView<HttpApi>) {
    let ids = visible_ids(view);
    assert!(ids.len() <= MAX_VISIBLE, "window grew to {}", ids.len());
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "ids not strictly ascending: {ids:?}"
    );
}

#[tokio::test]
async fn opening_shows_the_most_recent_page() {
    let (client, chat, _server) = setup().await;
    let view = client.open_conversation(chat).await.unwrap();

    assert_eq!(visible_ids(&view), (161..=HISTORY).collect::<Vec<_>>());
    assert!(view.buffer().is_at_newest());
    assert!(!view.buffer().is_at_oldest());
    assert!(view.messages().iter().filter(|m| m.sender_id == ALICE).all(|m| m.is_mine));
}

#[tokio::test]
async fn scrolling_to_the_start_and_back_to_the_end() {
    let (client, chat, _server) = setup().await;
    let view = client.open_conversation(chat).await.unwrap();

    let mut steps = 0;
    while !view.buffer().is_at_oldest() {
        let outcome = view.show_older().await.unwrap();
        assert_window_sane(&view);
        steps += 1;
        assert!(steps < 20, "never reached the start, last outcome {outcome:?}");
    }
    let ids = visible_ids(&view);
    assert_eq!(ids[0], 1);
    assert!(!view.buffer().is_at_newest(), "tail must have been evicted");

    steps = 0;
    while !view.buffer().is_at_newest() {
        view.show_newer().await.unwrap();
        assert_window_sane(&view);
        steps += 1;
        assert!(steps < 20, "never reached the end");
    }
    assert_eq!(*visible_ids(&view).last().unwrap(), HISTORY);
    assert!(!view.buffer().is_at_oldest(), "head must have been evicted");
}

#[tokio::test]
async fn loading_past_the_start_makes_no_request() {
    let (client, chat, _server) = setup().await;
    let view = client.open_conversation(chat).await.unwrap();
    while !view.buffer().is_at_oldest() {
        view.show_older().await.unwrap();
    }

    assert_eq!(view.buffer().load_older().await.unwrap(), LoadOutcome::Skipped);
    let outcome = view.show_older().await.unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(outcome.evicted, 0);
}

#[tokio::test]
async fn sending_while_scrolled_back_keeps_the_message_out_of_view() {
    let (client, chat, _server) = setup().await;
    let view = client.open_conversation(chat).await.unwrap();
    while !view.buffer().is_at_oldest() {
        view.show_older().await.unwrap();
    }
    let before = visible_ids(&view);

    let sent = view.send_text("from the past").await.unwrap();
    assert_eq!(visible_ids(&view), before);

    while !view.buffer().is_at_newest() {
        view.show_newer().await.unwrap();
    }
    assert_eq!(view.messages().last().unwrap().id, sent.id);
    assert_window_sane(&view);
}
