#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the message window and the undo deque.
//!
//! 1. Any interleaving of older/newer paging and live messages, including
//!    live messages landing while a newer page is in flight, keeps the
//!    window bounded, ordered, and disjoint from its staged batches, and
//!    paging newer afterwards still reaches the latest message.
//! 2. Any sequence of appends and cursor moves keeps the deque's current
//!    item equal to a naive model's, and never evicts inside the undo zone.

use matchchat::config::WindowConfig;
use matchchat::deque::BoundedUndoDeque;
use matchchat::window::{Direction, MessageWindow};
use matchchat_proto::message::{ConversationId, Message, MessageId, UserId};
use proptest::prelude::*;

const ME: UserId = UserId::new(1);
const PEER: UserId = UserId::new(2);
const CHAT: ConversationId = ConversationId::new(7);

fn message(id: i64) -> Message {
    let mine = id % 3 == 0;
    Message {
        id: MessageId::new(id),
        conversation_id: CHAT,
        sender_id: if mine { ME } else { PEER },
        receiver_id: if mine { PEER } else { ME },
        content: format!("m{id}"),
        is_read: false,
        created_at: None,
        is_mine: false,
    }
}

/// What the server would answer for a page request.
fn server_page(history: &[Message], direction: Direction, anchor: MessageId, limit: usize) -> Vec<Message> {
    match direction {
        Direction::Older => {
            let end = history.partition_point(|m| m.id < anchor);
            history[end.saturating_sub(limit)..end].to_vec()
        }
        Direction::Newer => {
            let start = history.partition_point(|m| m.id <= anchor);
            history[start..].iter().take(limit).cloned().collect()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WindowOp {
    Older,
    Newer,
    Live,
    LiveDuringNewerFetch,
}

fn window_op() -> impl Strategy<Value = WindowOp> {
    prop_oneof![
        3 => Just(WindowOp::Older),
        3 => Just(WindowOp::Newer),
        2 => Just(WindowOp::Live),
        2 => Just(WindowOp::LiveDuringNewerFetch),
    ]
}

fn page_in(window: &mut MessageWindow, history: &[Message], direction: Direction, page_size: usize) {
    if let Some(ticket) = window.begin_fetch(direction).unwrap() {
        let page = server_page(history, direction, ticket.anchor(), page_size);
        window.finish_fetch(&ticket, Ok(page)).unwrap();
    }
    window.splice(direction);
}

/// The server answers from a snapshot taken before the live message lands.
fn live_during_newer_fetch(window: &mut MessageWindow, history: &mut Vec<Message>, page_size: usize) {
    let ticket = window.begin_fetch(Direction::Newer).unwrap();
    let page = ticket.map(|t| server_page(history, Direction::Newer, t.anchor(), page_size));
    let next = i64::try_from(history.len()).unwrap() + 1;
    history.push(message(next));
    window.admit(message(next));
    if let (Some(ticket), Some(page)) = (ticket, page) {
        window.finish_fetch(&ticket, Ok(page)).unwrap();
    }
    window.splice(Direction::Newer);
}

fn assert_window_invariants(window: &MessageWindow, config: WindowConfig) {
    let ids = window.ids();
    assert!(ids.len() <= config.max_size, "{} visible", ids.len());
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    let (Some(first), Some(last)) = (ids.first(), ids.last()) else {
        return;
    };
    assert!(window.staged_ids(Direction::Older).iter().all(|id| id < first));
    assert!(window.staged_ids(Direction::Newer).iter().all(|id| id > last));
}

proptest! {
    #[test]
    fn window_stays_bounded_ordered_and_disjoint(
        history_len in 0i64..400,
        ops in prop::collection::vec(window_op(), 0..60),
    ) {
        let config = WindowConfig::default();
        let mut history: Vec<Message> = (1..=history_len).map(message).collect();
        let mut window = MessageWindow::new(config, ME);
        window.reset(CHAT);
        let start = history.len().saturating_sub(config.initial_fetch);
        window.seed(history[start..].to_vec());
        assert_window_invariants(&window, config);

        for op in ops {
            match op {
                WindowOp::Older => page_in(&mut window, &history, Direction::Older, config.page_size),
                WindowOp::Newer => page_in(&mut window, &history, Direction::Newer, config.page_size),
                WindowOp::Live => {
                    let next = i64::try_from(history.len()).unwrap() + 1;
                    history.push(message(next));
                    window.admit(message(next));
                }
                WindowOp::LiveDuringNewerFetch => {
                    live_during_newer_fetch(&mut window, &mut history, config.page_size);
                }
            }
            assert_window_invariants(&window, config);
            for id in window.ids() {
                prop_assert!(id.get() >= 1 && id.get() <= i64::try_from(history.len()).unwrap());
            }
        }

        let mut guard = 0;
        while !window.is_at_newest() {
            page_in(&mut window, &history, Direction::Newer, config.page_size);
            guard += 1;
            prop_assert!(guard < 100);
        }
        prop_assert_eq!(window.ids().last().map(|id| id.get()), history.last().map(|m| m.id.get()));
    }

    #[test]
    fn paging_to_the_end_always_shows_the_latest_message(
        history_len in 1i64..400,
        older_steps in 0usize..15,
    ) {
        let config = WindowConfig::default();
        let history: Vec<Message> = (1..=history_len).map(message).collect();
        let mut window = MessageWindow::new(config, ME);
        window.reset(CHAT);
        let start = history.len().saturating_sub(config.initial_fetch);
        window.seed(history[start..].to_vec());

        for _ in 0..older_steps {
            page_in(&mut window, &history, Direction::Older, config.page_size);
        }
        let mut guard = 0;
        while !window.is_at_newest() {
            page_in(&mut window, &history, Direction::Newer, config.page_size);
            guard += 1;
            prop_assert!(guard < 50);
        }
        prop_assert_eq!(window.ids().last().copied(), Some(MessageId::new(history_len)));
    }
}

#[derive(Debug, Clone, Copy)]
enum DequeOp {
    Add(usize),
    Next,
    Previous,
}

fn deque_op() -> impl Strategy<Value = DequeOp> {
    prop_oneof![
        1 => (1usize..25).prop_map(DequeOp::Add),
        4 => Just(DequeOp::Next),
        2 => Just(DequeOp::Previous),
    ]
}

proptest! {
    #[test]
    fn deque_matches_model_and_protects_undo_zone(
        capacity in 1usize..40,
        undo in 0usize..8,
        ops in prop::collection::vec(deque_op(), 0..120),
    ) {
        let mut deque = BoundedUndoDeque::new(capacity, undo);
        let mut model: Vec<usize> = Vec::new();
        let mut cursor = 0usize;

        for op in ops {
            match op {
                DequeOp::Add(n) => {
                    let from = model.len();
                    model.extend(from..from + n);
                    deque.add_range(from..from + n);
                }
                DequeOp::Next => {
                    let moved = deque.move_next();
                    if cursor < model.len() {
                        cursor += 1;
                    }
                    prop_assert_eq!(moved, cursor < model.len());
                }
                DequeOp::Previous => {
                    if deque.move_previous() {
                        cursor -= 1;
                    }
                }
            }

            prop_assert_eq!(deque.current(), model.get(cursor));
            prop_assert_eq!(deque.remaining_ahead(), model.len().saturating_sub(cursor + 1));
            prop_assert!(deque.position() <= deque.len());
            prop_assert!(deque.len() <= capacity || deque.position() <= undo);
            prop_assert!(deque.iter().zip(deque.iter().skip(1)).all(|(a, b)| a < b));
        }
    }
}
