//! `MatchChat` -- real-time chat synchronization engine.
//!
//! Keeps one chat socket alive with reconnect and backoff, fans inbound
//! events out to views, windows each conversation's history under a fixed
//! memory bound, and batches read receipts.

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversations;
pub mod deque;
pub mod dispatch;
pub mod feed;
pub mod receipts;
pub mod transport;
pub mod window;
