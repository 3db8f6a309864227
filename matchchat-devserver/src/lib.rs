//! In-memory `MatchChat` backend.
//!
//! Implements the REST endpoints and chat socket the client library talks
//! to, backed by process memory. Used by the integration tests and for
//! running the headless client locally.

pub mod config;
pub mod server;
pub mod store;
