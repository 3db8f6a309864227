//! Shared wire and data model definitions for `MatchChat`.

pub mod codec;
pub mod frame;
pub mod message;
pub mod profile;
pub mod rest;
