//! WebSocket client library
//!
//! Provides a reusable WebSocket transport with cancellation, ping/pong
//! keepalive, and an opt-in bounded reconnection policy.

mod client;
mod types;

pub use client::WsClient;
pub use types::{Backoff, WsConfig, WsError, WsMessage};
