//! REST API module
//!
//! Public ticker snapshots and signed account queries against the
//! bitFlyer Lightning HTTP API

mod client;
mod types;

pub use client::{sign, signing_message, BitflyerClient};
pub use types::{Balance, RestError};
