//! Ticker feed types

use crate::candle::Resolution;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A single ticker observation from bitFlyer Lightning.
///
/// Field names follow the ticker wire schema; `product_code` may be absent
/// on the wire and is backfilled from the subscription before a tick is
/// emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument code (e.g., "BTC_JPY")
    #[serde(rename = "product_code", default, deserialize_with = "null_as_empty")]
    pub instrument: String,
    /// Board state (e.g., "RUNNING")
    pub state: String,
    /// Exchange event time; must carry an offset on the wire
    pub timestamp: DateTime<Utc>,
    /// Exchange tick sequence id
    pub tick_id: u64,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub best_bid_size: Decimal,
    pub best_ask_size: Decimal,
    pub total_bid_depth: Decimal,
    pub total_ask_depth: Decimal,
    pub market_bid_size: Decimal,
    pub market_ask_size: Decimal,
    /// Last traded price
    pub ltp: Decimal,
    /// 24h volume across the exchange
    pub volume: Decimal,
    /// 24h volume for this instrument
    pub volume_by_product: Decimal,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Tick {
    /// Create a tick quoting `ltp` on both sides of the book
    pub fn new(instrument: impl Into<String>, timestamp: DateTime<Utc>, ltp: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            state: "RUNNING".to_string(),
            timestamp,
            tick_id: 0,
            best_bid: ltp,
            best_ask: ltp,
            best_bid_size: Decimal::ZERO,
            best_ask_size: Decimal::ZERO,
            total_bid_depth: Decimal::ZERO,
            total_ask_depth: Decimal::ZERO,
            market_bid_size: Decimal::ZERO,
            market_ask_size: Decimal::ZERO,
            ltp,
            volume: Decimal::ZERO,
            volume_by_product: Decimal::ZERO,
        }
    }

    /// Set the instrument volume figure
    pub fn with_volume(mut self, volume_by_product: Decimal) -> Self {
        self.volume_by_product = volume_by_product;
        self
    }

    /// Set the exchange sequence id
    pub fn with_tick_id(mut self, tick_id: u64) -> Self {
        self.tick_id = tick_id;
        self
    }

    /// Midpoint of the best bid and ask
    pub fn mid_price(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    /// Start of the bucket this tick belongs to
    pub fn bucket_start(&self, resolution: Resolution) -> DateTime<Utc> {
        resolution.bucket_start(self.timestamp)
    }

    /// Fill in the instrument if the payload omitted it
    pub fn backfill_instrument(&mut self, instrument: &str) -> bool {
        if self.instrument.is_empty() {
            self.instrument = instrument.to_string();
            return true;
        }
        false
    }
}

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No connection attempted yet
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Subscribe request sent, nothing decoded yet
    Subscribed,
    /// At least one message decoded
    Streaming,
    /// Session over; no more ticks will be produced
    Terminated,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Subscribed => "subscribed",
            StreamState::Streaming => "streaming",
            StreamState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
