//! Candle types

use super::Resolution;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of a persisted candle row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Instrument code (e.g., "BTC_JPY")
    pub instrument: String,
    /// Bucket width
    pub resolution: Resolution,
    /// Inclusive start of the bucket
    pub bucket_start: DateTime<Utc>,
}

impl BucketKey {
    /// Key of the bucket that `timestamp` falls into
    pub fn new(
        instrument: impl Into<String>,
        resolution: Resolution,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            resolution,
            bucket_start: resolution.bucket_start(timestamp),
        }
    }
}

/// How the feed reports traded volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMode {
    /// Running total; a candle accumulates the increase between ticks
    #[default]
    Cumulative,
    /// Each tick carries only its own volume
    PerTick,
}

/// OHLCV candle for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub resolution: Resolution,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Open a new candle from the first price seen in a bucket
    pub fn start(key: BucketKey, price: Decimal, volume: Decimal) -> Self {
        Self {
            instrument: key.instrument,
            resolution: key.resolution,
            bucket_start: key.bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Fold another price into the candle
    pub fn apply(&mut self, price: Decimal, volume: Decimal) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += volume;
    }

    /// Row key for this candle
    pub fn key(&self) -> BucketKey {
        BucketKey {
            instrument: self.instrument.clone(),
            resolution: self.resolution,
            bucket_start: self.bucket_start,
        }
    }

    /// Exclusive end of the bucket
    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + self.resolution.as_duration()
    }

    /// `low <= open, close <= high`
    pub fn is_consistent(&self) -> bool {
        self.low <= self.high
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// Change produced by the aggregator for one tick
#[derive(Debug, Clone, PartialEq)]
pub enum CandleEvent {
    /// Bucket closed; this is its last state
    Finalized(Candle),
    /// Current bucket created or changed
    Updated(Candle),
}

impl CandleEvent {
    /// The candle carried by this event
    pub fn candle(&self) -> &Candle {
        match self {
            CandleEvent::Finalized(candle) | CandleEvent::Updated(candle) => candle,
        }
    }

    /// Check if the event closes a bucket
    pub fn is_finalized(&self) -> bool {
        matches!(self, CandleEvent::Finalized(_))
    }
}
