//! Tick-to-candle aggregation for a single resolution
//!
//! Each aggregator owns the one candle that is still open for its
//! (instrument, resolution) pair. Ticks must arrive in feed order; a tick
//! whose bucket is older than the open one is dropped rather than reopening a
//! bucket that has already been handed to the store.

use super::types::{BucketKey, Candle, CandleEvent, VolumeMode};
use super::Resolution;
use crate::feed::Tick;
use rust_decimal::Decimal;

/// Folds ticks into candles of one resolution
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    /// Instrument this aggregator accepts
    instrument: String,

    /// Bucket width
    resolution: Resolution,

    /// Interpretation of the tick volume field
    volume_mode: VolumeMode,

    /// Candle for the newest bucket seen so far
    current: Option<Candle>,

    /// Last cumulative volume figure, for `VolumeMode::Cumulative`
    last_cumulative: Option<Decimal>,

    /// Ticks dropped because their bucket was already closed
    late_ticks: u64,
}

impl CandleAggregator {
    /// Create an aggregator for one instrument and resolution
    pub fn new(
        instrument: impl Into<String>,
        resolution: Resolution,
        volume_mode: VolumeMode,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            resolution,
            volume_mode,
            current: None,
            last_cumulative: None,
            late_ticks: 0,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The open candle, if any tick has been accepted
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Number of out-of-order ticks dropped so far
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Fold one tick into the open bucket.
    ///
    /// Returns:
    /// - nothing for ticks of another instrument or late ticks
    /// - `[Updated]` when a bucket is opened or changed
    /// - `[Finalized(old), Updated(new)]` when the tick starts a newer bucket
    pub fn ingest(&mut self, tick: &Tick) -> Vec<CandleEvent> {
        if tick.instrument != self.instrument {
            tracing::trace!(
                expected = %self.instrument,
                got = %tick.instrument,
                "Ignoring tick for another instrument"
            );
            return Vec::new();
        }

        let key = BucketKey::new(self.instrument.as_str(), self.resolution, tick.timestamp);

        if let Some(current) = &self.current {
            if key.bucket_start < current.bucket_start {
                self.late_ticks += 1;
                tracing::debug!(
                    resolution = %self.resolution,
                    tick_id = tick.tick_id,
                    tick_bucket = %key.bucket_start,
                    current_bucket = %current.bucket_start,
                    "Dropping late tick"
                );
                return Vec::new();
            }
        }

        let contribution = self.volume_contribution(tick.volume_by_product);
        let mut events = Vec::with_capacity(2);

        match self.current.take() {
            Some(mut candle) if candle.bucket_start == key.bucket_start => {
                candle.apply(tick.ltp, contribution);
                events.push(CandleEvent::Updated(candle.clone()));
                self.current = Some(candle);
            }
            previous => {
                if let Some(finished) = previous {
                    events.push(CandleEvent::Finalized(finished));
                }
                let candle = Candle::start(key, tick.ltp, contribution);
                events.push(CandleEvent::Updated(candle.clone()));
                self.current = Some(candle);
            }
        }

        events
    }

    /// Volume this tick adds to the open candle
    fn volume_contribution(&mut self, reported: Decimal) -> Decimal {
        match self.volume_mode {
            VolumeMode::PerTick => reported.max(Decimal::ZERO),
            VolumeMode::Cumulative => {
                let previous = self.last_cumulative.replace(reported);
                match previous {
                    // Resets and rolling-window shrinkage floor at zero
                    Some(previous) => (reported - previous).max(Decimal::ZERO),
                    None => Decimal::ZERO,
                }
            }
        }
    }
}
