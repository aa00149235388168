//! Candle aggregation module
//!
//! Turns the tick stream into OHLCV candles at fixed resolutions

mod aggregator;
mod resolution;
mod types;

pub use aggregator::CandleAggregator;
pub use resolution::{Resolution, ResolutionError};
pub use types::{BucketKey, Candle, CandleEvent, VolumeMode};
