//! Candle persistence
//!
//! One table per (instrument, resolution), keyed by bucket start. Writes are
//! idempotent upserts so a bucket can be rewritten on every update.

mod sqlite;

pub use sqlite::SqliteCandleStore;

use crate::candle::{BucketKey, Candle, Resolution};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Whether an upsert inserted a new row or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
        }
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid table identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Connection mutex poisoned")]
    Poisoned,
    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable candle storage
#[async_trait]
pub trait CandleStore: Send + Sync + 'static {
    /// Create the table for `(instrument, resolution)` if it does not exist
    async fn ensure_table(&self, instrument: &str, resolution: Resolution) -> Result<(), StoreError>;

    /// Insert or replace the row at `key`; durable once this returns
    async fn upsert(&self, key: &BucketKey, candle: &Candle) -> Result<UpsertOutcome, StoreError>;
}

/// Table holding candles for `(instrument, resolution)`, e.g. `BTC_JPY_1m`
pub fn candle_table_name(instrument: &str, resolution: Resolution) -> Result<String, StoreError> {
    let name = format!("{}_{}", instrument, resolution.label());
    let valid = !instrument.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(name));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_table_name() {
        assert_eq!(
            candle_table_name("BTC_JPY", Resolution::MINUTE).unwrap(),
            "BTC_JPY_1m"
        );
        assert_eq!(
            candle_table_name("FX_BTC_JPY", Resolution::SECOND).unwrap(),
            "FX_BTC_JPY_1s"
        );
    }

    #[test]
    fn test_candle_table_name_rejects_injection() {
        assert!(matches!(
            candle_table_name("BTC\"; DROP TABLE x; --", Resolution::HOUR),
            Err(StoreError::InvalidIdentifier(_))
        ));
        assert!(candle_table_name("", Resolution::HOUR).is_err());
        assert!(candle_table_name("BTC-JPY", Resolution::HOUR).is_err());
    }

    #[test]
    fn test_upsert_outcome_labels() {
        assert_eq!(UpsertOutcome::Created.as_str(), "created");
        assert_eq!(UpsertOutcome::Updated.to_string(), "updated");
    }
}
