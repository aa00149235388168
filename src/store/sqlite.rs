//! SQLite-backed candle store

use super::{candle_table_name, CandleStore, StoreError, UpsertOutcome};
use crate::candle::{BucketKey, Candle, Resolution};
use crate::config::StoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Candle store over a single SQLite connection.
///
/// Blocking database work runs on the blocking pool; the connection is
/// shared behind a mutex so every statement sees a consistent database.
#[derive(Clone)]
pub struct SqliteCandleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCandleStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        // Pragmas (best-effort).
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            tracing::warn!(error = %e, "Could not enable WAL mode");
        }
        init_schema(&conn)?;

        tracing::info!(path = %path.display(), "Opened candle store");
        Ok(Self::from_connection(conn))
    }

    /// Open using the `[store]` section of the configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        })
        .await?
    }

    /// The stored candle at `key`, if any
    pub async fn get_candle(&self, key: &BucketKey) -> Result<Option<Candle>, StoreError> {
        let table = candle_table_name(&key.instrument, key.resolution)?;
        let key = key.clone();

        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(None);
            }
            let sql = format!(
                r#"SELECT time, open, close, high, low, volume FROM "{}" WHERE time = ?1"#,
                table
            );
            let row = conn
                .query_row(&sql, params![format_time(key.bucket_start)], |row| {
                    CandleRow::from_row(row)
                })
                .optional()?;
            row.map(|r| r.into_candle(&key.instrument, key.resolution))
                .transpose()
        })
        .await
    }

    /// The newest `limit` candles, returned oldest first
    pub async fn recent_candles(
        &self,
        instrument: &str,
        resolution: Resolution,
        limit: u32,
    ) -> Result<Vec<Candle>, StoreError> {
        let table = candle_table_name(instrument, resolution)?;
        let instrument = instrument.to_string();

        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(Vec::new());
            }
            let sql = format!(
                r#"SELECT time, open, close, high, low, volume FROM "{}" ORDER BY time DESC LIMIT ?1"#,
                table
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit], CandleRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            // Reverse to chronological order.
            let mut candles = rows
                .into_iter()
                .map(|r| r.into_candle(&instrument, resolution))
                .collect::<Result<Vec<_>, _>>()?;
            candles.reverse();
            Ok(candles)
        })
        .await
    }

    /// Number of rows in the `(instrument, resolution)` table
    pub async fn row_count(&self, instrument: &str, resolution: Resolution) -> Result<u64, StoreError> {
        let table = candle_table_name(instrument, resolution)?;

        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(0);
            }
            let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, table);
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn ensure_table(&self, instrument: &str, resolution: Resolution) -> Result<(), StoreError> {
        let table = candle_table_name(instrument, resolution)?;

        self.with_conn(move |conn| {
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{}" (
                    time TEXT PRIMARY KEY NOT NULL,
                    open REAL,
                    close REAL,
                    high REAL,
                    low REAL,
                    volume REAL
                );
                "#,
                table
            ))?;
            tracing::debug!(table = %table, "Candle table ready");
            Ok(())
        })
        .await
    }

    async fn upsert(&self, key: &BucketKey, candle: &Candle) -> Result<UpsertOutcome, StoreError> {
        let table = candle_table_name(&key.instrument, key.resolution)?;
        let time = format_time(key.bucket_start);
        let values = [
            to_real(candle.open, "open")?,
            to_real(candle.close, "close")?,
            to_real(candle.high, "high")?,
            to_real(candle.low, "low")?,
            to_real(candle.volume, "volume")?,
        ];

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                &format!(
                    r#"UPDATE "{}" SET open = ?2, close = ?3, high = ?4, low = ?5, volume = ?6 WHERE time = ?1"#,
                    table
                ),
                params![time, values[0], values[1], values[2], values[3], values[4]],
            )?;

            let outcome = if updated == 0 {
                tx.execute(
                    &format!(
                        r#"INSERT INTO "{}" (time, open, close, high, low, volume) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                        table
                    ),
                    params![time, values[0], values[1], values[2], values[3], values[4]],
                )?;
                UpsertOutcome::Created
            } else {
                UpsertOutcome::Updated
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }
}

/// Tables shared by every instrument
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS signal_events (
            time TEXT PRIMARY KEY NOT NULL,
            product_code TEXT,
            side TEXT,
            price REAL,
            size REAL
        );
        "#,
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_real(value: Decimal, column: &str) -> Result<f64, StoreError> {
    value
        .to_f64()
        .ok_or_else(|| StoreError::InvalidValue(format!("{} = {} does not fit REAL", column, value)))
}

fn from_real(value: f64, column: &str) -> Result<Decimal, StoreError> {
    Decimal::from_f64(value)
        .ok_or_else(|| StoreError::InvalidValue(format!("{} = {} is not a decimal", column, value)))
}

struct CandleRow {
    time: String,
    open: f64,
    close: f64,
    high: f64,
    low: f64,
    volume: f64,
}

impl CandleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            time: row.get(0)?,
            open: row.get(1)?,
            close: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            volume: row.get(5)?,
        })
    }

    fn into_candle(self, instrument: &str, resolution: Resolution) -> Result<Candle, StoreError> {
        let bucket_start = DateTime::parse_from_rfc3339(&self.time)
            .map_err(|e| StoreError::InvalidValue(format!("time = {:?}: {}", self.time, e)))?
            .with_timezone(&Utc);

        Ok(Candle {
            instrument: instrument.to_string(),
            resolution,
            bucket_start,
            open: from_real(self.open, "open")?,
            high: from_real(self.high, "high")?,
            low: from_real(self.low, "low")?,
            close: from_real(self.close, "close")?,
            volume: from_real(self.volume, "volume")?,
        })
    }
}
