//! Tick-to-candle pipeline
//!
//! One dispatcher reads the tick stream and fans every tick out to a bounded
//! queue per resolution. Each resolution has its own worker task owning a
//! [`CandleAggregator`] and writing every candle change to the store.
//!
//! Dispatch awaits queue capacity, so a slow resolution eventually slows the
//! whole stream down instead of growing memory. On cancellation or end of
//! stream the queues are closed and every worker drains before `run` returns.
//! Cancellation is checked between ticks, never halfway through a fan-out.

mod worker;

pub use worker::ResolutionStats;

use crate::candle::{CandleAggregator, Resolution, VolumeMode};
use crate::config::Config;
use crate::feed::{FeedError, Tick, TickFeed, TickStream};
use crate::store::{CandleStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use worker::ResolutionWorker;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No resolutions configured")]
    NoResolutions,
    #[error("Failed to provision {resolution} table: {source}")]
    Provision {
        resolution: Resolution,
        #[source]
        source: StoreError,
    },
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("{resolution} worker failed: {source}")]
    Worker {
        resolution: Resolution,
        #[source]
        source: JoinError,
    },
}

/// What to aggregate and how
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub instrument: String,
    pub resolutions: Vec<Resolution>,
    pub volume_mode: VolumeMode,
    /// Per-resolution queue capacity
    pub queue_capacity: usize,
}

impl PipelineConfig {
    pub fn new(instrument: impl Into<String>, resolutions: Vec<Resolution>) -> Self {
        Self {
            instrument: instrument.into(),
            resolutions,
            volume_mode: VolumeMode::default(),
            queue_capacity: 256,
        }
    }

    pub fn with_volume_mode(mut self, volume_mode: VolumeMode) -> Self {
        self.volume_mode = volume_mode;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            instrument: config.feed.product_code.clone(),
            resolutions: config.aggregation.resolutions.clone(),
            volume_mode: config.aggregation.volume_mode,
            queue_capacity: config.aggregation.queue_capacity,
        }
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    /// Ticks handed to every worker
    pub ticks_dispatched: u64,
    /// One entry per configured resolution, in configuration order
    pub resolutions: Vec<ResolutionStats>,
}

impl PipelineStats {
    /// Stats for one resolution
    pub fn resolution(&self, resolution: Resolution) -> Option<&ResolutionStats> {
        self.resolutions.iter().find(|s| s.resolution == resolution)
    }

    /// Failed writes across all resolutions
    pub fn store_errors(&self) -> u64 {
        self.resolutions.iter().map(|s| s.store_errors).sum()
    }
}

/// Feed-to-store candle pipeline
pub struct Pipeline<S> {
    config: PipelineConfig,
    store: Arc<S>,
}

impl<S: CandleStore> Pipeline<S> {
    pub fn new(config: PipelineConfig, store: Arc<S>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Make sure every resolution has a table before any tick is read
    pub async fn provision(&self) -> Result<(), PipelineError> {
        if self.config.resolutions.is_empty() {
            return Err(PipelineError::NoResolutions);
        }

        for &resolution in &self.config.resolutions {
            self.store
                .ensure_table(&self.config.instrument, resolution)
                .await
                .map_err(|source| PipelineError::Provision { resolution, source })?;
        }
        Ok(())
    }

    /// Subscribe to `feed` and aggregate until cancellation or end of stream
    pub async fn run<F>(&self, feed: &F, cancel: CancellationToken) -> Result<PipelineStats, PipelineError>
    where
        F: TickFeed + ?Sized,
    {
        self.provision().await?;
        let stream = feed.subscribe(cancel.clone()).await?;
        self.dispatch(stream, cancel).await
    }

    /// Aggregate an already open tick stream
    pub async fn run_stream(
        &self,
        stream: TickStream,
        cancel: CancellationToken,
    ) -> Result<PipelineStats, PipelineError> {
        self.provision().await?;
        self.dispatch(stream, cancel).await
    }

    async fn dispatch(
        &self,
        mut stream: TickStream,
        cancel: CancellationToken,
    ) -> Result<PipelineStats, PipelineError> {
        let capacity = self.config.queue_capacity.max(1);
        let mut queues = Vec::with_capacity(self.config.resolutions.len());
        let mut workers = Vec::with_capacity(self.config.resolutions.len());

        for &resolution in &self.config.resolutions {
            let (tx, rx) = mpsc::channel::<Arc<Tick>>(capacity);
            let aggregator = CandleAggregator::new(
                self.config.instrument.as_str(),
                resolution,
                self.config.volume_mode,
            );
            let worker = ResolutionWorker::new(aggregator, Arc::clone(&self.store));
            workers.push((resolution, tokio::spawn(worker.run(rx))));
            queues.push(tx);
        }

        tracing::info!(
            instrument = %self.config.instrument,
            resolutions = ?self.config.resolutions.iter().map(|r| r.label()).collect::<Vec<_>>(),
            capacity,
            "Pipeline started"
        );

        let mut ticks_dispatched = 0u64;

        loop {
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Pipeline cancelled, draining workers");
                    break;
                }
                tick = stream.next() => match tick {
                    Some(tick) => Arc::new(tick),
                    None => {
                        tracing::info!(state = %stream.state(), "Tick stream ended, draining workers");
                        break;
                    }
                },
            };

            // A tick already read reaches every resolution, even under
            // cancellation, so all workers see the same prefix of the stream
            for queue in &queues {
                if queue.send(Arc::clone(&tick)).await.is_err() {
                    tracing::warn!("Resolution worker stopped early");
                }
            }
            ticks_dispatched += 1;
        }

        // Closing the queues lets each worker finish what is already queued
        drop(queues);

        let mut resolutions = Vec::with_capacity(workers.len());
        let mut worker_error = None;
        for (resolution, handle) in workers {
            match handle.await {
                Ok(stats) => resolutions.push(stats),
                Err(source) => {
                    tracing::error!(error = %source, %resolution, "Resolution worker panicked");
                    if worker_error.is_none() {
                        worker_error = Some(PipelineError::Worker { resolution, source });
                    }
                }
            }
        }

        let stats = PipelineStats {
            ticks_dispatched,
            resolutions,
        };
        tracing::info!(
            ticks = stats.ticks_dispatched,
            store_errors = stats.store_errors(),
            "Pipeline drained"
        );

        if let Some(e) = worker_error {
            return Err(e);
        }
        stream.finish().await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::{BucketKey, Candle};
    use crate::store::UpsertOutcome;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// In-memory store keyed like the SQLite tables
    #[derive(Default)]
    struct MemoryStore {
        tables: Mutex<HashSet<(String, Resolution)>>,
        rows: Mutex<HashMap<BucketKey, Candle>>,
    }

    #[async_trait]
    impl CandleStore for MemoryStore {
        async fn ensure_table(&self, instrument: &str, resolution: Resolution) -> Result<(), StoreError> {
            self.tables
                .lock()
                .unwrap()
                .insert((instrument.to_string(), resolution));
            Ok(())
        }

        async fn upsert(&self, key: &BucketKey, candle: &Candle) -> Result<UpsertOutcome, StoreError> {
            let previous = self.rows.lock().unwrap().insert(key.clone(), candle.clone());
            Ok(match previous {
                Some(_) => UpsertOutcome::Updated,
                None => UpsertOutcome::Created,
            })
        }
    }

    /// Memory store whose minute writes wait for the gate to open
    struct GatedStore {
        inner: MemoryStore,
        gate: Semaphore,
    }

    #[async_trait]
    impl CandleStore for GatedStore {
        async fn ensure_table(&self, instrument: &str, resolution: Resolution) -> Result<(), StoreError> {
            self.inner.ensure_table(instrument, resolution).await
        }

        async fn upsert(&self, key: &BucketKey, candle: &Candle) -> Result<UpsertOutcome, StoreError> {
            if key.resolution == Resolution::MINUTE {
                let _permit = self.gate.acquire().await.unwrap();
            }
            self.inner.upsert(key, candle).await
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    fn tick(secs: u32, ltp: Decimal) -> Tick {
        Tick::new("BTC_JPY", at(secs), ltp)
    }

    async fn run_ticks(
        config: PipelineConfig,
        ticks: Vec<Tick>,
    ) -> (Arc<MemoryStore>, PipelineStats) {
        let store = Arc::new(MemoryStore::default());
        let pipeline = Pipeline::new(config, Arc::clone(&store));

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for t in ticks {
                tx.send(t).await.unwrap();
            }
        });

        let stats = pipeline
            .run_stream(TickStream::from_receiver(rx), CancellationToken::new())
            .await
            .unwrap();
        (store, stats)
    }

    #[tokio::test]
    async fn test_provisions_every_resolution() {
        let config = PipelineConfig::new("BTC_JPY", vec![Resolution::SECOND, Resolution::MINUTE]);
        let (store, stats) = run_ticks(config, vec![]).await;

        assert_eq!(store.tables.lock().unwrap().len(), 2);
        assert_eq!(stats.ticks_dispatched, 0);
        assert_eq!(stats.resolutions.len(), 2);
    }

    #[tokio::test]
    async fn test_no_resolutions_is_rejected() {
        let pipeline = Pipeline::new(
            PipelineConfig::new("BTC_JPY", vec![]),
            Arc::new(MemoryStore::default()),
        );
        assert!(matches!(
            pipeline.provision().await,
            Err(PipelineError::NoResolutions)
        ));
    }

    #[tokio::test]
    async fn test_minute_scenario() {
        let config = PipelineConfig::new("BTC_JPY", vec![Resolution::MINUTE]);
        let ticks = vec![tick(0, dec!(100)), tick(30, dec!(105)), tick(70, dec!(99))];
        let (store, stats) = run_ticks(config, ticks).await;

        let minute = stats.resolution(Resolution::MINUTE).unwrap();
        assert_eq!(stats.ticks_dispatched, 3);
        assert_eq!(minute.finalized, 1);
        assert_eq!(minute.created, 2);
        // Second tick rewrites the first bucket; rollover rewrites it again
        assert_eq!(minute.updated, 2);

        let rows = store.rows.lock().unwrap();
        let first = &rows[&BucketKey::new("BTC_JPY", Resolution::MINUTE, at(0))];
        assert_eq!(
            (first.open, first.high, first.low, first.close),
            (dec!(100), dec!(105), dec!(100), dec!(105))
        );
        let second = &rows[&BucketKey::new("BTC_JPY", Resolution::MINUTE, at(60))];
        assert_eq!(
            (second.open, second.high, second.low, second.close),
            (dec!(99), dec!(99), dec!(99), dec!(99))
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = Pipeline::new(
            PipelineConfig::new("BTC_JPY", vec![Resolution::SECOND]),
            Arc::clone(&store),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(tick(0, dec!(1))).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = pipeline
            .run_stream(TickStream::from_receiver(rx), cancel)
            .await
            .unwrap();

        assert_eq!(stats.ticks_dispatched, 0);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_fan_out_finishes_the_current_tick() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::default(),
            gate: Semaphore::new(0),
        });
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::new("BTC_JPY", vec![Resolution::SECOND, Resolution::MINUTE])
                .with_queue_capacity(1),
            Arc::clone(&store),
        ));

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let run = {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run_stream(TickStream::from_receiver(rx), cancel).await })
        };

        for secs in 0..3 {
            tx.send(tick(secs, dec!(100))).await.unwrap();
        }

        // The minute worker is stuck on its first write, so the third tick
        // reaches the second queue and then waits on the full minute queue
        let seconds_stored = || {
            store
                .inner
                .rows
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.resolution == Resolution::SECOND)
                .count()
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while seconds_stored() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("second resolution did not receive every tick");
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();
        store.gate.add_permits(1);

        let stats = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("pipeline did not stop after cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(stats.ticks_dispatched, 3);
        assert_eq!(stats.resolution(Resolution::SECOND).unwrap().ticks, 3);
        assert_eq!(stats.resolution(Resolution::MINUTE).unwrap().ticks, 3);
        drop(tx);
    }

    #[test]
    fn test_pipeline_config_from_config() {
        let config = Config::default();
        let pipeline_config = PipelineConfig::from(&config);
        assert_eq!(pipeline_config.instrument, "BTC_JPY");
        assert_eq!(pipeline_config.resolutions.len(), 3);
        assert_eq!(pipeline_config.queue_capacity, 256);
    }
}
