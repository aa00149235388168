//! Per-resolution worker: aggregate queued ticks and persist every change

use crate::candle::{Candle, CandleAggregator, CandleEvent, Resolution};
use crate::feed::Tick;
use crate::store::{CandleStore, UpsertOutcome};
use crate::telemetry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Counters for one resolution over a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionStats {
    pub resolution: Resolution,
    /// Ticks taken off the queue
    pub ticks: u64,
    /// Ticks dropped because their bucket was already closed
    pub late_ticks: u64,
    /// Buckets finalized by a newer tick
    pub finalized: u64,
    /// Rows inserted
    pub created: u64,
    /// Rows rewritten
    pub updated: u64,
    /// Failed writes
    pub store_errors: u64,
}

impl ResolutionStats {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            ticks: 0,
            late_ticks: 0,
            finalized: 0,
            created: 0,
            updated: 0,
            store_errors: 0,
        }
    }
}

pub(super) struct ResolutionWorker<S> {
    aggregator: CandleAggregator,
    store: Arc<S>,
    stats: ResolutionStats,
}

impl<S: CandleStore> ResolutionWorker<S> {
    pub(super) fn new(aggregator: CandleAggregator, store: Arc<S>) -> Self {
        let stats = ResolutionStats::new(aggregator.resolution());
        Self {
            aggregator,
            store,
            stats,
        }
    }

    /// Drain the queue until the dispatcher drops its sender
    pub(super) async fn run(mut self, mut queue: mpsc::Receiver<Arc<Tick>>) -> ResolutionStats {
        let resolution = self.aggregator.resolution();
        tracing::debug!(%resolution, "Resolution worker started");

        while let Some(tick) = queue.recv().await {
            self.stats.ticks += 1;

            let late_before = self.aggregator.late_ticks();
            let events = self.aggregator.ingest(&tick);
            if self.aggregator.late_ticks() > late_before {
                telemetry::record_late_tick(resolution);
            }

            for event in &events {
                if let CandleEvent::Finalized(candle) = event {
                    self.stats.finalized += 1;
                    tracing::debug!(
                        %resolution,
                        bucket = %candle.bucket_start,
                        open = %candle.open,
                        high = %candle.high,
                        low = %candle.low,
                        close = %candle.close,
                        volume = %candle.volume,
                        "Candle finalized"
                    );
                }
                self.persist(event.candle()).await;
            }
        }

        self.stats.late_ticks = self.aggregator.late_ticks();
        tracing::debug!(
            %resolution,
            ticks = self.stats.ticks,
            store_errors = self.stats.store_errors,
            "Resolution worker drained"
        );
        self.stats
    }

    /// Write one candle; failures are counted and the worker moves on
    async fn persist(&mut self, candle: &Candle) {
        let resolution = self.aggregator.resolution();
        let key = candle.key();
        let started = Instant::now();

        match self.store.upsert(&key, candle).await {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::Created => self.stats.created += 1,
                    UpsertOutcome::Updated => self.stats.updated += 1,
                }
                telemetry::record_upsert(resolution, outcome.as_str(), started.elapsed());
                tracing::trace!(%resolution, bucket = %key.bucket_start, %outcome, "Candle stored");
            }
            Err(e) => {
                self.stats.store_errors += 1;
                telemetry::record_store_error(resolution);
                tracing::warn!(
                    error = %e,
                    %resolution,
                    bucket = %key.bucket_start,
                    "Failed to store candle"
                );
            }
        }
    }
}
