//! Run command implementation

use crate::config::Config;
use crate::feed::{LightstreamFeed, StreamConfig};
use crate::pipeline::{Pipeline, PipelineConfig, PipelineStats};
use crate::store::SqliteCandleStore;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    pub duration: Option<u64>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = Arc::new(SqliteCandleStore::from_config(&config.store)?);
        let feed = LightstreamFeed::new(StreamConfig::from(&config.feed));
        let pipeline = Pipeline::new(PipelineConfig::from(config), store);

        let cancel = CancellationToken::new();
        let shutdown = tokio::spawn(wait_for_shutdown(cancel.clone(), self.duration));

        tracing::info!(
            instrument = %config.feed.product_code,
            store = %config.store.path.display(),
            "Starting candle pipeline"
        );

        let result = pipeline.run(&feed, cancel.clone()).await;
        cancel.cancel();
        shutdown.abort();

        let stats = result?;
        print_stats(&stats);
        Ok(())
    }
}

async fn wait_for_shutdown(cancel: CancellationToken, duration: Option<u64>) {
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown requested");
        }
        _ = deadline => {
            tracing::info!("Run duration elapsed");
        }
    }
    cancel.cancel();
}

fn print_stats(stats: &PipelineStats) {
    println!("Ticks dispatched: {}", stats.ticks_dispatched);
    println!(
        "{:>6} {:>8} {:>6} {:>9} {:>8} {:>8} {:>7}",
        "res", "ticks", "late", "finalized", "created", "updated", "errors"
    );
    for s in &stats.resolutions {
        println!(
            "{:>6} {:>8} {:>6} {:>9} {:>8} {:>8} {:>7}",
            s.resolution.to_string(),
            s.ticks,
            s.late_ticks,
            s.finalized,
            s.created,
            s.updated,
            s.store_errors
        );
    }
}
