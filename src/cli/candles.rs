//! Candles command implementation

use crate::candle::Resolution;
use crate::config::Config;
use crate::store::SqliteCandleStore;
use clap::Args;

#[derive(Args, Debug)]
pub struct CandlesArgs {
    /// Resolution to show (e.g., 1s, 1m, 1h)
    #[arg(short, long)]
    pub resolution: Resolution,

    /// Number of most recent candles
    #[arg(short, long, default_value_t = 20)]
    pub limit: u32,
}

impl CandlesArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = SqliteCandleStore::from_config(&config.store)?;
        let instrument = &config.feed.product_code;
        let candles = store
            .recent_candles(instrument, self.resolution, self.limit)
            .await?;

        if candles.is_empty() {
            println!("No {} candles stored for {}", self.resolution, instrument);
            return Ok(());
        }

        println!(
            "{:<24} {:>14} {:>14} {:>14} {:>14} {:>14}",
            "time", "open", "high", "low", "close", "volume"
        );
        for c in &candles {
            println!(
                "{:<24} {:>14} {:>14} {:>14} {:>14} {:>14}",
                c.bucket_start.format("%Y-%m-%d %H:%M:%S").to_string(),
                c.open.to_string(),
                c.high.to_string(),
                c.low.to_string(),
                c.close.to_string(),
                c.volume.round_dp(8).to_string()
            );
        }
        Ok(())
    }
}
