//! REST-backed commands: ticker snapshot and balances

use crate::config::Config;
use crate::rest::BitflyerClient;
use clap::Args;

#[derive(Args, Debug)]
pub struct TickerArgs {
    /// Instrument to query (defaults to feed.product_code)
    #[arg(short, long)]
    pub product_code: Option<String>,
}

impl TickerArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let client = BitflyerClient::new(&config.rest, config.credentials.clone())?;
        let product_code = self
            .product_code
            .as_deref()
            .unwrap_or(&config.feed.product_code);

        let tick = client.get_ticker(product_code).await?;

        println!("{} ({})", tick.instrument, tick.state);
        println!("  Time:     {}", tick.timestamp);
        println!("  LTP:      {}", tick.ltp);
        println!("  Bid/Ask:  {} / {}", tick.best_bid, tick.best_ask);
        println!("  Mid:      {}", tick.mid_price());
        println!("  Volume:   {}", tick.volume_by_product);
        for resolution in &config.aggregation.resolutions {
            println!("  {:>4} bucket: {}", resolution.to_string(), tick.bucket_start(*resolution));
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// Only show currencies with a non-zero amount
    #[arg(long)]
    pub non_zero: bool,
}

impl BalanceArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let client = BitflyerClient::new(&config.rest, config.credentials.clone())?;
        let balances = client.get_balance().await?;

        println!("{:<8} {:>20} {:>20}", "currency", "amount", "available");
        for b in balances
            .iter()
            .filter(|b| !self.non_zero || !b.amount.is_zero())
        {
            println!(
                "{:<8} {:>20} {:>20}",
                b.currency_code,
                b.amount.to_string(),
                b.available.to_string()
            );
        }
        Ok(())
    }
}
