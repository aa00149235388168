use clap::Parser;
use std::path::Path;
use tick_candles::cli::{Cli, Commands};
use tick_candles::config::{Config, Credentials};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenv::dotenv();

    // Load configuration; a missing file falls back to the bundled example
    let config = if Path::new(&cli.config).exists() {
        Config::load(&cli.config)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", cli.config, e))?
    } else {
        eprintln!("Warning: {} not found, using bundled example configuration", cli.config);
        Config::example()?
    };
    let config = config.with_credentials(Credentials::from_env());

    // Initialize telemetry
    let _telemetry = tick_candles::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting candle aggregation");
            args.execute(&config).await?;
        }
        Commands::Candles(args) => args.execute(&config).await?,
        Commands::Ticker(args) => args.execute(&config).await?,
        Commands::Balance(args) => args.execute(&config).await?,
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Feed: {} {}_{}",
                config.feed.endpoint, config.feed.channel_prefix, config.feed.product_code
            );
            println!("  Reconnects: {}", config.feed.max_reconnects);
            println!(
                "  Resolutions: {}",
                config
                    .aggregation
                    .resolutions
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("  Volume mode: {:?}", config.aggregation.volume_mode);
            println!("  Queue capacity: {}", config.aggregation.queue_capacity);
            println!("  Store: {}", config.store.path.display());
            println!("  REST: {}", config.rest.base_url);
            println!("  Credentials: {:?}", config.credentials);
        }
    }

    Ok(())
}
