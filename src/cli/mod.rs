//! CLI interface for tick-candles
//!
//! Provides subcommands for:
//! - `run`: Stream ticks and persist candles
//! - `candles`: Show stored candles
//! - `ticker`: Fetch the current ticker over REST
//! - `balance`: Show account balances (needs API credentials)
//! - `config`: Show the effective configuration

mod account;
mod candles;
mod run;

pub use account::{BalanceArgs, TickerArgs};
pub use candles::CandlesArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tick-candles")]
#[command(about = "Aggregate bitFlyer Lightning ticks into OHLCV candles")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream ticks and persist candles until Ctrl-C
    Run(RunArgs),
    /// Show stored candles
    Candles(CandlesArgs),
    /// Fetch the current ticker over REST
    Ticker(TickerArgs),
    /// Show account balances
    Balance(BalanceArgs),
    /// Show the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Resolution;

    #[test]
    fn test_parse_run_with_duration() {
        let cli = Cli::try_parse_from(["tick-candles", "run", "--duration", "30"]).unwrap();
        assert_eq!(cli.config, "config.toml");
        match cli.command {
            Commands::Run(args) => assert_eq!(args.duration, Some(30)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_candles() {
        let cli = Cli::try_parse_from([
            "tick-candles",
            "--config",
            "custom.toml",
            "candles",
            "--resolution",
            "1m",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config, "custom.toml");
        match cli.command {
            Commands::Candles(args) => {
                assert_eq!(args.resolution, Resolution::MINUTE);
                assert_eq!(args.limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_resolution() {
        assert!(Cli::try_parse_from(["tick-candles", "candles", "--resolution", "1w"]).is_err());
    }
}
