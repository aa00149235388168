//! Configuration types for tick-candles

use crate::candle::{Resolution, VolumeMode};
use crate::feed::{LIGHTSTREAM_WS_URL, TICKER_CHANNEL_PREFIX};
use crate::telemetry::LogFormat;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Bundled example configuration, used when no config file exists
pub const EXAMPLE_CONFIG: &str = include_str!("../config.toml.example");

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Exchange API credentials; read from the environment, never from TOML
    #[serde(skip)]
    pub credentials: Credentials,
}

/// Realtime feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// JSON-RPC WebSocket endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Instrument to stream (e.g., "BTC_JPY")
    #[serde(default = "default_product_code")]
    pub product_code: String,

    /// Ticker channel prefix
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Capacity of the decoded tick channel
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Reconnection attempts after a transport failure (0 = fail the session)
    #[serde(default)]
    pub max_reconnects: u32,

    /// First reconnect backoff (milliseconds)
    #[serde(default = "default_initial_reconnect_delay_ms")]
    pub initial_reconnect_delay_ms: u64,

    /// Backoff ceiling (seconds)
    #[serde(default = "default_max_reconnect_delay_secs")]
    pub max_reconnect_delay_secs: u64,

    /// Keepalive ping interval (seconds)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_endpoint() -> String {
    LIGHTSTREAM_WS_URL.to_string()
}
fn default_product_code() -> String {
    "BTC_JPY".to_string()
}
fn default_channel_prefix() -> String {
    TICKER_CHANNEL_PREFIX.to_string()
}
fn default_buffer_size() -> usize {
    1024
}
fn default_initial_reconnect_delay_ms() -> u64 {
    1000
}
fn default_max_reconnect_delay_secs() -> u64 {
    60
}
fn default_ping_interval_secs() -> u64 {
    30
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            product_code: default_product_code(),
            channel_prefix: default_channel_prefix(),
            buffer_size: default_buffer_size(),
            max_reconnects: 0,
            initial_reconnect_delay_ms: default_initial_reconnect_delay_ms(),
            max_reconnect_delay_secs: default_max_reconnect_delay_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

/// Candle aggregation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Bucket widths to maintain, e.g. `["1s", "1m", "1h"]`
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<Resolution>,

    /// How the ticker volume figure is turned into candle volume
    #[serde(default)]
    pub volume_mode: VolumeMode,

    /// Per-resolution queue capacity between dispatcher and worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_resolutions() -> Vec<Resolution> {
    vec![Resolution::SECOND, Resolution::MINUTE, Resolution::HOUR]
}
fn default_queue_capacity() -> usize {
    256
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            resolutions: default_resolutions(),
            volume_mode: VolumeMode::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Candle persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a writer waits on a locked database (milliseconds)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("stockdata.sql")
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,

    /// Request timeout (seconds)
    #[serde(default = "default_rest_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rest_base_url() -> String {
    "https://api.bitflyer.com/v1/".to_string()
}
fn default_rest_timeout_secs() -> u64 {
    5
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            timeout_secs: default_rest_timeout_secs(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Expose Prometheus metrics on this port
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
            metrics_port: None,
        }
    }
}

/// Exchange API credentials
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl Credentials {
    pub const API_KEY_VAR: &'static str = "API_KEY";
    pub const API_SECRET_VAR: &'static str = "API_SECRET";

    /// Read `API_KEY` / `API_SECRET` from the process environment.
    ///
    /// Empty values count as unset. Call `dotenv::dotenv()` first to pick up
    /// a `.env` file.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: read(Self::API_KEY_VAR),
            api_secret: read(Self::API_SECRET_VAR),
        }
    }

    /// Both key and secret, if present
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some((key.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<redacted>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The bundled example configuration
    pub fn example() -> anyhow::Result<Self> {
        Self::from_toml_str(EXAMPLE_CONFIG)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed.product_code.trim().is_empty() {
            anyhow::bail!("feed.product_code must not be empty");
        }
        if self.aggregation.resolutions.is_empty() {
            anyhow::bail!("aggregation.resolutions must name at least one resolution");
        }
        let mut seen = HashSet::new();
        for resolution in &self.aggregation.resolutions {
            if !seen.insert(*resolution) {
                anyhow::bail!("aggregation.resolutions lists {} twice", resolution);
            }
        }
        if self.aggregation.queue_capacity == 0 {
            anyhow::bail!("aggregation.queue_capacity must be greater than zero");
        }
        if self.feed.buffer_size == 0 {
            anyhow::bail!("feed.buffer_size must be greater than zero");
        }
        if self.feed.ping_interval_secs == 0 {
            anyhow::bail!("feed.ping_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Attach credentials read from the environment
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}
