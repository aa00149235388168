//! Telemetry module
//!
//! Structured logging and Prometheus metrics

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{
    init_metrics_exporter, record_late_tick, record_message_skipped, record_store_error,
    record_tick_received, record_upsert,
};

use crate::config::TelemetryConfig;

/// Guard held for the lifetime of the process once telemetry is up
pub struct TelemetryGuard {
    _priv: (),
}

/// Initialize all telemetry subsystems
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    init_logging(&config.log_level, config.log_format, config.log_file.as_deref())?;

    if let Some(port) = config.metrics_port {
        init_metrics_exporter(port)?;
    }

    Ok(TelemetryGuard { _priv: () })
}
