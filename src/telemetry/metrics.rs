//! Prometheus metrics

use crate::candle::Resolution;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

const TICKS_RECEIVED: &str = "tickcandles_ticks_received_total";
const MESSAGES_SKIPPED: &str = "tickcandles_messages_skipped_total";
const LATE_TICKS: &str = "tickcandles_late_ticks_total";
const CANDLE_UPSERTS: &str = "tickcandles_candle_upserts_total";
const STORE_ERRORS: &str = "tickcandles_store_errors_total";
const UPSERT_LATENCY: &str = "tickcandles_upsert_latency_ms";

/// Install the Prometheus exporter with an HTTP scrape endpoint on `port`
pub fn init_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// A tick was decoded and handed downstream
pub fn record_tick_received() {
    metrics::counter!(TICKS_RECEIVED).increment(1);
}

/// A frame was skipped; `reason` is the decode stage that rejected it
pub fn record_message_skipped(reason: &'static str) {
    metrics::counter!(MESSAGES_SKIPPED, "reason" => reason).increment(1);
}

/// A tick arrived for a bucket that was already finalized
pub fn record_late_tick(resolution: Resolution) {
    metrics::counter!(LATE_TICKS, "resolution" => resolution.label()).increment(1);
}

/// A candle row was written
pub fn record_upsert(resolution: Resolution, outcome: &'static str, latency: Duration) {
    let label = resolution.label();
    metrics::counter!(CANDLE_UPSERTS, "resolution" => label.clone(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(UPSERT_LATENCY, "resolution" => label).record(latency.as_secs_f64() * 1000.0);
}

/// A candle write failed
pub fn record_store_error(resolution: Resolution) {
    metrics::counter!(STORE_ERRORS, "resolution" => resolution.label()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        record_tick_received();
        record_message_skipped("envelope");
        record_late_tick(Resolution::MINUTE);
        record_upsert(Resolution::SECOND, "created", Duration::from_micros(250));
        record_store_error(Resolution::HOUR);
    }
}
