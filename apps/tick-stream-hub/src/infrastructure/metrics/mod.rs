//! Prometheus Metrics Module
//!
//! Application metrics in Prometheus format, exposed at `/metrics` on the
//! health server.
//!
//! # Metrics Categories
//!
//! - **Trades**: received per venue, normalization drops
//! - **Connections**: live feed gauges, transport errors, reconnects
//! - **Distribution**: snapshots published, subscriber overflow drops
//! - **Latency**: ingest-to-publish pipeline latency

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::market_data::ExchangeId;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tickhub_trades_received_total",
        "Normalized trades received per venue"
    );
    describe_counter!(
        "tickhub_normalize_errors_total",
        "Frames dropped because normalization failed"
    );
    describe_counter!(
        "tickhub_transport_errors_total",
        "Exchange sessions terminated by a transport error"
    );
    describe_counter!(
        "tickhub_reconnects_total",
        "Exchange reconnection attempts"
    );
    describe_counter!(
        "tickhub_snapshots_published_total",
        "Aggregation snapshots published to the hub"
    );
    describe_counter!(
        "tickhub_subscriber_dropped_total",
        "Items dropped because subscribers lagged"
    );

    describe_gauge!(
        "tickhub_feed_connected",
        "1 when the venue feed is connected, 0 otherwise"
    );

    describe_histogram!(
        "tickhub_pipeline_latency_seconds",
        "Latency from ingest to hub publication"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a normalized trade received from a venue.
pub fn record_trade_received(exchange: ExchangeId) {
    counter!(
        "tickhub_trades_received_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a frame dropped by the normalizer.
pub fn record_normalize_error(exchange: ExchangeId) {
    counter!(
        "tickhub_normalize_errors_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a session terminated by a transport error.
pub fn record_transport_error(exchange: ExchangeId) {
    counter!(
        "tickhub_transport_errors_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: ExchangeId) {
    counter!(
        "tickhub_reconnects_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a snapshot published to the hub.
pub fn record_snapshot_published() {
    counter!("tickhub_snapshots_published_total").increment(1);
}

/// Record items lost to a lagging subscriber.
pub fn record_subscriber_drops(count: u64) {
    counter!("tickhub_subscriber_dropped_total").increment(count);
}

/// Update the connected gauge for a venue feed.
pub fn set_feed_connected(exchange: ExchangeId, connected: bool) {
    gauge!(
        "tickhub_feed_connected",
        "exchange" => exchange.as_str()
    )
    .set(if connected { 1.0 } else { 0.0 });
}

/// Record ingest-to-publish latency for one trade.
pub fn record_pipeline_latency(latency: Duration) {
    histogram!("tickhub_pipeline_latency_seconds").record(latency.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        // The metrics macros degrade to no-ops when no global recorder is
        // installed; none of these calls may panic.
        record_trade_received(ExchangeId::Binance);
        record_normalize_error(ExchangeId::Kraken);
        record_transport_error(ExchangeId::Okx);
        record_reconnect(ExchangeId::Bitget);
        record_snapshot_published();
        record_subscriber_drops(3);
        set_feed_connected(ExchangeId::Coinbase, true);
        record_pipeline_latency(Duration::from_millis(5));
    }
}
