//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by vhost, status
//! - `gateway_request_duration_seconds` (histogram): latency by vhost
//! - `gateway_active_connections` (gauge): open connections
//! - `gateway_handshake_failures_total` (counter): failed TLS handshakes by reason
//! - `gateway_log_records_dropped_total` (counter): overflowed log records by stream
//! - `gateway_reloads_total` (counter): reload attempts by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(vhost: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "vhost" => vhost.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "vhost" => vhost.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("gateway_active_connections").set(count as f64);
}

pub fn record_handshake_failure(reason: &'static str) {
    metrics::counter!("gateway_handshake_failures_total", "reason" => reason).increment(1);
}

pub fn record_log_drop(stream: &'static str) {
    metrics::counter!("gateway_log_records_dropped_total", "stream" => stream).increment(1);
}

pub fn record_reload(outcome: &'static str) {
    metrics::counter!("gateway_reloads_total", "outcome" => outcome).increment(1);
}
