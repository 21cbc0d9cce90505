//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, routing reason
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_target_healthy` (gauge): 1=healthy, 0=unhealthy, per target
//! - `proxy_target_latency_ms` (gauge): last probe latency, per target
//! - `proxy_probe_failures_total` (counter): failed probes by target and kind
//! - `proxy_active_sessions` (gauge): exchanges and relays holding upstream resources
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - The Prometheus exporter serves its own scrape listener

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!("proxy_requests_total", "Total proxied requests");
    describe_histogram!("proxy_request_duration_seconds", "Time until the response head was produced");
    describe_gauge!("proxy_target_healthy", "Target health (1 = healthy)");
    describe_gauge!("proxy_target_latency_ms", "Latency of the last successful probe");
    describe_counter!("proxy_probe_failures_total", "Failed health probes");
    describe_gauge!("proxy_active_sessions", "Sessions holding upstream resources");
}

pub fn record_request(method: &str, status: u16, reason: &str, started: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_target_health(target: &str, healthy: bool, latency_ms: Option<f64>) {
    gauge!("proxy_target_healthy", "target" => target.to_string()).set(if healthy { 1.0 } else { 0.0 });
    if let Some(latency) = latency_ms {
        gauge!("proxy_target_latency_ms", "target" => target.to_string()).set(latency);
    }
}

pub fn record_probe_failure(target: &str, kind: &'static str) {
    counter!("proxy_probe_failures_total", "target" => target.to_string(), "kind" => kind).increment(1);
}

pub fn record_active_sessions(count: u64) {
    gauge!("proxy_active_sessions").set(count as f64);
}
