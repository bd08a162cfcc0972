//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): requests by method, status, cache outcome
//! - `relay_request_duration_seconds` (histogram): time to response headers
//! - `relay_cache_lookups_total` (counter): hit / miss / expired
//! - `relay_cache_bytes`, `relay_cache_entries` (gauge): cache occupancy
//! - `relay_upstream_retries_total` (counter): retries by cause
//! - `relay_rewrite_aborted_total` (counter): rewriting streams torn down mid-body
//! - `relay_websocket_tunnels` (gauge): open tunnels
//! - `relay_worker_restarts_total` (counter): supervised worker restarts
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps unit tests silent
//! - Only one process per port exposes the Prometheus listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, cache: &'static str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    counter!(
        "relay_requests_total",
        "method" => method.clone(),
        "status" => status.clone(),
        "cache" => cache
    )
    .increment(1);
    histogram!(
        "relay_request_duration_seconds",
        "method" => method,
        "status" => status,
        "cache" => cache
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!("relay_cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_size(bytes: usize, entries: usize) {
    gauge!("relay_cache_bytes").set(bytes as f64);
    gauge!("relay_cache_entries").set(entries as f64);
}

pub fn record_retry(cause: &'static str) {
    counter!("relay_upstream_retries_total", "cause" => cause).increment(1);
}

pub fn record_rewrite_aborted() {
    counter!("relay_rewrite_aborted_total").increment(1);
}

pub fn tunnel_opened() {
    gauge!("relay_websocket_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("relay_websocket_tunnels").decrement(1.0);
}

pub fn record_worker_restart(worker: usize) {
    counter!("relay_worker_restarts_total", "worker" => worker.to_string()).increment(1);
}
