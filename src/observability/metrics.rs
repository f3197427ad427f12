//! Metrics collection and exposition.
//!
//! # Metrics
//! - `egress_requests_total` (counter): requests by host, outcome, status
//! - `egress_request_duration_seconds` (histogram): end-to-end latency by host
//! - `egress_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `egress_breaker_transitions_total` (counter): transitions by host, from, to
//! - `egress_cas_conflicts_total` (counter): lost version races by host
//! - `egress_store_errors_total` (counter): failed store calls by operation
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - The breaker gauge is what external alarms watch

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::store::BreakerState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(host: &str, outcome: &'static str, status: u16, latency: Duration) {
    counter!(
        "egress_requests_total",
        "host" => host.to_string(),
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("egress_request_duration_seconds", "host" => host.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_breaker_state(host: &str, state: BreakerState) {
    gauge!("egress_breaker_state", "host" => host.to_string()).set(state.as_gauge());
}

pub fn record_breaker_transition(host: &str, from: BreakerState, to: BreakerState) {
    counter!(
        "egress_breaker_transitions_total",
        "host" => host.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_cas_conflict(host: &str) {
    counter!("egress_cas_conflicts_total", "host" => host.to_string()).increment(1);
}

pub fn record_store_error(operation: &'static str) {
    counter!("egress_store_errors_total", "operation" => operation).increment(1);
}
