//! Per-request outcome events.
//!
//! Every request the proxy handles produces exactly one `OutcomeEvent`. The
//! sink is called inline on the request path, so implementations must not
//! block: record, enqueue, or drop.

use std::sync::Mutex;

use serde::Serialize;

use crate::observability::metrics;
use crate::proxy::Outcome;
use crate::store::BreakerState;

/// Shape consumed by dashboards and alarms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeEvent {
    pub host_key: String,
    pub outcome: Outcome,
    pub http_status: u16,
    pub latency_ms: u64,
    pub breaker_state: Option<BreakerState>,
    pub request_id: Option<String>,
}

/// Receiver of outcome events.
pub trait OutcomeSink: Send + Sync {
    fn emit(&self, event: OutcomeEvent);
}

/// Default sink: Prometheus metrics plus one structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl OutcomeSink for MetricsSink {
    fn emit(&self, event: OutcomeEvent) {
        metrics::record_request(
            &event.host_key,
            event.outcome.as_str(),
            event.http_status,
            std::time::Duration::from_millis(event.latency_ms),
        );
        tracing::info!(
            target: "egress::outcome",
            host = %event.host_key,
            outcome = event.outcome.as_str(),
            http_status = event.http_status,
            latency_ms = event.latency_ms,
            breaker_state = event.breaker_state.map(|s| s.as_str()).unwrap_or("unknown"),
            request_id = event.request_id.as_deref().unwrap_or("-"),
            "Request completed"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutcomeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutcomeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl OutcomeSink for RecordingSink {
    fn emit(&self, event: OutcomeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
