//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Proxy handler produces, once per request:
//!     → events.rs (OutcomeEvent → OutcomeSink)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Dashboards and alarms (external, consume the above)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through logs and outcome events
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{MetricsSink, OutcomeEvent, OutcomeSink, RecordingSink};
