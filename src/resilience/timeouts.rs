//! Timeout enforcement.
//!
//! # Responsibilities
//! - Derive the budget of a single upstream call
//! - Cap it by the caller's remaining deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the future is dropped on expiry,
//!   which aborts the outbound call
//! - Timeout errors are distinct from connection errors
//! - Timed-out requests return 504 Gateway Timeout

use std::time::Duration;

use tokio::time::Instant;

/// Budget for one upstream call: the smaller of the host's latency threshold
/// and what is left of the caller's deadline. `None` if the deadline has
/// already passed.
pub fn call_timeout(latency_threshold: Duration, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(latency_threshold))
}

/// Deadline for a caller-supplied budget, capped at `max`.
pub fn deadline_from(requested: Option<Duration>, max: Duration) -> Instant {
    let budget = requested.map_or(max, |r| r.min(max));
    Instant::now() + budget
}
