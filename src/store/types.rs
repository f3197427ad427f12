//! Persisted per-host state and store error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Millis;
use crate::config::HostConfig;

/// Circuit breaker position for one upstream host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding used by alarms: 0 = closed, 1 = half-open, 2 = open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker fields of a host record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostBreakerState {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Millis>,
    pub last_state_change_at: Millis,
    pub half_open_probe_in_flight: bool,
    /// When the current probe slot was taken.
    #[serde(default)]
    pub probe_started_at: Option<Millis>,
}

impl HostBreakerState {
    pub fn closed(now: Millis) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_state_change_at: now,
            half_open_probe_in_flight: false,
            probe_started_at: None,
        }
    }
}

/// Token bucket fields of a host record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRateLimitState {
    pub tokens_remaining: f64,
    pub last_refill_at: Millis,
}

impl HostRateLimitState {
    pub fn full(capacity: f64, now: Millis) -> Self {
        Self {
            tokens_remaining: capacity,
            last_refill_at: now,
        }
    }
}

/// Everything persisted under one partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_key: String,
    pub breaker: HostBreakerState,
    pub bucket: HostRateLimitState,
}

impl HostRecord {
    /// The lazily created record: closed, no failures, full bucket.
    pub fn initial(host: &HostConfig, now: Millis) -> Self {
        Self {
            host_key: host.host_key.clone(),
            breaker: HostBreakerState::closed(now),
            bucket: HostRateLimitState::full(host.burst(), now),
        }
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Errors returned by state store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// A store call exceeded its time budget.
    #[error("state store call timed out after {0} ms")]
    Timeout(u64),

    /// Local persistence failed.
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("state store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
