//! Proxy error definitions.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::proxy::Outcome;

/// Why an upstream call produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Requests the proxy answers itself instead of relaying an upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// No configured host; nothing was touched.
    #[error("unknown upstream host '{0}'")]
    UnknownHost(String),

    /// No token available. No breaker effect.
    #[error("rate limit exceeded for '{host}'")]
    RateLimited { host: String, retry_after: Duration },

    /// Breaker open, or a half-open probe already in flight.
    #[error("circuit open for '{host}'")]
    CircuitOpen { host: String, retry_after: Duration },

    /// The upstream call failed without a response. Counted against the breaker.
    #[error("upstream '{host}' {kind}")]
    UpstreamFailure { host: String, kind: FailureKind },

    /// The caller's deadline ran out before the upstream call started.
    #[error("deadline exceeded before calling '{0}'")]
    DeadlineExceeded(String),

    /// Inbound body larger than the configured limit.
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The request could not be turned into an upstream call, e.g. a
    /// malformed deadline header.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownHost(_) => StatusCode::NOT_FOUND,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamFailure { kind: FailureKind::Timeout, .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            ProxyError::UnknownHost(_) => Outcome::UnknownHost,
            ProxyError::RateLimited { .. } => Outcome::RateLimited,
            ProxyError::CircuitOpen { .. } => Outcome::CircuitOpen,
            ProxyError::UpstreamFailure { .. } => Outcome::UpstreamFailure,
            ProxyError::DeadlineExceeded(_) => Outcome::DeadlineExceeded,
            ProxyError::PayloadTooLarge(_) | ProxyError::InvalidRequest(_) => Outcome::InvalidRequest,
        }
    }

    /// Retry hint for short-circuited requests, rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProxyError::RateLimited { retry_after, .. } | ProxyError::CircuitOpen { retry_after, .. } => {
                let millis = retry_after.as_millis() as u64;
                Some(millis.div_ceil(1_000).max(1))
            }
            _ => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            ProxyError::UnknownHost(host)
            | ProxyError::DeadlineExceeded(host)
            | ProxyError::RateLimited { host, .. }
            | ProxyError::CircuitOpen { host, .. }
            | ProxyError::UpstreamFailure { host, .. } => Some(host),
            ProxyError::PayloadTooLarge(_) | ProxyError::InvalidRequest(_) => None,
        }
    }
}
