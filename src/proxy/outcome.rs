//! Request outcome classification.

use serde::Serialize;

/// How a proxied request ended. Labels outcome events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Upstream answered 1xx-3xx.
    Success,
    /// Upstream answered 4xx. Passed through, not counted against the breaker.
    UpstreamClientError,
    /// 5xx, timeout or connection error. Counted against the breaker.
    UpstreamFailure,
    /// No token available; upstream not called.
    RateLimited,
    /// Breaker open or probe in flight; upstream not called.
    CircuitOpen,
    /// No configured host for the request.
    UnknownHost,
    /// Caller deadline spent before the upstream call started.
    DeadlineExceeded,
    /// Request could not be turned into an upstream call.
    InvalidRequest,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::UpstreamClientError => "upstream_client_error",
            Outcome::UpstreamFailure => "upstream_failure",
            Outcome::RateLimited => "rate_limited",
            Outcome::CircuitOpen => "circuit_open",
            Outcome::UnknownHost => "unknown_host",
            Outcome::DeadlineExceeded => "deadline_exceeded",
            Outcome::InvalidRequest => "invalid_request",
        }
    }

    /// Classify an upstream status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => Outcome::UpstreamFailure,
            400..=499 => Outcome::UpstreamClientError,
            _ => Outcome::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(Outcome::from_status(201), Outcome::Success);
        assert_eq!(Outcome::from_status(429), Outcome::UpstreamClientError);
        assert_eq!(Outcome::from_status(502), Outcome::UpstreamFailure);
        assert_eq!(Outcome::UpstreamClientError.as_str(), "upstream_client_error");
    }
}
