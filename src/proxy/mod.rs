//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → HostRouter lookup            (unknown → 404)
//!     → RateLimiter::try_acquire     (no token → 429, breaker untouched)
//!     → CircuitBreaker::allow        (open / probe busy → 503)
//!     → Upstream::send within min(latency threshold, caller deadline)
//!     → CircuitBreaker::record_outcome
//!     → OutcomeSink::emit            (exactly once per request)
//! ```

pub mod error;
pub mod handler;
pub mod outcome;
pub mod upstream;

pub use error::{FailureKind, ProxyError};
pub use handler::{ProxyHandler, ProxyRequest};
pub use outcome::Outcome;
pub use upstream::{HttpUpstream, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
