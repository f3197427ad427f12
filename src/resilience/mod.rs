//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream host:
//!     → rate_limit.rs (take a token from the shared bucket)
//!     → circuit_breaker.rs (admit, short-circuit, or claim the probe slot)
//!     → timeouts.rs (bound the call by threshold and caller deadline)
//!     → circuit_breaker.rs (record the outcome)
//!
//! All state changes:
//!     → retries.rs (CAS read-modify-write, bounded retries)
//!     → backoff.rs (jittered delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Upstream calls are never retried here; that is the caller's policy
//! - Circuit breaker prevents cascading failures
//! - Limiter fails open, breaker fails closed

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{Admission, CallResult, CircuitBreaker, Decision};
pub use rate_limit::{RateDecision, RateLimiter};
