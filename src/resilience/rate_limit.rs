//! Per-host token bucket rate limiting.
//!
//! The bucket lives in the shared host record so every worker draws from the
//! same tokens. A rejection here happens before the breaker is consulted and
//! never counts as an upstream failure.
//!
//! Unlike the breaker, the limiter fails open: when the store cannot be read
//! and nothing is cached, or a consumed token cannot be persisted, the call
//! is admitted.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{elapsed_millis, Clock, Millis};
use crate::config::HostConfig;
use crate::resilience::retries::{update_record, Update};
use crate::store::{CachedStore, HostRateLimitState, HostRecord};

/// Refill the bucket up to `now`.
pub fn refill(bucket: &HostRateLimitState, now: Millis, config: &HostConfig) -> HostRateLimitState {
    let capacity = config.burst();
    let elapsed_secs = elapsed_millis(bucket.last_refill_at, now) as f64 / 1_000.0;
    let tokens = bucket.tokens_remaining.clamp(0.0, capacity) + elapsed_secs * config.rate_per_second;
    HostRateLimitState {
        tokens_remaining: tokens.min(capacity),
        last_refill_at: now.max(bucket.last_refill_at),
    }
}

/// Refill, then try to take one token.
///
/// Returns the bucket to persist when a token was taken, or the time until
/// one becomes available.
pub fn try_take(
    bucket: &HostRateLimitState,
    now: Millis,
    config: &HostConfig,
) -> Result<HostRateLimitState, Duration> {
    let mut next = refill(bucket, now, config);
    if next.tokens_remaining >= 1.0 {
        next.tokens_remaining -= 1.0;
        Ok(next)
    } else {
        let missing = 1.0 - next.tokens_remaining;
        let secs = (missing / config.rate_per_second).ceil().max(1.0);
        Err(Duration::from_secs(secs as u64))
    }
}

/// Result of `RateLimiter::try_acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Admitted,
    Limited { retry_after: Duration },
}

/// Store-backed token bucket limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: CachedStore,
    clock: Arc<dyn Clock>,
    cas_attempts: u32,
}

impl RateLimiter {
    pub fn new(store: CachedStore, clock: Arc<dyn Clock>, cas_attempts: u32) -> Self {
        Self {
            store,
            clock,
            cas_attempts,
        }
    }

    /// Take a token for `host` if one is available.
    pub async fn try_acquire(&self, host: &HostConfig) -> RateDecision {
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |record, now| {
            match try_take(&record.bucket, now, host) {
                Ok(bucket) => (
                    Some(HostRecord {
                        bucket,
                        ..record.clone()
                    }),
                    RateDecision::Admitted,
                ),
                Err(retry_after) => (None, RateDecision::Limited { retry_after }),
            }
        })
        .await;

        match update {
            Ok(Update::Applied(decision)) | Ok(Update::Stale(decision)) => decision,
            Ok(Update::Unpersisted(_)) => {
                tracing::warn!(host = %host.host_key, "Token consumption not persisted, admitting");
                RateDecision::Admitted
            }
            Err(e) => {
                tracing::error!(
                    host = %host.host_key,
                    error = %e,
                    "Rate limit state unavailable, failing open"
                );
                RateDecision::Admitted
            }
        }
    }
}
