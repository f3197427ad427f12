//! Circuit breaker for upstream host protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first admission check after cooldown (or the reconciler)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-host circuit breaker, state shared by all workers through the store
//! - Transition logic is pure (`decide`, `admit`, `apply_outcome`,
//!   `expire_cooldown`); `CircuitBreaker` only wires it to the store
//! - Single probe in Half-Open; the slot is claimed by CAS so one of several
//!   concurrent workers wins
//! - Unreachable store with nothing cached: treat the host as Open

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{elapsed_millis, Clock, Millis};
use crate::config::HostConfig;
use crate::observability::metrics;
use crate::resilience::retries::{max_update_duration, update_record, Update};
use crate::store::{BreakerState, CachedStore, HostBreakerState, HostRecord, StoreResult};

/// Admission verdict of the pure state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Closed: forward without touching state.
    Allow,
    /// Claim the half-open probe slot. `from_open` when this also performs
    /// the Open → Half-Open transition.
    Probe { from_open: bool },
    /// Short-circuit.
    Reject { retry_after: Duration },
}

/// How a forwarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    /// 2xx/3xx.
    Success,
    /// 4xx: the call was delivered; the counter is left alone.
    ClientError,
    /// 5xx, timeout or connection error.
    Failure,
}

impl CallResult {
    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => CallResult::Failure,
            400..=499 => CallResult::ClientError,
            _ => CallResult::Success,
        }
    }
}

const PROBE_LEASE_SLACK_MS: Millis = 1_000;

/// How long a claimed probe slot stays reserved before it is treated as
/// abandoned.
///
/// `bookkeeping` bounds the store traffic of one probe (claiming the slot and
/// recording its result). The lease outlasts the longest upstream call the
/// probe can make plus that bookkeeping, and is never shorter than the
/// cooldown.
pub fn probe_lease_millis(config: &HostConfig, bookkeeping: Duration) -> Millis {
    let lifetime = config
        .latency_threshold_ms
        .saturating_add(bookkeeping.as_millis() as u64)
        .saturating_add(PROBE_LEASE_SLACK_MS);
    config.cooldown_millis().max(lifetime)
}

/// Decide whether a request may reach the upstream. A half-open probe slot
/// claimed more than `probe_lease` ago is up for grabs again.
pub fn decide(state: &HostBreakerState, now: Millis, config: &HostConfig, probe_lease: Millis) -> Decision {
    match state.state {
        BreakerState::Closed => Decision::Allow,
        BreakerState::Open => {
            let elapsed = elapsed_millis(state.last_state_change_at, now);
            let cooldown = config.cooldown_millis();
            if elapsed >= cooldown {
                Decision::Probe { from_open: true }
            } else {
                Decision::Reject {
                    retry_after: Duration::from_millis(cooldown - elapsed),
                }
            }
        }
        BreakerState::HalfOpen => {
            let abandoned = state
                .probe_started_at
                .is_some_and(|started| elapsed_millis(started, now) >= probe_lease);
            if state.half_open_probe_in_flight && !abandoned {
                Decision::Reject {
                    retry_after: config.latency_threshold(),
                }
            } else {
                Decision::Probe { from_open: false }
            }
        }
    }
}

/// State to write for an admission decision, if any.
pub fn admit(state: &HostBreakerState, decision: &Decision, now: Millis) -> Option<HostBreakerState> {
    match decision {
        Decision::Allow | Decision::Reject { .. } => None,
        Decision::Probe { from_open } => {
            let mut next = state.clone();
            next.state = BreakerState::HalfOpen;
            next.half_open_probe_in_flight = true;
            next.probe_started_at = Some(now);
            if *from_open {
                next.last_state_change_at = now;
            }
            Some(next)
        }
    }
}

/// State after recording the result of a forwarded call, if it changes.
///
/// Results that arrive after the host already moved on (a non-probe call
/// finishing once the breaker opened, a probe finishing after another worker
/// resolved half-open) are ignored.
pub fn apply_outcome(
    state: &HostBreakerState,
    result: CallResult,
    was_probe: bool,
    now: Millis,
    config: &HostConfig,
) -> Option<HostBreakerState> {
    let mut next = state.clone();
    match (state.state, was_probe, result) {
        (BreakerState::Closed, false, CallResult::Success) => {
            if state.consecutive_failures == 0 {
                return None;
            }
            next.consecutive_failures = 0;
        }
        (BreakerState::Closed, false, CallResult::ClientError) => return None,
        (BreakerState::Closed, false, CallResult::Failure) => {
            next.consecutive_failures = state.consecutive_failures.saturating_add(1);
            next.last_failure_at = Some(now);
            if next.consecutive_failures >= config.failure_threshold {
                next.state = BreakerState::Open;
                next.last_state_change_at = now;
            }
        }
        (BreakerState::HalfOpen, true, CallResult::Success | CallResult::ClientError) => {
            next.state = BreakerState::Closed;
            next.consecutive_failures = 0;
            next.half_open_probe_in_flight = false;
            next.probe_started_at = None;
            next.last_state_change_at = now;
        }
        (BreakerState::HalfOpen, true, CallResult::Failure) => {
            next.state = BreakerState::Open;
            next.consecutive_failures = state.consecutive_failures.saturating_add(1);
            next.last_failure_at = Some(now);
            next.half_open_probe_in_flight = false;
            next.probe_started_at = None;
            next.last_state_change_at = now;
        }
        _ => return None,
    }
    Some(next)
}

/// Open → Half-Open once the cooldown has elapsed, with the probe slot free.
pub fn expire_cooldown(state: &HostBreakerState, now: Millis, config: &HostConfig) -> Option<HostBreakerState> {
    if state.state != BreakerState::Open {
        return None;
    }
    if elapsed_millis(state.last_state_change_at, now) < config.cooldown_millis() {
        return None;
    }
    let mut next = state.clone();
    next.state = BreakerState::HalfOpen;
    next.half_open_probe_in_flight = false;
    next.probe_started_at = None;
    next.last_state_change_at = now;
    Some(next)
}

/// Result of `CircuitBreaker::allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { probe: bool },
    Rejected { retry_after: Duration },
}

/// Store-backed breaker shared by all request handlers of a worker.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: CachedStore,
    clock: Arc<dyn Clock>,
    cas_attempts: u32,
    /// Store time around one probe: the claim in `allow` plus `record_outcome`.
    probe_bookkeeping: Duration,
}

impl CircuitBreaker {
    pub fn new(store: CachedStore, clock: Arc<dyn Clock>, cas_attempts: u32) -> Self {
        let probe_bookkeeping = max_update_duration(&store, cas_attempts) * 2;
        Self {
            store,
            clock,
            cas_attempts,
            probe_bookkeeping,
        }
    }

    /// Probe lease for `host` under this breaker's store settings.
    pub fn probe_lease(&self, host: &HostConfig) -> Millis {
        probe_lease_millis(host, self.probe_bookkeeping)
    }

    /// Admission check. May claim the half-open probe slot.
    pub async fn allow(&self, host: &HostConfig) -> Admission {
        let probe_lease = self.probe_lease(host);
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |record, now| {
            let decision = decide(&record.breaker, now, host, probe_lease);
            let next = admit(&record.breaker, &decision, now).map(|breaker| HostRecord {
                breaker,
                ..record.clone()
            });
            (next, decision)
        })
        .await;

        match update {
            Ok(Update::Applied(decision)) => match decision {
                Decision::Allow => Admission::Allowed { probe: false },
                Decision::Probe { from_open } => {
                    if from_open {
                        log_transition(host, BreakerState::Open, BreakerState::HalfOpen);
                    }
                    tracing::info!(host = %host.host_key, "Half-open probe admitted");
                    Admission::Allowed { probe: true }
                }
                Decision::Reject { retry_after } => Admission::Rejected { retry_after },
            },
            // The probe slot can only be held if the claim was persisted.
            Ok(Update::Stale(decision)) | Ok(Update::Unpersisted(decision)) => match decision {
                Decision::Allow => Admission::Allowed { probe: false },
                Decision::Probe { .. } => Admission::Rejected {
                    retry_after: host.cooldown(),
                },
                Decision::Reject { retry_after } => Admission::Rejected { retry_after },
            },
            Err(e) => {
                tracing::error!(
                    host = %host.host_key,
                    error = %e,
                    "Breaker state unavailable, failing closed"
                );
                Admission::Rejected {
                    retry_after: host.cooldown(),
                }
            }
        }
    }

    /// Record the result of a forwarded call. Returns the breaker state after
    /// the update when it is known.
    pub async fn record_outcome(
        &self,
        host: &HostConfig,
        result: CallResult,
        was_probe: bool,
    ) -> Option<BreakerState> {
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |record, now| {
            let before = record.breaker.state;
            match apply_outcome(&record.breaker, result, was_probe, now, host) {
                Some(breaker) => {
                    let after = breaker.state;
                    (Some(HostRecord { breaker, ..record.clone() }), (before, after))
                }
                None => (None, (before, before)),
            }
        })
        .await;

        match update {
            Ok(Update::Applied((before, after))) => {
                if before != after {
                    log_transition(host, before, after);
                }
                Some(after)
            }
            Ok(Update::Stale((before, _))) | Ok(Update::Unpersisted((before, _))) => {
                tracing::warn!(
                    host = %host.host_key,
                    result = ?result,
                    probe = was_probe,
                    "Breaker outcome not persisted"
                );
                Some(before)
            }
            Err(e) => {
                tracing::warn!(host = %host.host_key, error = %e, "Breaker outcome dropped");
                None
            }
        }
    }

    /// Give back a probe slot without recording a result.
    pub async fn release_probe(&self, host: &HostConfig) {
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |record, _| {
            if record.breaker.state != BreakerState::HalfOpen || !record.breaker.half_open_probe_in_flight {
                return (None, ());
            }
            let mut next = record.clone();
            next.breaker.half_open_probe_in_flight = false;
            next.breaker.probe_started_at = None;
            (Some(next), ())
        })
        .await;

        if !matches!(update, Ok(Update::Applied(()))) {
            tracing::warn!(host = %host.host_key, "Failed to release half-open probe slot");
        }
    }

    /// Reconciler edge: Open → Half-Open when the cooldown has elapsed.
    /// Returns true if this call performed the transition.
    pub async fn expire_if_due(&self, host: &HostConfig) -> StoreResult<bool> {
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |record, now| {
            match expire_cooldown(&record.breaker, now, host) {
                Some(breaker) => (Some(HostRecord { breaker, ..record.clone() }), true),
                None => (None, false),
            }
        })
        .await?;

        let transitioned = matches!(update, Update::Applied(true));
        if transitioned {
            log_transition(host, BreakerState::Open, BreakerState::HalfOpen);
        }
        Ok(transitioned)
    }

    /// Administrative reset: Closed, no failures, full bucket.
    pub async fn reset(&self, host: &HostConfig) -> StoreResult<bool> {
        let update = update_record(&self.store, host, self.clock.as_ref(), self.cas_attempts, |_, now| {
            (Some(HostRecord::initial(host, now)), ())
        })
        .await?;

        let applied = update.is_applied();
        if applied {
            tracing::info!(host = %host.host_key, "Host state reset by administrator");
            metrics::record_breaker_state(&host.host_key, BreakerState::Closed);
        }
        Ok(applied)
    }
}

fn log_transition(host: &HostConfig, from: BreakerState, to: BreakerState) {
    match to {
        BreakerState::Open => tracing::warn!(host = %host.host_key, from = %from, to = %to, "Circuit breaker opened"),
        _ => tracing::info!(host = %host.host_key, from = %from, to = %to, "Circuit breaker transition"),
    }
    metrics::record_breaker_transition(&host.host_key, from, to);
    metrics::record_breaker_state(&host.host_key, to);
}
