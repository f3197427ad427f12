//! Periodic breaker sweep.
//!
//! # Responsibilities
//! - Move hosts that stayed OPEN past their cooldown to HALF_OPEN
//! - Publish the per-host breaker state gauge
//!
//! Request handling never depends on this task: an expired OPEN host is
//! also promoted by the first request that sees it.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;
use crate::resilience::CircuitBreaker;
use crate::routing::HostRouter;
use crate::store::{BreakerState, CachedStore};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub transitioned: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct Reconciler {
    router: HostRouter,
    breaker: CircuitBreaker,
    store: CachedStore,
    interval: Duration,
}

impl Reconciler {
    pub fn new(router: HostRouter, breaker: CircuitBreaker, store: CachedStore, interval: Duration) -> Self {
        Self {
            router,
            breaker,
            store,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            hosts = self.router.hosts().len(),
            "Reconciler starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.reconcile_once().await;
                    if report.transitioned > 0 || report.failed > 0 {
                        tracing::info!(
                            transitioned = report.transitioned,
                            unchanged = report.unchanged,
                            failed = report.failed,
                            "Reconciler sweep finished"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One pass over every configured host.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for host in self.router.hosts() {
            match self.breaker.expire_if_due(host).await {
                Ok(true) => report.transitioned += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    tracing::warn!(host = %host.host_key, error = %e, "Reconciler could not read host state");
                    report.failed += 1;
                    continue;
                }
            }

            // Unwritten hosts have never left CLOSED.
            if let Ok(snapshot) = self.store.read(&host.host_key).await {
                let state = snapshot
                    .current
                    .map(|found| found.value.breaker.state)
                    .unwrap_or(BreakerState::Closed);
                metrics::record_breaker_state(&host.host_key, state);
            }
        }

        report
    }
}
