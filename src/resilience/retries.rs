//! Bounded read-modify-write against the shared state store.
//!
//! # Responsibilities
//! - Read the host record (lazily defaulted when absent)
//! - Let a pure function decide the new record
//! - Write it back conditional on the version that was read
//! - On a version conflict, back off briefly and start over
//!
//! # Design Decisions
//! - The retry budget is small and fixed; exhaustion hands the caller its
//!   local decision instead of blocking the request
//! - Decisions computed from a stale (cached) record are never written
//! - These are the only retries in the crate; upstream calls are never retried

use std::time::Duration;

use crate::clock::{Clock, Millis};
use crate::config::HostConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::store::{CachedStore, CasOutcome, HostRecord, StoreResult};

const CAS_RETRY_BASE_MS: u64 = 2;
const CAS_RETRY_MAX_MS: u64 = 20;

/// How a read-modify-write ended. Every variant carries the decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    /// The new record was committed, or no write was needed.
    Applied(T),
    /// The store was unreachable; the decision was made on the cached record
    /// and nothing was written.
    Stale(T),
    /// The write could not be committed (conflicts exhausted or store down).
    Unpersisted(T),
}

impl<T> Update<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Update::Applied(_))
    }
}

/// Upper bound on the duration of one `update_record` call with `attempts`.
pub fn max_update_duration(store: &CachedStore, attempts: u32) -> Duration {
    let attempts = attempts.max(1);
    let per_attempt = store.max_read_duration() + store.max_write_duration();
    let backoff = Duration::from_millis(CAS_RETRY_MAX_MS * 2);
    per_attempt * attempts + backoff * (attempts - 1)
}

/// Apply `decide` to the host record under CAS, retrying up to `attempts` times.
///
/// `decide` receives the current record and the time of this attempt and
/// returns the record to write (`None` for no change) plus a decision value.
/// It may run several times, so it must be pure.
///
/// Returns `Err` only when the record could not be read at all (store
/// unreachable and nothing cached).
pub async fn update_record<T, F>(
    store: &CachedStore,
    host: &HostConfig,
    clock: &dyn Clock,
    attempts: u32,
    mut decide: F,
) -> StoreResult<Update<T>>
where
    F: FnMut(&HostRecord, Millis) -> (Option<HostRecord>, T),
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let snapshot = store.read(&host.host_key).await?;
        let now = clock.now_millis();
        let (expected, current) = match &snapshot.current {
            Some(found) => (Some(found.version), found.value.clone()),
            None => (None, HostRecord::initial(host, now)),
        };

        let (next, decision) = decide(&current, now);
        let Some(next) = next else {
            return Ok(if snapshot.stale {
                Update::Stale(decision)
            } else {
                Update::Applied(decision)
            });
        };

        if snapshot.stale {
            return Ok(Update::Stale(decision));
        }

        match store.compare_and_set(&host.host_key, expected, next).await {
            Ok(CasOutcome::Committed { .. }) => return Ok(Update::Applied(decision)),
            Ok(CasOutcome::Conflict) => {
                metrics::record_cas_conflict(&host.host_key);
                if attempt >= attempts {
                    tracing::warn!(
                        host = %host.host_key,
                        attempts,
                        "CAS retries exhausted, proceeding with local decision"
                    );
                    return Ok(Update::Unpersisted(decision));
                }
                let delay = calculate_backoff(attempt, CAS_RETRY_BASE_MS, CAS_RETRY_MAX_MS);
                tracing::debug!(host = %host.host_key, attempt, delay = ?delay, "Version conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(_) => return Ok(Update::Unpersisted(decision)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::store::{MemoryStateStore, StateStore, Versioned};

    fn setup() -> (Arc<MemoryStateStore>, CachedStore, HostConfig, ManualClock) {
        let backend = Arc::new(MemoryStateStore::new());
        let store = CachedStore::new(backend.clone(), &StoreConfig::default());
        let host = HostConfig::new("hmrc", "/hmrc", "https://example.com");
        (backend, store, host, ManualClock::new(1_000))
    }

    fn bump(record: &HostRecord) -> HostRecord {
        let mut next = record.clone();
        next.breaker.consecutive_failures += 1;
        next
    }

    #[tokio::test]
    async fn test_creates_record_lazily() {
        let (backend, store, host, clock) = setup();
        let update = update_record(&store, &host, &clock, 3, |r, _| (Some(bump(r)), ()))
            .await
            .unwrap();
        assert!(update.is_applied());

        let stored = backend.get("hmrc").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value.breaker.consecutive_failures, 1);
        assert_eq!(stored.value.bucket.last_refill_at, 1_000);
    }

    #[tokio::test]
    async fn test_no_change_skips_write() {
        let (backend, store, host, clock) = setup();
        let update = update_record(&store, &host, &clock, 3, |_, _| (None, 42)).await.unwrap();
        assert_eq!(update, Update::Applied(42));
        assert_eq!(backend.committed_writes(), 0);
    }

    /// Commits a competing write just before the first CAS it sees.
    struct RacingStore {
        inner: MemoryStateStore,
        raced: AtomicBool,
        host: HostConfig,
    }

    #[async_trait]
    impl StateStore for RacingStore {
        async fn get(&self, host_key: &str) -> StoreResult<Option<Versioned<HostRecord>>> {
            self.inner.get(host_key).await
        }

        async fn compare_and_set(
            &self,
            host_key: &str,
            expected: Option<u64>,
            record: HostRecord,
        ) -> StoreResult<CasOutcome> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let competing = bump(&HostRecord::initial(&self.host, 0));
                self.inner.compare_and_set(host_key, None, competing).await?;
            }
            self.inner.compare_and_set(host_key, expected, record).await
        }

        async fn list(&self) -> StoreResult<Vec<Versioned<HostRecord>>> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_conflict_rereads_and_retries() {
        let host = HostConfig::new("hmrc", "/hmrc", "https://example.com");
        let backend = Arc::new(RacingStore {
            inner: MemoryStateStore::new(),
            raced: AtomicBool::new(false),
            host: host.clone(),
        });
        let store = CachedStore::new(backend.clone(), &StoreConfig::default());
        let clock = ManualClock::new(1_000);

        let mut calls = 0;
        let update = update_record(&store, &host, &clock, 3, |r, _| {
            calls += 1;
            (Some(bump(r)), calls)
        })
        .await
        .unwrap();

        assert_eq!(update, Update::Applied(2));
        let stored = backend.get("hmrc").await.unwrap().unwrap();
        assert_eq!(stored.value.breaker.consecutive_failures, 2);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_unreachable_without_cache_is_error() {
        let (backend, store, host, clock) = setup();
        backend.set_reachable(false);
        let result = update_record(&store, &host, &clock, 3, |r, _| (Some(bump(r)), ())).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_max_update_duration() {
        let (_, store, _, _) = setup();
        // read 250 + write 3 x 250 + 2 x 200 backoff, three times, plus two CAS backoffs
        assert_eq!(max_update_duration(&store, 3), Duration::from_millis(3 * 1_400 + 2 * 40));
        assert_eq!(max_update_duration(&store, 0), max_update_duration(&store, 1));
    }
}
