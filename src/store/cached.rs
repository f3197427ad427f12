//! Store client with bounded calls and a last-known-state cache.
//!
//! # Failure policy
//! - Every backend call is wrapped in a timeout; nothing on the request path
//!   waits on the store indefinitely
//! - Successful reads and writes refresh a per-host cache
//! - A failed read falls back to the cached record (marked stale); with no
//!   cached record the error is returned and the caller degrades
//! - A failed write is retried a few times with jittered backoff, then the
//!   error is returned and the caller drops the update

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::store::types::{HostRecord, StoreError, StoreResult, Versioned};
use crate::store::{CasOutcome, StateStore};

const WRITE_RETRY_BASE_MS: u64 = 10;
const WRITE_RETRY_MAX_MS: u64 = 100;

/// What a read produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The record and its version; `None` if the host was never written.
    pub current: Option<Versioned<HostRecord>>,
    /// True when the store was unreachable and this came from the cache.
    pub stale: bool,
}

#[derive(Clone)]
pub struct CachedStore {
    inner: Arc<dyn StateStore>,
    cache: Arc<DashMap<String, Versioned<HostRecord>>>,
    operation_timeout: Duration,
    write_retries: u32,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn StateStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            cache: Arc::new(DashMap::new()),
            operation_timeout: config.operation_timeout(),
            write_retries: config.write_retries,
        }
    }

    /// Longest a single `read` can take.
    pub fn max_read_duration(&self) -> Duration {
        self.operation_timeout
    }

    /// Longest a single `compare_and_set` can take, store retries included.
    pub fn max_write_duration(&self) -> Duration {
        let backoff = Duration::from_millis(WRITE_RETRY_MAX_MS * 2);
        self.operation_timeout * (self.write_retries + 1) + backoff * self.write_retries
    }

    /// Read a host record, falling back to the cache if the store is down.
    pub async fn read(&self, host_key: &str) -> StoreResult<Snapshot> {
        let result = match timeout(self.operation_timeout, self.inner.get(host_key)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.operation_timeout.as_millis() as u64)),
        };

        match result {
            Ok(current) => {
                if let Some(found) = &current {
                    self.cache.insert(host_key.to_string(), found.clone());
                }
                Ok(Snapshot { current, stale: false })
            }
            Err(e) => {
                metrics::record_store_error("read");
                match self.cache.get(host_key) {
                    Some(cached) => {
                        tracing::warn!(
                            host = %host_key,
                            error = %e,
                            "State store read failed, using last known state"
                        );
                        Ok(Snapshot {
                            current: Some(cached.value().clone()),
                            stale: true,
                        })
                    }
                    None => {
                        tracing::error!(
                            host = %host_key,
                            error = %e,
                            "State store read failed and no cached state exists"
                        );
                        Err(e)
                    }
                }
            }
        }
    }

    /// Conditional write with bounded retries on store errors.
    ///
    /// Version conflicts are returned immediately; only failures to reach the
    /// store are retried here.
    pub async fn compare_and_set(
        &self,
        host_key: &str,
        expected: Option<u64>,
        record: HostRecord,
    ) -> StoreResult<CasOutcome> {
        let mut attempt = 0;
        loop {
            let call = self.inner.compare_and_set(host_key, expected, record.clone());
            let result = match timeout(self.operation_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.operation_timeout.as_millis() as u64)),
            };

            match result {
                Ok(CasOutcome::Committed { version }) => {
                    self.cache.insert(
                        host_key.to_string(),
                        Versioned { value: record, version },
                    );
                    return Ok(CasOutcome::Committed { version });
                }
                Ok(CasOutcome::Conflict) => return Ok(CasOutcome::Conflict),
                Err(e) => {
                    metrics::record_store_error("write");
                    if attempt >= self.write_retries {
                        tracing::warn!(
                            host = %host_key,
                            attempts = attempt + 1,
                            error = %e,
                            "State store write failed, dropping update"
                        );
                        return Err(e);
                    }
                    attempt += 1;
                    let delay = calculate_backoff(attempt, WRITE_RETRY_BASE_MS, WRITE_RETRY_MAX_MS);
                    tracing::debug!(host = %host_key, attempt, delay = ?delay, error = %e, "Retrying state store write");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// List every record (admin use; no cache fallback).
    pub async fn list(&self) -> StoreResult<Vec<Versioned<HostRecord>>> {
        match timeout(self.operation_timeout, self.inner.list()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.operation_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::store::MemoryStateStore;

    fn setup() -> (Arc<MemoryStateStore>, CachedStore) {
        let backend = Arc::new(MemoryStateStore::new());
        let mut config = StoreConfig::default();
        config.write_retries = 1;
        let store = CachedStore::new(backend.clone(), &config);
        (backend, store)
    }

    fn record() -> HostRecord {
        HostRecord::initial(&HostConfig::new("hmrc", "/hmrc", "https://example.com"), 0)
    }

    #[test]
    fn test_call_bounds() {
        let (_, store) = setup();
        assert_eq!(store.max_read_duration(), Duration::from_millis(250));
        assert_eq!(store.max_write_duration(), Duration::from_millis(2 * 250 + 200));
    }

    #[tokio::test]
    async fn test_read_falls_back_to_cache() {
        let (backend, store) = setup();
        store.compare_and_set("hmrc", None, record()).await.unwrap();

        backend.set_reachable(false);
        let snapshot = store.read("hmrc").await.unwrap();
        assert!(snapshot.stale);
        assert_eq!(snapshot.current.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_read_without_cache_fails() {
        let (backend, store) = setup();
        backend.set_reachable(false);
        assert!(matches!(store.read("hmrc").await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_write_gives_up_after_retries() {
        let (backend, store) = setup();
        backend.set_reachable(false);
        let result = store.compare_and_set("hmrc", None, record()).await;
        assert!(result.is_err());

        backend.set_reachable(true);
        assert!(store.read("hmrc").await.unwrap().current.is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let (backend, store) = setup();
        store.compare_and_set("hmrc", None, record()).await.unwrap();
        let outcome = store.compare_and_set("hmrc", Some(7), record()).await.unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
        assert_eq!(backend.committed_writes(), 1);
    }
}
