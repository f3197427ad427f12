//! In-process state store.
//!
//! Backs single-node deployments and tests. Each CAS runs under the dashmap
//! shard lock for its key, so concurrent writers to one host serialize while
//! different hosts proceed in parallel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::types::{HostRecord, StoreError, StoreResult, Versioned};
use crate::store::{CasOutcome, StateStore};

#[derive(Debug)]
pub struct MemoryStateStore {
    entries: DashMap<String, Versioned<HostRecord>>,
    reachable: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            reachable: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: while unreachable every call fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of committed writes since creation.
    pub fn committed_writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unreachable".to_string()))
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, host_key: &str) -> StoreResult<Option<Versioned<HostRecord>>> {
        self.check_reachable()?;
        Ok(self.entries.get(host_key).map(|r| r.value().clone()))
    }

    async fn compare_and_set(
        &self,
        host_key: &str,
        expected: Option<u64>,
        record: HostRecord,
    ) -> StoreResult<CasOutcome> {
        self.check_reachable()?;
        let outcome = match self.entries.entry(host_key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if expected == Some(current) {
                    let version = current + 1;
                    entry.insert(Versioned { value: record, version });
                    CasOutcome::Committed { version }
                } else {
                    CasOutcome::Conflict
                }
            }
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(Versioned { value: record, version: 1 });
                    CasOutcome::Committed { version: 1 }
                } else {
                    CasOutcome::Conflict
                }
            }
        };
        if outcome.is_committed() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    async fn list(&self) -> StoreResult<Vec<Versioned<HostRecord>>> {
        self.check_reachable()?;
        let mut all: Vec<_> = self.entries.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.value.host_key.cmp(&b.value.host_key));
        Ok(all)
    }
}
