//! Shared host state subsystem.
//!
//! # Data Flow
//! ```text
//! rate limiter / breaker / reconciler / admin
//!     → resilience::retries::update_record (read-modify-write loop)
//!     → cached.rs (timeouts, write retries, last-known-state cache)
//!     → StateStore backend (memory.rs | file.rs)
//! ```
//!
//! # Design Decisions
//! - One record per host key holds both breaker and token bucket state
//! - Every write is conditional on the version that was read (CAS)
//! - Records are created lazily and never deleted automatically
//! - Backends are swappable behind an object-safe trait

pub mod cached;
pub mod file;
pub mod memory;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};

pub use cached::{CachedStore, Snapshot};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use types::{
    BreakerState, HostBreakerState, HostRateLimitState, HostRecord, StoreError, StoreResult,
    Versioned,
};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied; the record now carries `version`.
    Committed { version: u64 },
    /// The stored version did not match the expected one. Nothing was written.
    Conflict,
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CasOutcome::Committed { .. })
    }
}

/// Durable key-value store keyed by host key, with optimistic concurrency.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the current record and its version. `None` if never written.
    async fn get(&self, host_key: &str) -> StoreResult<Option<Versioned<HostRecord>>>;

    /// Write `record` only if the stored version equals `expected`.
    ///
    /// `expected = None` means "create only if absent".
    async fn compare_and_set(
        &self,
        host_key: &str,
        expected: Option<u64>,
        record: HostRecord,
    ) -> StoreResult<CasOutcome>;

    /// Every stored record, for inspection.
    async fn list(&self) -> StoreResult<Vec<Versioned<HostRecord>>>;
}

/// Open the backend selected by configuration.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!(table = %config.table, "Using in-memory state store");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        StoreBackend::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                StoreError::Unavailable("file backend configured without a path".to_string())
            })?;
            let store = FileStateStore::open(path).await?;
            tracing::info!(table = %config.table, path = %path, "Using file-backed state store");
            Ok(Arc::new(store))
        }
    }
}
