//! File-backed state store.
//!
//! Keeps the table in memory and rewrites a JSON snapshot after every
//! committed write (temp file + rename, so a crash never leaves a torn file).
//! Survives restarts of a single node; it is not shared between machines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::types::{HostRecord, StoreResult, Versioned};
use crate::store::{CasOutcome, StateStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    version: u64,
    record: HostRecord,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    records: BTreeMap<String, StoredEntry>,
}

#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    table: Mutex<Snapshot>,
}

impl FileStateStore {
    /// Open the snapshot at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %path.display(),
                    records = snapshot.records.len(),
                    "Loaded host state snapshot"
                );
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    async fn persist(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, host_key: &str) -> StoreResult<Option<Versioned<HostRecord>>> {
        let table = self.table.lock().await;
        Ok(table.records.get(host_key).map(|e| Versioned {
            value: e.record.clone(),
            version: e.version,
        }))
    }

    async fn compare_and_set(
        &self,
        host_key: &str,
        expected: Option<u64>,
        record: HostRecord,
    ) -> StoreResult<CasOutcome> {
        let mut table = self.table.lock().await;
        let current = table.records.get(host_key).map(|e| e.version);
        if current != expected {
            return Ok(CasOutcome::Conflict);
        }

        let version = current.map_or(1, |v| v + 1);
        let previous = table
            .records
            .insert(host_key.to_string(), StoredEntry { version, record });

        if let Err(e) = self.persist(&table).await {
            // Roll back so memory never runs ahead of disk.
            match previous {
                Some(prev) => table.records.insert(host_key.to_string(), prev),
                None => table.records.remove(host_key),
            };
            return Err(e);
        }

        Ok(CasOutcome::Committed { version })
    }

    async fn list(&self) -> StoreResult<Vec<Versioned<HostRecord>>> {
        let table = self.table.lock().await;
        Ok(table
            .records
            .values()
            .map(|e| Versioned {
                value: e.record.clone(),
                version: e.version,
            })
            .collect())
    }
}
