//! Snapshot record store.
//!
//! Three record sets live as whole-file JSON snapshots (a mapping from
//! identity token to record). A missing file is an empty set, never an
//! error. Every save writes the complete new state to a temp file in the
//! same directory and renames it over the target, so a concurrent load can
//! never observe a truncated snapshot. Each set has its own async mutex:
//! every mutation is a read-modify-write cycle, and a lost update would be
//! a correctness bug, not an acceptable race.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::BotError;

/// The persisted record sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSet {
    /// Applicants awaiting administrator review.
    PendingRegister,
    /// Authorized users; administrators are a role value here, not a
    /// separate file.
    Whitelist,
}

impl RecordSet {
    fn file_name(self) -> &'static str {
        match self {
            RecordSet::PendingRegister => "pending_register.json",
            RecordSet::Whitelist => "whitelist.json",
        }
    }
}

/// Errors from snapshot IO.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt snapshot {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<StoreError> for BotError {
    fn from(err: StoreError) -> Self {
        BotError::Storage(err.to_string())
    }
}

/// Durable key-value store for the record sets under one data directory.
pub struct RecordStore {
    dir: PathBuf,
    pending_lock: Mutex<()>,
    whitelist_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending_lock: Mutex::new(()),
            whitelist_lock: Mutex::new(()),
        }
    }

    fn path(&self, set: RecordSet) -> PathBuf {
        self.dir.join(set.file_name())
    }

    async fn lock(&self, set: RecordSet) -> MutexGuard<'_, ()> {
        match set {
            RecordSet::PendingRegister => self.pending_lock.lock().await,
            RecordSet::Whitelist => self.whitelist_lock.lock().await,
        }
    }

    /// Load the full snapshot for a set. Missing file means empty set.
    pub async fn load<T: DeserializeOwned>(
        &self,
        set: RecordSet,
    ) -> Result<HashMap<String, T>, StoreError> {
        let _guard = self.lock(set).await;
        read_snapshot(&self.path(set)).await
    }

    /// Overwrite the full snapshot for a set.
    pub async fn save<T: Serialize>(
        &self,
        set: RecordSet,
        records: &HashMap<String, T>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock(set).await;
        write_snapshot(&self.path(set), records).await
    }

    /// Read-modify-write a set under its lock.
    ///
    /// The closure mutates the loaded mapping in place; the new snapshot is
    /// written back only if the closure reports a change, and the closure's
    /// result is returned either way.
    pub async fn update<T, R>(
        &self,
        set: RecordSet,
        f: impl FnOnce(&mut HashMap<String, T>) -> (bool, R),
    ) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize,
    {
        let _guard = self.lock(set).await;
        let path = self.path(set);
        let mut records = read_snapshot(&path).await?;
        let (changed, result) = f(&mut records);
        if changed {
            write_snapshot(&path, &records).await?;
        }
        Ok(result)
    }
}

async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn write_snapshot<T: Serialize>(
    path: &Path,
    records: &HashMap<String, T>,
) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    // serde_json only fails here on non-string keys or a Serialize impl
    // that errors; neither applies to our record types.
    let json = serde_json::to_vec_pretty(records).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, UserRecord};

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let records: HashMap<String, UserRecord> =
            store.load(RecordSet::Whitelist).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        let mut records = HashMap::new();
        records.insert("U1".to_string(), UserRecord::admin("U1"));
        store.save(RecordSet::Whitelist, &records).await.unwrap();

        let loaded: HashMap<String, UserRecord> =
            store.load(RecordSet::Whitelist).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["U1"].role, Role::Admin);

        // No stray temp file left behind.
        assert!(!dir.path().join("whitelist.json.tmp").exists());
    }

    #[tokio::test]
    async fn update_persists_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        let inserted = store
            .update(RecordSet::Whitelist, |records| {
                records.insert("U1".to_string(), UserRecord::admin("U1"));
                (true, true)
            })
            .await
            .unwrap();
        assert!(inserted);

        let found = store
            .update(RecordSet::Whitelist, |records: &mut HashMap<String, UserRecord>| {
                (false, records.contains_key("U1"))
            })
            .await
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn concurrent_updates_lose_neither_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(RecordStore::new(dir.path()));

        // Two writers race the same set; the per-set lock makes each
        // read-modify-write cycle see the other's committed state.
        let a = std::sync::Arc::clone(&store);
        let b = std::sync::Arc::clone(&store);
        let t1 = tokio::spawn(async move {
            a.update(RecordSet::Whitelist, |records: &mut HashMap<String, UserRecord>| {
                records.insert("U1".to_string(), UserRecord::admin("U1"));
                (true, ())
            })
            .await
            .unwrap();
        });
        let t2 = tokio::spawn(async move {
            b.update(RecordSet::Whitelist, |records: &mut HashMap<String, UserRecord>| {
                records.insert("U2".to_string(), UserRecord::admin("U2"));
                (true, ())
            })
            .await
            .unwrap();
        });
        t1.await.unwrap();
        t2.await.unwrap();

        let loaded: HashMap<String, UserRecord> =
            store.load(RecordSet::Whitelist).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains_key("U1") && loaded.contains_key("U2"));
    }

    #[tokio::test]
    async fn sets_are_independent_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        let mut records = HashMap::new();
        records.insert("U1".to_string(), UserRecord::admin("U1"));
        store.save(RecordSet::Whitelist, &records).await.unwrap();

        let pending: HashMap<String, crate::model::Applicant> =
            store.load(RecordSet::PendingRegister).await.unwrap();
        assert!(pending.is_empty());
        assert!(dir.path().join("whitelist.json").exists());
        assert!(!dir.path().join("pending_register.json").exists());
    }
}
