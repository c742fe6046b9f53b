//! Status stores keyed by task id.
//!
//! `MemoryStatusStore` serves workers that share an address space. `SledStatusStore`
//! keeps entries in a sled tree, so every worker holding a clone of the same
//! `sled::Db` reads the same values. sled locks its directory for one process at a
//! time: both backends cover workers within a single process, and an on-disk
//! database only adds durability across restarts of that process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use sled::{Db, Tree};

use crate::error::StorageError;
use crate::task::status::TaskStatus;
use crate::types::TaskId;

const TREE_STATUS: &str = "task_status";

/// Shared map from task id to current status.
///
/// Writes are whole-value replacements. Implementations must make a completed
/// `put` visible to every subsequent `get` from any thread.
pub trait StatusStore: Send + Sync {
    fn put(&self, id: TaskId, status: TaskStatus) -> Result<(), StorageError>;

    fn get(&self, id: TaskId) -> Result<Option<TaskStatus>, StorageError>;

    fn remove(&self, id: TaskId) -> Result<(), StorageError>;

    /// Snapshot of all entries.
    fn entries(&self) -> Result<Vec<(TaskId, TaskStatus)>, StorageError>;
}

/// In-process store guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: RwLock<HashMap<TaskId, TaskStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl StatusStore for MemoryStatusStore {
    fn put(&self, id: TaskId, status: TaskStatus) -> Result<(), StorageError> {
        self.entries.write().insert(id, status);
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<Option<TaskStatus>, StorageError> {
        Ok(self.entries.read().get(&id).copied())
    }

    fn remove(&self, id: TaskId) -> Result<(), StorageError> {
        self.entries.write().remove(&id);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(TaskId, TaskStatus)>, StorageError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(id, status)| (*id, *status))
            .collect())
    }
}

/// sled-backed store. Values are JSON-encoded statuses keyed by the raw id bytes.
#[derive(Clone)]
pub struct SledStatusStore {
    db: Db,
    tree: Tree,
}

impl SledStatusStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(TREE_STATUS)?;
        Ok(Self { db, tree })
    }

    /// Open (or create) an on-disk store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(sled::open(path)?)
    }

    /// Store that lives only as long as the process keeps it open.
    pub fn temporary() -> Result<Self, StorageError> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

impl StatusStore for SledStatusStore {
    fn put(&self, id: TaskId, status: TaskStatus) -> Result<(), StorageError> {
        let value = serde_json::to_vec(&status).map_err(|e| StorageError::Corrupt {
            id,
            reason: e.to_string(),
        })?;
        self.tree.insert(id.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<Option<TaskStatus>, StorageError> {
        let Some(raw) = self.tree.get(id.as_bytes())? else {
            return Ok(None);
        };
        decode_status(id, &raw).map(Some)
    }

    fn remove(&self, id: TaskId) -> Result<(), StorageError> {
        self.tree.remove(id.as_bytes())?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(TaskId, TaskStatus)>, StorageError> {
        let mut out = Vec::new();
        for result in self.tree.iter() {
            let (key, value) = result?;
            let bytes: [u8; 16] = key[..].try_into().map_err(|_| {
                StorageError::Backend(format!("invalid task id key of {} bytes", key.len()))
            })?;
            let id = TaskId::from_bytes(bytes);
            out.push((id, decode_status(id, &value)?));
        }
        Ok(out)
    }
}

fn decode_status(id: TaskId, raw: &[u8]) -> Result<TaskStatus, StorageError> {
    serde_json::from_slice(raw).map_err(|e| StorageError::Corrupt {
        id,
        reason: e.to_string(),
    })
}
