//! Backup snapshots and their storage.
//!
//! A backup is an immutable, full snapshot of the in-memory collections.
//! Stores refuse to overwrite an existing backup id; restoring only reads.

use crate::entity::EntityType;
use crate::error::{StoreError, StoreResult};
use crate::file::{list_json_stems, read_json_opt, validate_file_id, write_json_atomic};
use crate::state::Collections;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A point-in-time snapshot of every entity collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    /// Backup id, derived from the creation timestamp.
    pub id: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Per-type entity collections.
    pub snapshot: Collections,
}

impl Backup {
    /// Returns the number of entities in the snapshot.
    pub fn entity_count(&self) -> usize {
        self.snapshot.values().map(Vec::len).sum()
    }

    /// Returns summary information.
    pub fn info(&self) -> BackupInfo {
        BackupInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            counts: self
                .snapshot
                .iter()
                .map(|(t, entities)| (*t, entities.len()))
                .collect(),
        }
    }
}

/// Summary of a stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup id.
    pub id: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Number of entities per type.
    pub counts: BTreeMap<EntityType, usize>,
}

/// Durable, id-addressed backup storage.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Stores a backup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackupExists`] if the id is taken.
    async fn put(&self, backup: &Backup) -> StoreResult<()>;

    /// Fetches a backup.
    async fn get(&self, id: &str) -> StoreResult<Option<Backup>>;

    /// Lists stored backups, oldest first.
    async fn list(&self) -> StoreResult<Vec<BackupInfo>>;

    /// Deletes a backup. Returns true if it existed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;
}

/// An in-memory backup store.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    backups: RwLock<BTreeMap<String, Backup>>,
}

impl MemoryBackupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored backups.
    pub fn len(&self) -> usize {
        self.backups.read().len()
    }

    /// Returns true if no backup is stored.
    pub fn is_empty(&self) -> bool {
        self.backups.read().is_empty()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn put(&self, backup: &Backup) -> StoreResult<()> {
        let mut backups = self.backups.write();
        if backups.contains_key(&backup.id) {
            return Err(StoreError::BackupExists(backup.id.clone()));
        }
        backups.insert(backup.id.clone(), backup.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Backup>> {
        Ok(self.backups.read().get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<BackupInfo>> {
        let mut infos: Vec<_> = self.backups.read().values().map(Backup::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(infos)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.backups.write().remove(id).is_some())
    }
}

/// A backup store keeping one JSON file per backup under a directory.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    root: PathBuf,
}

impl FileBackupStore {
    /// Opens a backup directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        validate_file_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn put(&self, backup: &Backup) -> StoreResult<()> {
        let path = self.path_for(&backup.id)?;
        if fs::try_exists(&path).await? {
            return Err(StoreError::BackupExists(backup.id.clone()));
        }
        write_json_atomic(&path, backup).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Backup>> {
        let path = self.path_for(id)?;
        match read_json_opt(&path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> StoreResult<Vec<BackupInfo>> {
        let mut infos = Vec::new();
        for id in list_json_stems(&self.root).await? {
            if let Some(backup) = self.get(&id).await? {
                infos.push(backup.info());
            }
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(infos)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use tempfile::tempdir;

    fn make_backup(id: &str) -> Backup {
        let mut snapshot = Collections::new();
        snapshot.insert(EntityType::World, vec![Entity::new("w1"), Entity::new("w2")]);
        snapshot.insert(EntityType::Shot, vec![Entity::new("x1")]);
        Backup {
            id: id.to_string(),
            created_at: Utc::now(),
            snapshot,
        }
    }

    #[tokio::test]
    async fn memory_store_is_write_once() {
        let store = MemoryBackupStore::new();
        store.put(&make_backup("b1")).await.unwrap();
        assert!(matches!(
            store.put(&make_backup("b1")).await,
            Err(StoreError::BackupExists(_))
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b1").await.unwrap().unwrap().entity_count(), 3);
        assert!(store.remove("b1").await.unwrap());
        assert!(!store.remove("b1").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileBackupStore::open(dir.path()).unwrap();
        let backup = make_backup("backup-1");

        store.put(&backup).await.unwrap();
        assert!(store.put(&backup).await.is_err());

        let loaded = store.get("backup-1").await.unwrap().unwrap();
        assert_eq!(loaded, backup);

        let infos = store.list().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].counts[&EntityType::World], 2);

        assert!(store.remove("backup-1").await.unwrap());
        assert!(store.get("backup-1").await.unwrap().is_none());
    }

    #[test]
    fn info_counts_per_type() {
        let info = make_backup("b").info();
        assert_eq!(info.counts[&EntityType::Shot], 1);
        assert_eq!(info.counts.get(&EntityType::Scene), None);
    }
}
