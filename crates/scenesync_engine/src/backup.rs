//! Backup creation and restore.
//!
//! Backups snapshot every collection of the in-memory state. Restoring
//! re-inserts every snapshotted entity into the state store
//! (insert-or-replace by id); the backup itself is only read.
//!
//! ## Usage
//!
//! ```ignore
//! let manager = BackupManager::new(backups, state);
//!
//! let backup_id = manager.create_backup().await?;
//! manager.restore_from_backup(&backup_id).await?;
//! ```

use crate::config::cutoff;
use crate::error::{EngineError, EngineResult};
use chrono::Utc;
use scenesync_store::{Backup, BackupInfo, BackupStore, StateStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a restore operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreStats {
    /// The backup that was restored.
    pub backup_id: String,
    /// Number of entities written back into the state store.
    pub entities_restored: usize,
}

/// Creates backups of the in-memory state and restores them.
pub struct BackupManager {
    store: Arc<dyn BackupStore>,
    state: Arc<dyn StateStore>,
    sequence: AtomicU64,
}

impl BackupManager {
    /// Creates a backup manager.
    pub fn new(store: Arc<dyn BackupStore>, state: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            state,
            sequence: AtomicU64::new(0),
        }
    }

    /// Snapshots every collection and stores it. Returns the backup id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup store rejects the write.
    pub async fn create_backup(&self) -> EngineResult<String> {
        let created_at = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let backup = Backup {
            id: format!("backup-{}-{}", created_at.timestamp_millis(), seq),
            created_at,
            snapshot: self.state.snapshot(),
        };

        self.store.put(&backup).await?;
        info!(
            backup_id = %backup.id,
            entities = backup.entity_count(),
            "backup created"
        );
        Ok(backup.id)
    }

    /// Restores every entity of a backup into the state store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BackupNotFound`] if the id is unknown, or a
    /// store error if the backup cannot be read.
    pub async fn restore_from_backup(&self, backup_id: &str) -> EngineResult<RestoreStats> {
        let backup = self
            .store
            .get(backup_id)
            .await?
            .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))?;

        let mut entities_restored = 0;
        for (entity_type, entities) in &backup.snapshot {
            entities_restored += entities.len();
            debug!(%entity_type, count = entities.len(), "restoring collection");
            self.state.restore(*entity_type, entities.clone());
        }

        info!(backup_id, entities_restored, "backup restored");
        Ok(RestoreStats {
            backup_id: backup_id.to_string(),
            entities_restored,
        })
    }

    /// Lists stored backups, oldest first.
    pub async fn list_backups(&self) -> EngineResult<Vec<BackupInfo>> {
        Ok(self.store.list().await?)
    }

    /// Removes backups older than `max_age`. Returns how many were removed.
    pub async fn cleanup_backups(&self, max_age: Duration) -> EngineResult<usize> {
        let cutoff = cutoff(max_age);
        let mut removed = 0;
        for info in self.store.list().await? {
            if info.created_at >= cutoff {
                continue;
            }
            match self.store.remove(&info.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(backup_id = %info.id, error = %e, "failed to remove old backup"),
            }
        }
        if removed > 0 {
            info!(removed, "old backups cleaned up");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_store::{Entity, EntityType, MemoryBackupStore, MemoryStateStore};

    fn setup() -> (BackupManager, Arc<MemoryStateStore>, Arc<MemoryBackupStore>) {
        let state = Arc::new(MemoryStateStore::new());
        let store = Arc::new(MemoryBackupStore::new());
        let manager = BackupManager::new(store.clone(), state.clone());
        (manager, state, store)
    }

    #[tokio::test]
    async fn backup_and_restore() {
        let (manager, state, _) = setup();
        state.upsert(EntityType::World, Entity::new("w1").with("name", "before"));
        state.upsert(EntityType::Shot, Entity::new("x1"));

        let id = manager.create_backup().await.unwrap();
        assert!(id.starts_with("backup-"));

        state.upsert(EntityType::World, Entity::new("w1").with("name", "after"));
        let stats = manager.restore_from_backup(&id).await.unwrap();

        assert_eq!(stats.entities_restored, 2);
        let worlds = state.collection(EntityType::World);
        assert_eq!(worlds[0].get("name").and_then(|v| v.as_str()), Some("before"));
    }

    #[tokio::test]
    async fn backup_ids_are_unique() {
        let (manager, _, store) = setup();
        let a = manager.create_backup().await.unwrap();
        let b = manager.create_backup().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn restore_unknown_backup() {
        let (manager, _, _) = setup();
        assert!(matches!(
            manager.restore_from_backup("missing").await,
            Err(EngineError::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_backups() {
        let (manager, _, store) = setup();
        manager.create_backup().await.unwrap();

        let old = Backup {
            id: "backup-0-0".into(),
            created_at: Utc::now() - chrono::Duration::days(40),
            snapshot: Default::default(),
        };
        store.put(&old).await.unwrap();

        let removed = manager
            .cleanup_backups(Duration::from_secs(30 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(manager.list_backups().await.unwrap().len(), 1);
    }
}
