//! The caller-facing engine.

use crate::backup::{BackupManager, RestoreStats};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::migration::{MigrationOrchestrator, MigrationRecord, MigrationResult, MigrationStats};
use crate::orchestrator::{SyncOrchestrator, SyncResult, SyncStatus};
use crate::scheduler::{SchedulerHandle, SyncScheduler};
use scenesync_protocol::{Resolution, SyncConflict};
use scenesync_store::{
    BackupInfo, BackupStore, DataValidator, Entity, PersistenceService, ProjectScope, StateStore,
};
use std::sync::Arc;

/// Owns the sync orchestrator, the migration orchestrator and the backup
/// manager, sharing one set of collaborators.
///
/// Construct it once and pass it around by reference or `Arc`.
pub struct DataSyncEngine {
    config: EngineConfig,
    sync: Arc<SyncOrchestrator>,
    migrations: MigrationOrchestrator,
    backups: Arc<BackupManager>,
}

impl DataSyncEngine {
    /// Creates an engine.
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceService>,
        validator: Arc<dyn DataValidator>,
        state: Arc<dyn StateStore>,
        backup_store: Arc<dyn BackupStore>,
    ) -> Self {
        let backups = Arc::new(BackupManager::new(backup_store, state.clone()));
        let sync = Arc::new(SyncOrchestrator::new(
            config.clone(),
            persistence.clone(),
            state.clone(),
            backups.clone(),
        ));
        let migrations = MigrationOrchestrator::new(
            config.clone(),
            persistence,
            validator,
            state,
            backups.clone(),
        );
        Self {
            config,
            sync,
            migrations,
            backups,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the sync orchestrator.
    pub fn sync_orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    /// Returns the migration orchestrator.
    pub fn migration_orchestrator(&self) -> &MigrationOrchestrator {
        &self.migrations
    }

    /// Runs one sync cycle.
    pub async fn full_sync(&self, scope: Option<&ProjectScope>) -> SyncResult {
        self.sync.full_sync(scope).await
    }

    /// Migrates in-memory-only entities into the durable layer.
    pub async fn migrate_all(
        &self,
        scope: Option<&ProjectScope>,
    ) -> EngineResult<(String, MigrationResult)> {
        self.migrations.migrate_all(scope).await
    }

    /// Re-attempts the retryable errors of a migration.
    pub async fn retry_failed_migration(&self, migration_id: &str) -> EngineResult<MigrationResult> {
        self.migrations.retry_failed_migration(migration_id).await
    }

    /// Resolves a conflict and persists the resolved version.
    pub async fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
        manual_payload: Option<Entity>,
    ) -> EngineResult<Entity> {
        self.sync
            .resolve_conflict(conflict, resolution, manual_payload)
            .await
    }

    /// Takes a backup of the in-memory state.
    pub async fn create_backup(&self) -> EngineResult<String> {
        self.backups.create_backup().await
    }

    /// Restores the in-memory state from a backup.
    pub async fn restore_from_backup(&self, backup_id: &str) -> EngineResult<RestoreStats> {
        self.backups.restore_from_backup(backup_id).await
    }

    /// Lists stored backups.
    pub async fn list_backups(&self) -> EngineResult<Vec<BackupInfo>> {
        self.backups.list_backups().await
    }

    /// Removes backups older than the configured retention.
    pub async fn cleanup_backups(&self) -> EngineResult<usize> {
        self.backups
            .cleanup_backups(self.config.backup_retention)
            .await
    }

    /// Returns the sync status.
    pub fn get_sync_status(&self) -> SyncStatus {
        self.sync.get_sync_status()
    }

    /// Returns aggregate migration counters.
    pub fn get_migration_stats(&self) -> MigrationStats {
        self.migrations.get_migration_stats()
    }

    /// Returns the migration history.
    pub fn migration_history(&self) -> Vec<MigrationRecord> {
        self.migrations.history()
    }

    /// Starts timer and project-change triggered sync.
    pub fn start_scheduler(&self, scope: Option<ProjectScope>) -> SchedulerHandle {
        SyncScheduler::spawn(self.sync.clone(), scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_store::{
        BasicValidator, EntityType, MemoryBackupStore, MemoryPersistence, MemoryStateStore,
    };

    #[tokio::test]
    async fn engine_shares_collaborators() {
        let state = Arc::new(MemoryStateStore::new());
        let durable = Arc::new(MemoryPersistence::new());
        let engine = DataSyncEngine::new(
            EngineConfig::new().without_sync_timer(),
            durable.clone(),
            Arc::new(BasicValidator::new()),
            state.clone(),
            Arc::new(MemoryBackupStore::new()),
        );
        state.upsert(EntityType::Sequence, Entity::new("q1"));

        let (_, migration) = engine.migrate_all(None).await.unwrap();
        assert_eq!(migration.migrated_count, 1);

        let sync = engine.full_sync(None).await;
        assert!(sync.success);
        assert_eq!(sync.synced_count, 0);

        assert_eq!(engine.list_backups().await.unwrap().len(), 1);
        assert_eq!(engine.get_migration_stats().total_migrations, 1);
        assert_eq!(engine.cleanup_backups().await.unwrap(), 0);
    }
}
