//! Sync cycle orchestration.
//!
//! A cycle fans out one [`EntitySyncTask`] per entity type, waits for all of
//! them, and aggregates their outcomes. At most one cycle runs at a time; a
//! second request while one is running is rejected through its result.
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::new(config, persistence, state, backups);
//!
//! let result = orchestrator.full_sync(None).await;
//! for conflict in &result.conflicts {
//!     println!("{} diverged", conflict.entity_ref());
//! }
//! ```

use crate::backup::{BackupManager, RestoreStats};
use crate::config::{cutoff, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::task::{EntitySyncOutcome, EntitySyncTask};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scenesync_protocol::{ConflictDetector, ConflictResolver, Resolution, SyncConflict};
use scenesync_store::{
    any_layer_succeeded, in_scope, Entity, EntityRef, PersistenceService, ProjectScope,
    StateStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Aggregated result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// True when no sub-task and no entity reported an error.
    pub success: bool,
    /// Entities written durably because they were missing there.
    pub synced_count: u64,
    /// Conflicts detected during the cycle.
    pub conflicts: Vec<SyncConflict>,
    /// Error messages, one per failed entity or sub-task.
    pub errors: Vec<String>,
    /// Entities that exist durably but not in memory.
    pub untracked: Vec<EntityRef>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

impl SyncResult {
    /// The result returned when another cycle is already running.
    pub fn rejected() -> Self {
        Self {
            success: false,
            errors: vec![EngineError::SyncInProgress.to_string()],
            ..Self::default()
        }
    }

    /// Returns the duration in milliseconds.
    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }

    /// Number of conflicts detected.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    fn absorb(&mut self, outcome: EntitySyncOutcome) {
        self.synced_count += outcome.synced_count;
        self.conflicts.extend(outcome.conflicts);
        self.errors.extend(outcome.errors);
        self.untracked.extend(outcome.untracked);
    }
}

/// Snapshot of the orchestrator's state.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Whether a cycle is running.
    pub in_progress: bool,
    /// Completion time of the last cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Conflicts in the log after pruning.
    pub conflict_count: usize,
    /// Newest conflicts, newest first.
    pub recent_conflicts: Vec<SyncConflict>,
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Requests rejected because a cycle was running.
    pub cycles_rejected: u64,
    /// Total entities written by sync.
    pub entities_synced: u64,
    /// Total conflicts detected.
    pub conflicts_detected: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Resets the in-progress flag when a cycle ends, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sync cycles and keeps the conflict log.
pub struct SyncOrchestrator {
    config: EngineConfig,
    persistence: Arc<dyn PersistenceService>,
    state: Arc<dyn StateStore>,
    backups: Arc<BackupManager>,
    resolver: ConflictResolver,
    in_progress: AtomicBool,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
    conflict_log: RwLock<Vec<SyncConflict>>,
    stats: RwLock<SyncStats>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceService>,
        state: Arc<dyn StateStore>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            config,
            persistence,
            state,
            backups,
            resolver: ConflictResolver::new(),
            in_progress: AtomicBool::new(false),
            last_sync_time: RwLock::new(None),
            conflict_log: RwLock::new(Vec::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns true while a cycle is running.
    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Completion time of the last cycle.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_time.read()
    }

    #[cfg(test)]
    pub(crate) fn in_progress_for_test(&self, in_progress: bool) {
        self.in_progress.store(in_progress, Ordering::Release);
    }

    /// Gets sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs one sync cycle over every configured entity type.
    ///
    /// With a scope, only entities of that project (and entities with no
    /// project) are considered. If a cycle is already running, this returns
    /// immediately with `errors = ["Sync already in progress"]` and changes
    /// nothing.
    pub async fn full_sync(&self, scope: Option<&ProjectScope>) -> SyncResult {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            debug!("sync requested while a cycle is running");
            self.stats.write().cycles_rejected += 1;
            return SyncResult::rejected();
        };

        let start = Instant::now();
        info!(scope = ?scope.map(|s| s.project_id.as_str()), "sync cycle started");

        let detector = ConflictDetector::new(self.config.conflict_threshold)
            .with_default_resolution(self.config.auto_resolution);
        let task = EntitySyncTask::new(self.persistence.clone(), detector)
            .with_auto_resolution(self.config.auto_resolution);
        let report_untracked = scope.is_none();

        let mut handles = Vec::with_capacity(self.config.entity_types.len());
        for &entity_type in &self.config.entity_types {
            let local: Vec<Entity> = self
                .state
                .collection(entity_type)
                .into_iter()
                .filter(|e| in_scope(scope, e))
                .collect();
            let task = task.clone();
            let handle =
                tokio::spawn(async move { task.sync(entity_type, local, report_untracked).await });
            handles.push((entity_type, handle));
        }

        let mut result = SyncResult::default();
        for (entity_type, handle) in handles {
            match handle.await {
                Ok(Ok(mut outcome)) => {
                    let resolved = std::mem::take(&mut outcome.resolved);
                    if !resolved.is_empty() {
                        debug!(
                            %entity_type,
                            count = resolved.len(),
                            "resolved versions written back"
                        );
                        self.state.restore(entity_type, resolved);
                    }
                    result.absorb(outcome);
                }
                Ok(Err(e)) => {
                    error!(%entity_type, error = %e, "sync task failed");
                    result.errors.push(format!("{entity_type}: {e}"));
                }
                Err(e) => {
                    error!(%entity_type, error = %e, "sync task panicked");
                    result
                        .errors
                        .push(format!("{entity_type}: {}", EngineError::from(e)));
                }
            }
        }

        result.success = result.errors.is_empty();
        result.duration = start.elapsed();

        *self.last_sync_time.write() = Some(Utc::now());
        self.conflict_log
            .write()
            .extend(result.conflicts.iter().cloned());
        self.prune_conflict_log();

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entities_synced += result.synced_count;
            stats.conflicts_detected += result.conflicts.len() as u64;
            if let Some(last) = result.errors.last() {
                stats.last_error = Some(last.clone());
            }
        }

        info!(
            synced = result.synced_count,
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            untracked = result.untracked.len(),
            duration_ms = result.duration_ms() as u64,
            "sync cycle finished"
        );
        result
    }

    /// Resolves a conflict and persists the resolved version.
    ///
    /// The resolved version is also written back into the in-memory state
    /// unless it is the local version already held there. The conflict is
    /// removed from the log.
    ///
    /// # Errors
    ///
    /// Returns an error if manual resolution lacks a valid payload, or if no
    /// durable layer accepts the write.
    pub async fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
        manual_payload: Option<Entity>,
    ) -> EngineResult<Entity> {
        let resolved = self
            .resolver
            .resolve(conflict, resolution, manual_payload)?;

        let results = self.persistence.save(conflict.entity_type, &resolved).await?;
        if !any_layer_succeeded(&results) {
            warn!(entity = %conflict.entity_ref(), "resolved version rejected by every layer");
            return Err(EngineError::write_rejected(
                conflict.entity_type,
                &conflict.entity_id,
            ));
        }

        if resolution != Resolution::LocalWins {
            self.state
                .restore(conflict.entity_type, vec![resolved.clone()]);
        }

        self.conflict_log.write().retain(|c| c.id != conflict.id);
        info!(entity = %conflict.entity_ref(), %resolution, "conflict resolved");
        Ok(resolved)
    }

    /// Resolves a logged conflict by its id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConflictNotFound`] if the id is not in the log,
    /// otherwise as [`Self::resolve_conflict`].
    pub async fn resolve_conflict_by_id(
        &self,
        conflict_id: &str,
        resolution: Resolution,
        manual_payload: Option<Entity>,
    ) -> EngineResult<Entity> {
        let conflict = self
            .conflict_log
            .read()
            .iter()
            .find(|c| c.id == conflict_id)
            .cloned()
            .ok_or_else(|| EngineError::ConflictNotFound(conflict_id.to_string()))?;
        self.resolve_conflict(&conflict, resolution, manual_payload)
            .await
    }

    /// Drops conflicts older than the retention window.
    pub fn prune_conflict_log(&self) -> usize {
        let cutoff = cutoff(self.config.conflict_retention);
        let mut log = self.conflict_log.write();
        let before = log.len();
        log.retain(|c| !c.is_older_than(cutoff));
        let pruned = before - log.len();
        if pruned > 0 {
            debug!(pruned, "conflict log pruned");
        }
        pruned
    }

    /// Returns the conflict log, oldest first.
    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.conflict_log.read().clone()
    }

    /// Returns the current status. Prunes the conflict log first.
    pub fn get_sync_status(&self) -> SyncStatus {
        self.prune_conflict_log();
        let log = self.conflict_log.read();
        SyncStatus {
            in_progress: self.is_sync_in_progress(),
            last_sync_time: self.last_sync_time(),
            conflict_count: log.len(),
            recent_conflicts: log
                .iter()
                .rev()
                .take(self.config.recent_conflicts_limit)
                .cloned()
                .collect(),
        }
    }

    /// Takes a backup of the in-memory state.
    pub async fn create_backup(&self) -> EngineResult<String> {
        self.backups.create_backup().await
    }

    /// Restores the in-memory state from a backup.
    pub async fn restore_from_backup(&self, backup_id: &str) -> EngineResult<RestoreStats> {
        self.backups.restore_from_backup(backup_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_store::{EntityType, MemoryBackupStore, MemoryPersistence, MemoryStateStore};

    const T0: &str = "2024-01-01T00:00:00Z";
    const T10: &str = "2024-01-01T00:00:10Z";

    struct Fixture {
        orchestrator: SyncOrchestrator,
        durable: Arc<MemoryPersistence>,
        state: Arc<MemoryStateStore>,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let durable = Arc::new(MemoryPersistence::new());
        let state = Arc::new(MemoryStateStore::new());
        let backups = Arc::new(BackupManager::new(
            Arc::new(MemoryBackupStore::new()),
            state.clone(),
        ));
        let orchestrator = SyncOrchestrator::new(config, durable.clone(), state.clone(), backups);
        Fixture {
            orchestrator,
            durable,
            state,
        }
    }

    fn diverged(f: &Fixture) {
        f.state.upsert(
            EntityType::World,
            Entity::new("w1").with("updatedAt", T0).with("name", "local"),
        );
        f.durable.insert(
            EntityType::World,
            Entity::new("w1").with("updatedAt", T10).with("name", "durable"),
        );
    }

    #[tokio::test]
    async fn sync_writes_missing_entities() {
        let f = fixture(EngineConfig::default());
        f.state.upsert(EntityType::World, Entity::new("w1"));
        f.state.upsert(EntityType::Character, Entity::new("c1"));

        let result = f.orchestrator.full_sync(None).await;

        assert!(result.success);
        assert_eq!(result.synced_count, 2);
        assert!(f.durable.contains(EntityType::Character, "c1"));
        assert!(f.orchestrator.last_sync_time().is_some());
        assert!(!f.orchestrator.is_sync_in_progress());
    }

    #[tokio::test]
    async fn sync_respects_project_scope() {
        let f = fixture(EngineConfig::default());
        f.state.upsert(EntityType::Scene, Entity::new("s1").with("projectId", "p1"));
        f.state.upsert(EntityType::Scene, Entity::new("s2").with("projectId", "p2"));
        f.state.upsert(EntityType::Scene, Entity::new("s3"));

        let result = f.orchestrator.full_sync(Some(&ProjectScope::new("p1"))).await;

        assert_eq!(result.synced_count, 2);
        assert!(!f.durable.contains(EntityType::Scene, "s2"));
    }

    #[tokio::test]
    async fn conflicts_are_logged_and_reported() {
        let f = fixture(EngineConfig::default());
        diverged(&f);

        let result = f.orchestrator.full_sync(None).await;
        assert_eq!(result.conflict_count(), 1);

        let status = f.orchestrator.get_sync_status();
        assert_eq!(status.conflict_count, 1);
        assert_eq!(status.recent_conflicts[0].entity_id, "w1");
        assert!(!status.in_progress);
    }

    #[tokio::test]
    async fn auto_durable_wins_is_written_back() {
        let f = fixture(EngineConfig::default().with_auto_resolution(Resolution::DurableWins));
        diverged(&f);

        assert_eq!(f.orchestrator.full_sync(None).await.conflict_count(), 1);
        let local = f.state.collection(EntityType::World);
        assert_eq!(local[0].get("name").and_then(|v| v.as_str()), Some("durable"));

        assert_eq!(f.orchestrator.full_sync(None).await.conflict_count(), 0);
        assert_eq!(f.orchestrator.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn rejected_cycle_changes_nothing() {
        let f = fixture(EngineConfig::default());
        f.state.upsert(EntityType::World, Entity::new("w1"));

        let _held = CycleGuard::acquire(&f.orchestrator.in_progress).unwrap();
        let result = f.orchestrator.full_sync(None).await;

        assert!(!result.success);
        assert_eq!(result.errors, vec!["Sync already in progress".to_string()]);
        assert_eq!(f.durable.write_count(), 0);
        assert!(f.orchestrator.last_sync_time().is_none());
        assert_eq!(f.orchestrator.stats().cycles_rejected, 1);
    }

    #[tokio::test]
    async fn resolve_durable_wins_updates_state() {
        let f = fixture(EngineConfig::default());
        diverged(&f);
        f.orchestrator.full_sync(None).await;
        let conflict = f.orchestrator.conflicts().remove(0);

        let resolved = f
            .orchestrator
            .resolve_conflict(&conflict, Resolution::DurableWins, None)
            .await
            .unwrap();

        assert_eq!(resolved.get("name").and_then(|v| v.as_str()), Some("durable"));
        let local = f.state.collection(EntityType::World);
        assert_eq!(local[0].get("name").and_then(|v| v.as_str()), Some("durable"));
        assert!(f.orchestrator.conflicts().is_empty());
    }

    #[tokio::test]
    async fn resolve_rejected_write_keeps_conflict() {
        let f = fixture(EngineConfig::default());
        diverged(&f);
        f.orchestrator.full_sync(None).await;
        let conflict_id = f.orchestrator.conflicts()[0].id.clone();

        f.durable.set_fail_writes(true);
        let err = f
            .orchestrator
            .resolve_conflict_by_id(&conflict_id, Resolution::Merge, None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::WriteRejected { .. }));
        assert_eq!(f.orchestrator.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_conflict() {
        let f = fixture(EngineConfig::default());
        let err = f
            .orchestrator
            .resolve_conflict_by_id("nope", Resolution::LocalWins, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConflictNotFound(_)));
    }

    #[tokio::test]
    async fn old_conflicts_are_pruned() {
        let f = fixture(EngineConfig::default());
        diverged(&f);
        f.orchestrator.full_sync(None).await;
        f.orchestrator.conflict_log.write()[0].detected_at = Utc::now() - chrono::Duration::hours(25);

        assert_eq!(f.orchestrator.prune_conflict_log(), 1);
        assert_eq!(f.orchestrator.get_sync_status().conflict_count, 0);
    }

    #[tokio::test]
    async fn recent_conflicts_are_limited() {
        let f = fixture(EngineConfig::default().with_recent_conflicts_limit(2));
        for i in 0..4 {
            let id = format!("w{i}");
            f.state
                .upsert(EntityType::World, Entity::new(id.clone()).with("updatedAt", T0));
            f.durable
                .insert(EntityType::World, Entity::new(id).with("updatedAt", T10));
        }

        f.orchestrator.full_sync(None).await;
        let status = f.orchestrator.get_sync_status();

        assert_eq!(status.conflict_count, 4);
        assert_eq!(status.recent_conflicts.len(), 2);
        assert_eq!(status.recent_conflicts[0].entity_id, "w3");
    }
}
