//! Migration of in-memory-only entities into the durable layer.
//!
//! Every attempt is bracketed by a backup of the in-memory state. Entities
//! are validated, checked for an existing durable counterpart and written;
//! if anything fails the in-memory state is restored from the backup.
//!
//! Attempt states:
//!
//! ```text
//! NotStarted -> BackupTaken -> InProgress -> Succeeded
//!                                         -> Failed -> RolledBack
//! ```
//!
//! A rolled-back attempt re-enters `InProgress` through
//! [`MigrationOrchestrator::retry_failed_migration`], which re-runs only the
//! retryable errors.

use crate::backup::BackupManager;
use crate::config::{cutoff, EngineConfig};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scenesync_store::{
    any_layer_succeeded, in_scope, DataValidator, Entity, EntityType, PersistenceService,
    ProjectScope, StateStore,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Entity id recorded when a whole sub-task failed.
pub const UNKNOWN_ENTITY_ID: &str = "unknown";

/// A failure to migrate one entity, or a whole entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationError {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id, or [`UNKNOWN_ENTITY_ID`] for a sub-task failure.
    pub entity_id: String,
    /// Error message.
    pub message: String,
    /// Whether a retry may succeed without changing the data.
    pub retryable: bool,
}

impl MigrationError {
    fn validation(entity_type: EntityType, entity_id: &str, messages: &[String]) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            message: format!("validation failed: {}", messages.join("; ")),
            retryable: false,
        }
    }

    fn transient(entity_type: EntityType, entity_id: &str, message: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            message: message.into(),
            retryable: true,
        }
    }

    fn task_failed(entity_type: EntityType, message: impl Into<String>) -> Self {
        Self::transient(entity_type, UNKNOWN_ENTITY_ID, message)
    }

    /// Returns true if the error covers a whole entity type.
    pub fn is_task_failure(&self) -> bool {
        self.entity_id == UNKNOWN_ENTITY_ID
    }
}

/// Outcome of one migration attempt, or of an attempt and its retries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// True when no errors remain.
    pub success: bool,
    /// Entities written durably.
    pub migrated_count: u64,
    /// Entities that already had a durable counterpart.
    pub skipped_count: u64,
    /// Remaining errors.
    pub errors: Vec<MigrationError>,
    /// Backups the in-memory state was restored from.
    pub rollback_backup_ids: Vec<String>,
    /// Total time spent, retries included.
    pub duration: Duration,
}

impl MigrationResult {
    /// Returns the duration in milliseconds.
    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }

    /// Number of errors that a retry would re-attempt.
    pub fn retryable_count(&self) -> usize {
        self.errors.iter().filter(|e| e.retryable).count()
    }
}

/// Lifecycle state of a migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Created, nothing done yet.
    NotStarted,
    /// The pre-migration backup exists.
    BackupTaken,
    /// Entities are being migrated.
    InProgress,
    /// Every entity was migrated or skipped.
    Succeeded,
    /// Errors occurred; rollback pending.
    Failed,
    /// The in-memory state was restored from the backup.
    RolledBack,
}

impl MigrationState {
    /// Returns true if no further transition happens without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Succeeded | MigrationState::RolledBack)
    }
}

/// A migration attempt kept in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration id.
    pub id: String,
    /// Current state.
    pub state: MigrationState,
    /// Latest result.
    pub result: MigrationResult,
    /// Project the migration was restricted to.
    pub scope: Option<ProjectScope>,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Backup taken before the latest attempt.
    pub backup_id: Option<String>,
}

/// Aggregate counters over the migration history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationStats {
    /// Migrations in the history.
    pub total_migrations: usize,
    /// Migrations that succeeded.
    pub successful: usize,
    /// Migrations that did not succeed.
    pub failed: usize,
    /// Entities migrated across all migrations.
    pub total_migrated: u64,
    /// Entities skipped across all migrations.
    pub total_skipped: u64,
    /// Errors across all migrations.
    pub total_errors: usize,
    /// Errors a retry would re-attempt.
    pub pending_retryable: usize,
    /// Start time of the newest migration.
    pub last_migration_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SubTaskOutcome {
    migrated: u64,
    skipped: u64,
    errors: Vec<MigrationError>,
}

impl SubTaskOutcome {
    fn failed(error: MigrationError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }
}

/// Migrates one entity type.
#[derive(Clone)]
struct MigrationSubTask {
    persistence: Arc<dyn PersistenceService>,
    validator: Arc<dyn DataValidator>,
}

impl MigrationSubTask {
    async fn run(&self, entity_type: EntityType, candidates: Vec<Entity>) -> SubTaskOutcome {
        let mut outcome = SubTaskOutcome::default();

        if !self.persistence.supports(entity_type) {
            warn!(%entity_type, count = candidates.len(), "no durable mapping, not migrated");
            return outcome;
        }

        for entity in &candidates {
            match self.migrate_entity(entity_type, entity).await {
                Ok(true) => outcome.migrated += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    debug!(%entity_type, id = %e.entity_id, error = %e.message, "entity not migrated");
                    outcome.errors.push(e);
                }
            }
        }
        outcome
    }

    /// Returns `Ok(true)` if written, `Ok(false)` if already durable.
    async fn migrate_entity(
        &self,
        entity_type: EntityType,
        entity: &Entity,
    ) -> Result<bool, MigrationError> {
        let id = entity.id();

        let report = self.validator.validate(entity_type, entity).await;
        if !report.is_valid {
            return Err(MigrationError::validation(entity_type, id, &report.errors));
        }

        match self.persistence.load(entity_type, id).await {
            Ok(Some(_)) => return Ok(false),
            Ok(None) => {}
            Err(e) => {
                return Err(MigrationError::transient(
                    entity_type,
                    id,
                    format!("existence check failed: {e}"),
                ))
            }
        }

        match self.persistence.save(entity_type, entity).await {
            Ok(results) if any_layer_succeeded(&results) => Ok(true),
            Ok(results) => {
                let reasons: Vec<&str> = results
                    .iter()
                    .filter_map(|r| r.error.as_deref())
                    .collect();
                Err(MigrationError::transient(
                    entity_type,
                    id,
                    format!("write rejected by every layer: {}", reasons.join("; ")),
                ))
            }
            Err(e) => Err(MigrationError::transient(
                entity_type,
                id,
                format!("write failed: {e}"),
            )),
        }
    }
}

/// Runs migrations and keeps their history.
pub struct MigrationOrchestrator {
    config: EngineConfig,
    state: Arc<dyn StateStore>,
    backups: Arc<BackupManager>,
    sub_task: MigrationSubTask,
    history: RwLock<BTreeMap<String, MigrationRecord>>,
}

impl MigrationOrchestrator {
    /// Creates a migration orchestrator.
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceService>,
        validator: Arc<dyn DataValidator>,
        state: Arc<dyn StateStore>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            config,
            state,
            backups,
            sub_task: MigrationSubTask {
                persistence,
                validator,
            },
            history: RwLock::new(BTreeMap::new()),
        }
    }

    /// Migrates every in-scope entity of every configured type.
    ///
    /// Returns the result together with the id under which it is stored in
    /// the history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Backup`] if the pre-migration backup cannot be
    /// taken (nothing is migrated), or [`EngineError::Rollback`] if restoring
    /// after a failure fails.
    pub async fn migrate_all(
        &self,
        scope: Option<&ProjectScope>,
    ) -> EngineResult<(String, MigrationResult)> {
        let start = Instant::now();
        let migration_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut record = MigrationRecord {
            id: migration_id.clone(),
            state: MigrationState::NotStarted,
            result: MigrationResult::default(),
            scope: scope.cloned(),
            started_at,
            updated_at: started_at,
            backup_id: None,
        };
        info!(migration_id = %migration_id, "migration started");

        let backup_id = self.take_backup(&migration_id).await?;
        record.backup_id = Some(backup_id.clone());
        self.transition(&mut record, MigrationState::BackupTaken);
        self.transition(&mut record, MigrationState::InProgress);

        let work = self
            .config
            .entity_types
            .iter()
            .map(|&t| (t, self.candidates(t, scope)))
            .collect();
        let outcome = self.run_sub_tasks(work).await;

        let mut result = MigrationResult {
            success: outcome.errors.is_empty(),
            migrated_count: outcome.migrated,
            skipped_count: outcome.skipped,
            errors: outcome.errors,
            rollback_backup_ids: Vec::new(),
            duration: Duration::ZERO,
        };

        let finished = self
            .finish_attempt(&mut record, &mut result, &backup_id, start)
            .await;
        record.result = result.clone();
        self.store(record);
        finished?;

        info!(
            migration_id = %migration_id,
            success = result.success,
            migrated = result.migrated_count,
            skipped = result.skipped_count,
            errors = result.errors.len(),
            "migration finished"
        );
        Ok((migration_id, result))
    }

    /// Re-attempts the retryable errors of a stored migration.
    ///
    /// A fresh backup is taken first. Non-retryable errors are carried over
    /// unchanged; counts accumulate. An entity that is no longer in memory
    /// becomes a non-retryable error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MigrationNotFound`] for an unknown id, and the
    /// same fatal errors as [`Self::migrate_all`].
    pub async fn retry_failed_migration(&self, migration_id: &str) -> EngineResult<MigrationResult> {
        let start = Instant::now();
        let mut record = self
            .get_migration(migration_id)
            .ok_or_else(|| EngineError::MigrationNotFound(migration_id.to_string()))?;

        let (retry, kept): (Vec<_>, Vec<_>) = record
            .result
            .errors
            .iter()
            .cloned()
            .partition(|e| e.retryable);
        if retry.is_empty() {
            debug!(migration_id, "nothing to retry");
            return Ok(record.result);
        }
        info!(migration_id, retrying = retry.len(), "retrying migration");

        let backup_id = self.take_backup(migration_id).await?;
        record.backup_id = Some(backup_id.clone());
        self.transition(&mut record, MigrationState::InProgress);

        let (work, mut missing) = self.retry_work(&retry, record.scope.as_ref());
        let outcome = self.run_sub_tasks(work).await;

        let attempt_failed = !outcome.errors.is_empty() || !missing.is_empty();
        let mut result = record.result.clone();
        result.migrated_count += outcome.migrated;
        result.skipped_count += outcome.skipped;
        result.errors = kept;
        result.errors.extend(outcome.errors);
        result.errors.append(&mut missing);
        result.success = result.errors.is_empty();

        let finished = if attempt_failed {
            self.finish_attempt(&mut record, &mut result, &backup_id, start)
                .await
        } else {
            result.duration += start.elapsed();
            // Errors carried over were rolled back by an earlier attempt.
            let state = if result.success {
                MigrationState::Succeeded
            } else {
                MigrationState::RolledBack
            };
            self.transition(&mut record, state);
            Ok(())
        };
        record.result = result.clone();
        self.store(record);
        finished?;

        info!(
            migration_id,
            success = result.success,
            remaining_errors = result.errors.len(),
            "migration retry finished"
        );
        Ok(result)
    }

    /// Returns aggregate counters over the history.
    pub fn get_migration_stats(&self) -> MigrationStats {
        self.prune_history();
        let history = self.history.read();
        let mut stats = MigrationStats {
            total_migrations: history.len(),
            ..MigrationStats::default()
        };
        for record in history.values() {
            let result = &record.result;
            if result.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            stats.total_migrated += result.migrated_count;
            stats.total_skipped += result.skipped_count;
            stats.total_errors += result.errors.len();
            stats.pending_retryable += result.retryable_count();
            stats.last_migration_at = stats.last_migration_at.max(Some(record.started_at));
        }
        stats
    }

    /// Returns a stored migration.
    pub fn get_migration(&self, migration_id: &str) -> Option<MigrationRecord> {
        self.history.read().get(migration_id).cloned()
    }

    /// Returns the history, oldest first.
    pub fn history(&self) -> Vec<MigrationRecord> {
        let mut records: Vec<_> = self.history.read().values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Drops records older than the retention window.
    pub fn prune_history(&self) -> usize {
        let cutoff = cutoff(self.config.migration_retention);
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|_, r| r.updated_at >= cutoff);
        let pruned = before - history.len();
        if pruned > 0 {
            debug!(pruned, "migration history pruned");
        }
        pruned
    }

    fn candidates(&self, entity_type: EntityType, scope: Option<&ProjectScope>) -> Vec<Entity> {
        self.state
            .collection(entity_type)
            .into_iter()
            .filter(|e| in_scope(scope, e))
            .collect()
    }

    /// Builds the per-type work list for a retry. A task-level failure
    /// re-runs its whole type.
    fn retry_work(
        &self,
        retry: &[MigrationError],
        scope: Option<&ProjectScope>,
    ) -> (Vec<(EntityType, Vec<Entity>)>, Vec<MigrationError>) {
        let whole: BTreeSet<EntityType> = retry
            .iter()
            .filter(|e| e.is_task_failure())
            .map(|e| e.entity_type)
            .collect();
        let mut ids: BTreeMap<EntityType, Vec<&str>> = BTreeMap::new();
        for e in retry.iter().filter(|e| !e.is_task_failure()) {
            if !whole.contains(&e.entity_type) {
                ids.entry(e.entity_type).or_default().push(&e.entity_id);
            }
        }

        let mut work: Vec<_> = whole
            .iter()
            .map(|&t| (t, self.candidates(t, scope)))
            .collect();
        let mut missing = Vec::new();
        for (entity_type, wanted) in ids {
            let collection = self.state.collection(entity_type);
            let mut found = Vec::with_capacity(wanted.len());
            for id in wanted {
                match collection.iter().find(|e| e.id() == id) {
                    Some(entity) => found.push(entity.clone()),
                    None => missing.push(MigrationError {
                        entity_type,
                        entity_id: id.to_string(),
                        message: "entity no longer present in memory".to_string(),
                        retryable: false,
                    }),
                }
            }
            work.push((entity_type, found));
        }
        (work, missing)
    }

    async fn run_sub_tasks(&self, work: Vec<(EntityType, Vec<Entity>)>) -> SubTaskOutcome {
        let mut handles = Vec::with_capacity(work.len());
        for (entity_type, candidates) in work {
            let sub_task = self.sub_task.clone();
            let handle = tokio::spawn(async move { sub_task.run(entity_type, candidates).await });
            handles.push((entity_type, handle));
        }

        let mut total = SubTaskOutcome::default();
        for (entity_type, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(%entity_type, error = %e, "migration sub-task failed");
                    SubTaskOutcome::failed(MigrationError::task_failed(
                        entity_type,
                        EngineError::from(e).to_string(),
                    ))
                }
            };
            total.migrated += outcome.migrated;
            total.skipped += outcome.skipped;
            total.errors.extend(outcome.errors);
        }
        total
    }

    async fn take_backup(&self, migration_id: &str) -> EngineResult<String> {
        self.backups.create_backup().await.map_err(|e| {
            error!(migration_id, error = %e, "pre-migration backup failed");
            EngineError::Backup(e.to_string())
        })
    }

    /// Sets the final state of an attempt, rolling back if it failed.
    async fn finish_attempt(
        &self,
        record: &mut MigrationRecord,
        result: &mut MigrationResult,
        backup_id: &str,
        start: Instant,
    ) -> EngineResult<()> {
        if result.success {
            result.duration += start.elapsed();
            self.transition(record, MigrationState::Succeeded);
            return Ok(());
        }

        self.transition(record, MigrationState::Failed);
        warn!(
            migration_id = %record.id,
            errors = result.errors.len(),
            backup_id,
            "migration failed, rolling back"
        );

        let restored = self.backups.restore_from_backup(backup_id).await;
        result.duration += start.elapsed();
        match restored {
            Ok(_) => {
                result.rollback_backup_ids.push(backup_id.to_string());
                if result.migrated_count > 0 {
                    warn!(
                        migration_id = %record.id,
                        durable_writes = result.migrated_count,
                        "durable writes from the failed attempt are kept"
                    );
                }
                self.transition(record, MigrationState::RolledBack);
                Ok(())
            }
            Err(e) => {
                error!(migration_id = %record.id, backup_id, error = %e, "rollback failed");
                Err(EngineError::Rollback {
                    backup_id: backup_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn transition(&self, record: &mut MigrationRecord, state: MigrationState) {
        debug!(migration_id = %record.id, from = ?record.state, to = ?state, "migration state");
        record.state = state;
        record.updated_at = Utc::now();
    }

    fn store(&self, record: MigrationRecord) {
        self.history.write().insert(record.id.clone(), record);
        self.prune_history();
    }
}
