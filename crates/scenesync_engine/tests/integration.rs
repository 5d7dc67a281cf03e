//! End-to-end tests for sync, migration and rollback.

use scenesync_engine::{
    DataSyncEngine, EngineConfig, EngineError, MigrationState, SyncOrchestrator, UNKNOWN_ENTITY_ID,
};
use scenesync_protocol::Resolution;
use scenesync_store::{
    BasicValidator, BackupStore, Entity, EntityType, MemoryBackupStore, MemoryPersistence,
    MemoryStateStore, PersistenceService, ProjectScope, StateStore,
};
use scenesync_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn engine(
    persistence: Arc<dyn PersistenceService>,
    state: Arc<MemoryStateStore>,
) -> DataSyncEngine {
    engine_with(persistence, state, Arc::new(MemoryBackupStore::new()))
}

fn engine_with(
    persistence: Arc<dyn PersistenceService>,
    state: Arc<MemoryStateStore>,
    backups: Arc<dyn BackupStore>,
) -> DataSyncEngine {
    let validator = BasicValidator::new().require(EntityType::Character, "name");
    DataSyncEngine::new(
        EngineConfig::new().without_sync_timer(),
        persistence,
        Arc::new(validator),
        state,
        backups,
    )
}

#[tokio::test]
async fn world_conflict_scenario() {
    let state = state_with(&[(
        EntityType::World,
        Entity::new("w1")
            .with("updatedAt", "2024-01-01T00:00:00Z")
            .with("name", "Eldoria"),
    )]);
    let durable = durable_with(&[(
        EntityType::World,
        Entity::new("w1")
            .with("updatedAt", "2024-01-01T00:00:10Z")
            .with("name", "Eldoria (edited elsewhere)"),
    )]);
    let engine = engine(durable.clone(), state);

    let result = engine.full_sync(None).await;

    assert!(result.success);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, Resolution::LocalWins);
    let stored = durable.get(EntityType::World, "w1").unwrap();
    assert_eq!(stored.get("name").and_then(|v| v.as_str()), Some("Eldoria"));
    assert_eq!(engine.get_sync_status().conflict_count, 1);
}

#[tokio::test]
async fn conflict_threshold_boundary() {
    let state = state_with(&[
        (EntityType::Shot, Entity::new("near").with("updatedAt", ts_millis(0))),
        (EntityType::Shot, Entity::new("far").with("updatedAt", ts_millis(0))),
    ]);
    let durable = durable_with(&[
        (EntityType::Shot, Entity::new("near").with("updatedAt", ts_millis(4999))),
        (EntityType::Shot, Entity::new("far").with("updatedAt", ts_millis(5001))),
    ]);
    let engine = engine(durable, state);

    let result = engine.full_sync(None).await;

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].entity_id, "far");
}

#[tokio::test]
async fn sync_in_progress_is_rejected_without_waiting() {
    let state = state_with(&[(EntityType::Scene, entity_at("s1", 0))]);
    let gated = Arc::new(GatedPersistence::new(Arc::new(MemoryPersistence::new())));
    let engine = Arc::new(engine(gated.clone(), state));

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.full_sync(None).await })
    };
    gated.wait_until_entered().await;

    let rejected = tokio::time::timeout(Duration::from_secs(1), engine.full_sync(None))
        .await
        .expect("rejection must not wait for the running cycle");
    assert!(!rejected.errors.is_empty());
    assert_eq!(rejected.errors[0], "Sync already in progress");
    assert_eq!(rejected.synced_count, 0);
    assert!(engine.get_sync_status().in_progress);

    gated.open();
    let completed = first.await.unwrap();
    assert!(completed.success);
    assert_eq!(completed.synced_count, 1);
    assert!(!engine.get_sync_status().in_progress);
}

#[tokio::test]
async fn scheduler_drops_triggers_during_a_cycle() {
    let state = state_with(&[(EntityType::World, entity_at("w1", 0))]);
    let gated = Arc::new(GatedPersistence::new(Arc::new(MemoryPersistence::new())));
    let engine = engine(gated.clone(), state);
    let scheduler = engine.start_scheduler(None);

    assert!(scheduler.trigger_now());
    gated.wait_until_entered().await;
    assert!(!scheduler.notify_project_changed(Some(ProjectScope::new("p1"))));
    assert_eq!(scheduler.dropped_triggers(), 1);

    gated.open();
    scheduler.shutdown().await;
    assert_eq!(engine.sync_orchestrator().stats().cycles_completed, 1);
}

#[tokio::test]
async fn failing_sub_task_does_not_cancel_siblings() {
    let state = state_with(&[
        (EntityType::World, entity_at("w1", 0)),
        (EntityType::Character, named("c1", "Ada")),
    ]);
    let flaky = Arc::new(FlakyPersistence::new());
    flaky.panic_on(EntityType::World);
    let engine = engine(flaky.clone(), state);

    let result = engine.full_sync(None).await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("world"));
    assert_eq!(result.synced_count, 1);
    assert!(flaky.inner().contains(EntityType::Character, "c1"));
}

#[tokio::test]
async fn merge_takes_newer_durable_fields() {
    let state = state_with(&[(
        EntityType::Character,
        named("c1", "Ada").with("a", 1).with("b", 2),
    )]);
    let durable = durable_with(&[(
        EntityType::Character,
        entity_at("c1", 60).with("a", 1).with("b", 3),
    )]);
    let engine = engine(durable.clone(), state.clone());

    engine.full_sync(None).await;
    let conflict = engine.get_sync_status().recent_conflicts.remove(0);
    let merged = engine
        .resolve_conflict(&conflict, Resolution::Merge, None)
        .await
        .unwrap();

    assert_eq!(merged.get("a"), Some(&serde_json::json!(1)));
    assert_eq!(merged.get("b"), Some(&serde_json::json!(3)));
    assert_eq!(merged.get("name"), Some(&serde_json::json!("Ada")));
    assert_eq!(durable.get(EntityType::Character, "c1").unwrap(), merged);
    assert_eq!(state.collection(EntityType::Character)[0], merged);
    assert_eq!(engine.get_sync_status().conflict_count, 0);
}

#[tokio::test]
async fn auto_merge_settles_after_one_cycle() {
    let state = state_with(&[(EntityType::World, named("w1", "local").with("tone", "dark"))]);
    let durable = durable_with(&[(
        EntityType::World,
        entity_at("w1", 60).with("name", "durable").with("era", "bronze"),
    )]);
    let engine = DataSyncEngine::new(
        EngineConfig::new()
            .without_sync_timer()
            .with_auto_resolution(Resolution::Merge),
        durable.clone(),
        Arc::new(BasicValidator::new()),
        state.clone(),
        Arc::new(MemoryBackupStore::new()),
    );

    let first = engine.full_sync(None).await;
    let second = engine.full_sync(None).await;
    let third = engine.full_sync(None).await;

    assert_eq!(first.conflicts.len(), 1);
    assert!(second.conflicts.is_empty());
    assert!(third.conflicts.is_empty());
    assert_eq!(engine.get_sync_status().conflict_count, 1);

    let local = state.collection(EntityType::World).remove(0);
    assert_eq!(local.get("tone"), Some(&serde_json::json!("dark")));
    assert_eq!(local.get("era"), Some(&serde_json::json!("bronze")));
    assert_eq!(durable.get(EntityType::World, "w1").unwrap(), local);
}

#[tokio::test]
async fn migration_is_idempotent() {
    let state = populated_state(2);
    let durable = Arc::new(MemoryPersistence::new());
    let engine = engine(durable.clone(), state);

    let (_, first) = engine.migrate_all(None).await.unwrap();
    assert!(first.success);
    assert_eq!(first.migrated_count, 10);

    let (_, second) = engine.migrate_all(None).await.unwrap();
    assert!(second.success);
    assert_eq!(second.migrated_count, 0);
    assert_eq!(second.skipped_count, 10);
    assert_eq!(durable.write_count(), 10);
}

#[tokio::test]
async fn migration_isolates_validation_failures() {
    let state = state_with(&[
        (EntityType::Character, named("a", "A")),
        (EntityType::Character, entity_at("b", 0)),
        (EntityType::Character, named("c", "C")),
    ]);
    let engine = engine(Arc::new(MemoryPersistence::new()), state);

    let (_, result) = engine.migrate_all(None).await.unwrap();

    assert!(!result.success);
    assert!(result.migrated_count >= 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].entity_id, "b");
    assert!(!result.rollback_backup_ids.is_empty());
}

#[tokio::test]
async fn rollback_restores_pre_migration_snapshot() {
    let state = populated_state(2);
    let before = state.snapshot();
    let flaky = Arc::new(FlakyPersistence::new());
    flaky.fail_writes_for("shot-1");
    let engine = engine(flaky, state.clone());

    let (_, result) = engine.migrate_all(None).await.unwrap();
    assert!(!result.success);
    let backup_id = result.rollback_backup_ids[0].clone();

    state.upsert(EntityType::World, named("world-0", "renamed after migration"));
    engine.restore_from_backup(&backup_id).await.unwrap();

    assert_eq!(state.snapshot(), before);
}

#[tokio::test]
async fn retry_resolves_transient_failures() {
    let state = populated_state(1);
    let flaky = Arc::new(FlakyPersistence::new());
    flaky.fail_writes_for("scene-0");
    flaky.fail_loads_for("shot-0");
    let engine = engine(flaky.clone(), state);

    let (id, failed) = engine.migrate_all(None).await.unwrap();
    assert_eq!(failed.errors.len(), 2);
    assert!(failed.errors.iter().all(|e| e.retryable));
    assert_eq!(engine.get_migration_stats().pending_retryable, 2);

    flaky.heal();
    let retried = engine.retry_failed_migration(&id).await.unwrap();

    assert!(retried.success);
    assert_eq!(retried.migrated_count, 5);
    assert_eq!(retried.rollback_backup_ids.len(), 1);
    let record = &engine.migration_history()[0];
    assert_eq!(record.state, MigrationState::Succeeded);
    assert_eq!(engine.get_migration_stats().pending_retryable, 0);
}

#[tokio::test]
async fn crashed_sub_task_is_retried_as_a_whole() {
    let state = populated_state(2);
    let flaky = Arc::new(FlakyPersistence::new());
    flaky.panic_on(EntityType::Sequence);
    let engine = engine(flaky.clone(), state);

    let (id, failed) = engine.migrate_all(None).await.unwrap();
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].entity_id, UNKNOWN_ENTITY_ID);
    assert_eq!(failed.errors[0].entity_type, EntityType::Sequence);
    assert_eq!(failed.migrated_count, 8);

    flaky.heal();
    let retried = engine.retry_failed_migration(&id).await.unwrap();
    assert!(retried.success);
    assert_eq!(retried.migrated_count, 10);
}

#[tokio::test]
async fn backup_failure_aborts_migration() {
    let state = populated_state(1);
    let durable = Arc::new(MemoryPersistence::new());
    let backups = Arc::new(BrokenBackupStore::new());
    backups.fail_put(true);
    let engine = engine_with(durable.clone(), state, backups);

    let err = engine.migrate_all(None).await.unwrap_err();

    assert!(matches!(err, EngineError::Backup(_)));
    assert_eq!(durable.write_count(), 0);
    assert!(engine.migration_history().is_empty());
}

#[tokio::test]
async fn rollback_failure_is_fatal() {
    let state = state_with(&[(EntityType::Character, entity_at("nameless", 0))]);
    let backups = Arc::new(BrokenBackupStore::new());
    backups.fail_get(true);
    let engine = engine_with(Arc::new(MemoryPersistence::new()), state, backups);

    let err = engine.migrate_all(None).await.unwrap_err();

    assert!(matches!(err, EngineError::Rollback { .. }));
    assert_eq!(engine.migration_history()[0].state, MigrationState::Failed);
}

#[tokio::test]
async fn scoped_migration_leaves_other_projects() {
    let state = state_with(&[
        (EntityType::Scene, project_entity("s1", "p1", 0)),
        (EntityType::Scene, project_entity("s2", "p2", 0)),
        (EntityType::World, entity_at("shared", 0)),
    ]);
    let durable = Arc::new(MemoryPersistence::new());
    let engine = engine(durable.clone(), state);

    let (_, result) = engine
        .migrate_all(Some(&ProjectScope::new("p1")))
        .await
        .unwrap();

    assert_eq!(result.migrated_count, 2);
    assert!(durable.contains(EntityType::Scene, "s1"));
    assert!(!durable.contains(EntityType::Scene, "s2"));
}

#[tokio::test]
async fn file_backed_round_trip() {
    let stores = TempStores::new();
    let state = populated_state(1);
    let engine = engine_with(stores.persistence.clone(), state.clone(), stores.backups.clone());

    let (_, migrated) = engine.migrate_all(None).await.unwrap();
    assert!(migrated.success);
    assert_eq!(migrated.migrated_count, 5);

    state.upsert(EntityType::World, entity_at("world-0", 3600));
    let result = engine.full_sync(None).await;
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.untracked.is_empty());

    let reloaded = stores
        .persistence
        .load(EntityType::World, "world-0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.updated_at(), entity_at("w", 3600).updated_at());
    assert_eq!(engine.list_backups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn untracked_durable_entities_are_reported_only() {
    let state = state_with(&[(EntityType::World, entity_at("w1", 0))]);
    let durable = durable_with(&[(EntityType::World, entity_at("legacy", 0))]);
    let engine = engine(durable.clone(), state.clone());

    let result = engine.full_sync(None).await;

    assert_eq!(result.untracked.len(), 1);
    assert_eq!(result.untracked[0].entity_id, "legacy");
    assert_eq!(state.collection(EntityType::World).len(), 1);
    assert!(durable.contains(EntityType::World, "legacy"));
}

#[tokio::test]
async fn orchestrator_is_usable_on_its_own() {
    let state = populated_state(1);
    let durable = Arc::new(MemoryPersistence::new());
    let backups = Arc::new(scenesync_engine::BackupManager::new(
        Arc::new(MemoryBackupStore::new()),
        state.clone(),
    ));
    let orchestrator = SyncOrchestrator::new(EngineConfig::default(), durable, state, backups);

    let backup_id = orchestrator.create_backup().await.unwrap();
    let result = orchestrator.full_sync(None).await;
    assert_eq!(result.synced_count, 5);

    let restored = orchestrator.restore_from_backup(&backup_id).await.unwrap();
    assert_eq!(restored.entities_restored, 5);
}
