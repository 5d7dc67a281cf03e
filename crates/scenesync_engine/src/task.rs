//! Per-entity-type synchronization.

use crate::error::{EngineError, EngineResult};
use scenesync_protocol::{ConflictDetector, ConflictResolver, Resolution, SyncConflict};
use scenesync_store::{any_layer_succeeded, Entity, EntityRef, EntityType, PersistenceService};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of synchronizing one entity-type collection.
#[derive(Debug, Clone, Default)]
pub struct EntitySyncOutcome {
    /// Entities written durably because they were missing there.
    pub synced_count: u64,
    /// Conflicts detected (and auto-resolved) in this collection.
    pub conflicts: Vec<SyncConflict>,
    /// Per-entity failures; they never abort the rest of the collection.
    pub errors: Vec<String>,
    /// Entities that exist durably but not in memory.
    pub untracked: Vec<EntityRef>,
    /// Resolved versions that differ from the local one and belong back in
    /// memory. Empty under local-wins.
    pub resolved: Vec<Entity>,
}

/// Synchronizes one entity-type collection with the durable layer.
///
/// For every local entity, in collection order:
/// - missing durably: the local version is written
/// - present and consistent: nothing happens
/// - present and divergent: the conflict is recorded and the automatic
///   resolution is written
#[derive(Clone)]
pub struct EntitySyncTask {
    persistence: Arc<dyn PersistenceService>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    auto_resolution: Resolution,
}

impl EntitySyncTask {
    /// Creates a task with local-wins auto resolution.
    pub fn new(persistence: Arc<dyn PersistenceService>, detector: ConflictDetector) -> Self {
        Self {
            persistence,
            detector,
            resolver: ConflictResolver::new(),
            auto_resolution: Resolution::LocalWins,
        }
    }

    /// Sets the resolution applied to detected conflicts.
    #[must_use]
    pub fn with_auto_resolution(mut self, resolution: Resolution) -> Self {
        if resolution.is_automatic() {
            self.auto_resolution = resolution;
        }
        self
    }

    /// Synchronizes a local collection.
    ///
    /// When `report_untracked` is set and the durable layer can enumerate
    /// its ids, durable-only entities are reported but left untouched.
    pub async fn sync(
        &self,
        entity_type: EntityType,
        local: Vec<Entity>,
        report_untracked: bool,
    ) -> EngineResult<EntitySyncOutcome> {
        let mut outcome = EntitySyncOutcome::default();

        if !self.persistence.supports(entity_type) {
            debug!(%entity_type, "no durable mapping, skipping collection");
            return Ok(outcome);
        }

        for entity in &local {
            if let Err(e) = self.sync_entity(entity_type, entity, &mut outcome).await {
                warn!(%entity_type, id = entity.id(), error = %e, "entity sync failed");
                outcome
                    .errors
                    .push(format!("{}/{}: {}", entity_type, entity.id(), e));
            }
        }

        if report_untracked {
            self.collect_untracked(entity_type, &local, &mut outcome).await;
        }

        debug!(
            %entity_type,
            synced = outcome.synced_count,
            conflicts = outcome.conflicts.len(),
            errors = outcome.errors.len(),
            "collection synced"
        );
        Ok(outcome)
    }

    async fn sync_entity(
        &self,
        entity_type: EntityType,
        local: &Entity,
        outcome: &mut EntitySyncOutcome,
    ) -> EngineResult<()> {
        let durable = self.persistence.load(entity_type, local.id()).await?;

        let Some(durable) = durable else {
            self.write(entity_type, local).await?;
            outcome.synced_count += 1;
            return Ok(());
        };

        let Some(mut conflict) = self.detector.detect(local, &durable, entity_type) else {
            return Ok(());
        };

        conflict.resolution = self.auto_resolution;
        let resolved = self.resolver.resolve(&conflict, self.auto_resolution, None)?;
        debug!(
            %entity_type,
            id = local.id(),
            resolution = %self.auto_resolution,
            "conflict detected"
        );
        outcome.conflicts.push(conflict);
        self.write(entity_type, &resolved).await?;
        if self.auto_resolution != Resolution::LocalWins {
            outcome.resolved.push(resolved);
        }
        Ok(())
    }

    async fn write(&self, entity_type: EntityType, entity: &Entity) -> EngineResult<()> {
        let results = self.persistence.save(entity_type, entity).await?;
        if any_layer_succeeded(&results) {
            Ok(())
        } else {
            Err(EngineError::write_rejected(entity_type, entity.id()))
        }
    }

    async fn collect_untracked(
        &self,
        entity_type: EntityType,
        local: &[Entity],
        outcome: &mut EntitySyncOutcome,
    ) {
        let durable_ids = match self.persistence.list_ids(entity_type).await {
            Ok(Some(ids)) => ids,
            Ok(None) => return,
            Err(e) => {
                warn!(%entity_type, error = %e, "could not enumerate durable ids");
                return;
            }
        };

        let local_ids: HashSet<&str> = local.iter().map(Entity::id).collect();
        for id in durable_ids {
            if !local_ids.contains(id.as_str()) {
                warn!(%entity_type, id = %id, "entity exists durably but not in memory");
                outcome.untracked.push(EntityRef::new(entity_type, id));
            }
        }
    }
}
