//! Test fixtures and store helpers.
//!
//! Provides entity builders with deterministic timestamps and
//! pre-populated in-memory and file-backed stores.

use chrono::{DateTime, Duration, TimeZone, Utc};
use scenesync_store::{
    Entity, EntityType, FileBackupStore, FilePersistence, MemoryPersistence, MemoryStateStore,
    StateStore,
};
use std::sync::Arc;
use tempfile::TempDir;

/// The instant every fixture timestamp is relative to (2024-01-01T00:00:00Z).
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time")
}

/// RFC 3339 timestamp `millis` milliseconds after [`base_time`].
pub fn ts_millis(millis: i64) -> String {
    (base_time() + Duration::milliseconds(millis)).to_rfc3339()
}

/// RFC 3339 timestamp `secs` seconds after [`base_time`].
pub fn ts(secs: i64) -> String {
    ts_millis(secs * 1000)
}

/// An entity whose `updatedAt` is `secs` seconds after [`base_time`].
pub fn entity_at(id: &str, secs: i64) -> Entity {
    Entity::new(id).with("updatedAt", ts(secs))
}

/// An entity belonging to a project.
pub fn project_entity(id: &str, project_id: &str, secs: i64) -> Entity {
    entity_at(id, secs).with("projectId", project_id)
}

/// A named entity, with `updatedAt` at [`base_time`].
pub fn named(id: &str, name: &str) -> Entity {
    entity_at(id, 0).with("name", name)
}

/// A state store holding the given entities, in order.
pub fn state_with(entities: &[(EntityType, Entity)]) -> Arc<MemoryStateStore> {
    let state = Arc::new(MemoryStateStore::new());
    for (entity_type, entity) in entities {
        state.upsert(*entity_type, entity.clone());
    }
    state
}

/// A state store with `per_type` named entities of every type.
///
/// Ids are `<type>-<n>`, e.g. `scene-2`.
pub fn populated_state(per_type: usize) -> Arc<MemoryStateStore> {
    let state = Arc::new(MemoryStateStore::new());
    for entity_type in EntityType::ALL {
        let entities = (0..per_type)
            .map(|n| {
                let id = format!("{entity_type}-{n}");
                named(&id, &format!("{} {n}", entity_type.collection_name()))
            })
            .collect();
        state.restore(entity_type, entities);
    }
    state
}

/// A durable layer holding the given entities.
pub fn durable_with(entities: &[(EntityType, Entity)]) -> Arc<MemoryPersistence> {
    let durable = Arc::new(MemoryPersistence::new());
    for (entity_type, entity) in entities {
        durable.insert(*entity_type, entity.clone());
    }
    durable
}

/// File-backed durable layer and backup store in a temporary directory.
pub struct TempStores {
    /// Durable layer under `<tmp>/data`.
    pub persistence: Arc<FilePersistence>,
    /// Backup store under `<tmp>/backups`.
    pub backups: Arc<FileBackupStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    pub dir: TempDir,
}

impl TempStores {
    /// Creates both stores in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let persistence = FilePersistence::open(&dir.path().join("data"))
            .expect("Failed to open file persistence");
        let backups = FileBackupStore::open(&dir.path().join("backups"))
            .expect("Failed to open backup store");
        Self {
            persistence: Arc::new(persistence),
            backups: Arc::new(backups),
            dir,
        }
    }
}

impl Default for TempStores {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_relative_to_base() {
        let entity = entity_at("w1", 5);
        let diff = entity.updated_at().unwrap() - base_time();
        assert_eq!(diff.num_milliseconds(), 5000);
        assert_eq!(ts_millis(0), ts(0));
    }

    #[test]
    fn populated_state_has_every_type() {
        let state = populated_state(3);
        assert_eq!(state.len(), 15);
        assert_eq!(state.collection(EntityType::Scene)[2].id(), "scene-2");
    }

    #[test]
    fn temp_stores_live_under_one_dir() {
        let stores = TempStores::new();
        assert!(stores.persistence.root().starts_with(stores.dir.path()));
    }
}
