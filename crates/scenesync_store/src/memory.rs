//! In-memory persistence for testing.

use crate::entity::{Entity, EntityType};
use crate::error::{StoreError, StoreResult};
use crate::persistence::{LayerResult, PersistenceService};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory durable layer.
///
/// Suitable for unit and integration tests. Writes can be made to fail and
/// entity types can be marked as having no durable mapping.
///
/// # Example
///
/// ```rust
/// use scenesync_store::{Entity, EntityType, MemoryPersistence};
///
/// let store = MemoryPersistence::new();
/// store.insert(EntityType::World, Entity::new("w1"));
/// assert!(store.contains(EntityType::World, "w1"));
/// ```
#[derive(Debug)]
pub struct MemoryPersistence {
    name: String,
    records: RwLock<BTreeMap<(EntityType, String), Entity>>,
    unsupported: RwLock<HashSet<EntityType>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryPersistence {
    /// Creates an empty store named `memory`.
    #[must_use]
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Creates an empty store with the given layer name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            unsupported: RwLock::new(HashSet::new()),
            fail_writes: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// Marks entity types as having no durable mapping.
    #[must_use]
    pub fn with_unsupported(self, types: &[EntityType]) -> Self {
        self.unsupported.write().extend(types.iter().copied());
        self
    }

    /// Makes every subsequent write be rejected by this layer.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seeds a record without counting it as a write.
    pub fn insert(&self, entity_type: EntityType, entity: Entity) {
        self.records
            .write()
            .insert((entity_type, entity.id().to_string()), entity);
    }

    /// Returns a stored record.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Entity> {
        self.records
            .read()
            .get(&(entity_type, id.to_string()))
            .cloned()
    }

    /// Returns true if a record exists.
    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.records
            .read()
            .contains_key(&(entity_type, id.to_string()))
    }

    /// Returns the number of stored records of a type.
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.records
            .read()
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .count()
    }

    /// Returns the number of accepted writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistence {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        !self.unsupported.read().contains(&entity_type)
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>> {
        if !self.supports(entity_type) {
            return Err(StoreError::Unsupported(entity_type));
        }
        Ok(self.get(entity_type, id))
    }

    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>> {
        if !self.supports(entity_type) {
            return Err(StoreError::Unsupported(entity_type));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Ok(vec![LayerResult::failed(&self.name, "write rejected")]);
        }
        self.insert(entity_type, entity.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(vec![LayerResult::ok(&self.name)])
    }

    async fn list_ids(&self, entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        let ids = self
            .records
            .read()
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .map(|(_, id)| id.clone())
            .collect();
        Ok(Some(ids))
    }
}
