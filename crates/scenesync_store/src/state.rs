//! The in-memory state provider.
//!
//! The application owns its working copy of every entity collection. The
//! engine reads collections from it and writes back only through
//! [`StateStore::restore`].

use crate::entity::{Entity, EntityType};
use crate::error::StoreResult;
use crate::file::write_json_atomic;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

/// Per-type entity collections, as held in memory or inside a backup.
pub type Collections = BTreeMap<EntityType, Vec<Entity>>;

/// Read access to current collections plus insert-or-replace writes.
pub trait StateStore: Send + Sync {
    /// Returns the current collection of a type, in collection order.
    fn collection(&self, entity_type: EntityType) -> Vec<Entity>;

    /// Inserts or replaces entities by id.
    fn restore(&self, entity_type: EntityType, entities: Vec<Entity>);

    /// Returns every collection.
    fn snapshot(&self) -> Collections {
        EntityType::ALL
            .into_iter()
            .map(|t| (t, self.collection(t)))
            .collect()
    }
}

/// An ordered, thread-safe in-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    collections: RwLock<Collections>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with collections.
    #[must_use]
    pub fn with_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    /// Appends or replaces one entity.
    pub fn upsert(&self, entity_type: EntityType, entity: Entity) {
        self.restore(entity_type, vec![entity]);
    }

    /// Removes an entity by id. Returns true if it existed.
    pub fn remove(&self, entity_type: EntityType, id: &str) -> bool {
        let mut collections = self.collections.write();
        match collections.get_mut(&entity_type) {
            Some(entities) => {
                let before = entities.len();
                entities.retain(|e| e.id() != id);
                entities.len() != before
            }
            None => false,
        }
    }

    /// Returns the total number of entities across all types.
    pub fn len(&self) -> usize {
        self.collections.read().values().map(Vec::len).sum()
    }

    /// Returns true if no entity is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads a store from a JSON file, or returns an empty one if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> StoreResult<Self> {
        match std::fs::read(path) {
            Ok(data) => Ok(Self::with_collections(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the store to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> StoreResult<()> {
        let snapshot = self.collections.read().clone();
        write_json_atomic(path, &snapshot).await
    }
}

impl StateStore for MemoryStateStore {
    fn collection(&self, entity_type: EntityType) -> Vec<Entity> {
        self.collections
            .read()
            .get(&entity_type)
            .cloned()
            .unwrap_or_default()
    }

    fn restore(&self, entity_type: EntityType, entities: Vec<Entity>) {
        let mut collections = self.collections.write();
        let collection = collections.entry(entity_type).or_default();
        for entity in entities {
            match collection.iter_mut().find(|e| e.id() == entity.id()) {
                Some(existing) => *existing = entity,
                None => collection.push(entity),
            }
        }
    }
}
