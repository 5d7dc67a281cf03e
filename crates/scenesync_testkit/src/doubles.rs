//! Persistence doubles for fault and timing tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use scenesync_store::{
    Backup, BackupInfo, BackupStore, Entity, EntityType, LayerResult, MemoryPersistence,
    PersistenceService, StoreError, StoreResult,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Wraps a [`MemoryPersistence`] and injects failures for chosen entities.
///
/// - `fail_writes_for`: the layer rejects writes of that entity
/// - `fail_loads_for`: loads of that entity return a transient error
/// - `panic_on`: any load of that entity type panics, taking down the
///   whole per-type task
#[derive(Default)]
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    write_failures: RwLock<HashSet<String>>,
    load_failures: RwLock<HashSet<String>>,
    panicking: RwLock<HashSet<EntityType>>,
}

impl FlakyPersistence {
    /// Creates an empty flaky layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &MemoryPersistence {
        &self.inner
    }

    /// Rejects writes of the entity with this id.
    pub fn fail_writes_for(&self, id: &str) {
        self.write_failures.write().insert(id.to_string());
    }

    /// Fails loads of the entity with this id.
    pub fn fail_loads_for(&self, id: &str) {
        self.load_failures.write().insert(id.to_string());
    }

    /// Panics on every load of this entity type.
    pub fn panic_on(&self, entity_type: EntityType) {
        self.panicking.write().insert(entity_type);
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        self.write_failures.write().clear();
        self.load_failures.write().clear();
        self.panicking.write().clear();
    }
}

#[async_trait]
impl PersistenceService for FlakyPersistence {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>> {
        if self.panicking.read().contains(&entity_type) {
            panic!("injected panic loading {entity_type}/{id}");
        }
        if self.load_failures.read().contains(id) {
            return Err(StoreError::unavailable(format!("injected load failure for {id}")));
        }
        self.inner.load(entity_type, id).await
    }

    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>> {
        if self.write_failures.read().contains(entity.id()) {
            return Ok(vec![LayerResult::failed("flaky", "injected write failure")]);
        }
        self.inner.save(entity_type, entity).await
    }

    async fn list_ids(&self, entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        self.inner.list_ids(entity_type).await
    }
}

/// Wraps a durable layer and blocks every load until the gate is opened.
///
/// Lets a test hold a sync cycle in flight.
pub struct GatedPersistence {
    inner: Arc<dyn PersistenceService>,
    open: watch::Sender<bool>,
    entered: Notify,
    waiting: AtomicUsize,
}

impl GatedPersistence {
    /// Wraps a layer with a closed gate.
    pub fn new(inner: Arc<dyn PersistenceService>) -> Self {
        let (open, _) = watch::channel(false);
        Self {
            inner,
            open,
            entered: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Waits until at least one load is blocked at the gate.
    pub async fn wait_until_entered(&self) {
        loop {
            let notified = self.entered.notified();
            if self.waiting.load(Ordering::Acquire) > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Opens the gate for current and future loads.
    pub fn open(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl PersistenceService for GatedPersistence {
    fn name(&self) -> &str {
        "gated"
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        self.inner.supports(entity_type)
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>> {
        let mut rx = self.open.subscribe();
        if !*rx.borrow() {
            self.waiting.fetch_add(1, Ordering::AcqRel);
            self.entered.notify_waiters();
            let opened = rx.wait_for(|open| *open).await.is_ok();
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            if !opened {
                return Err(StoreError::unavailable("gate dropped"));
            }
        }
        self.inner.load(entity_type, id).await
    }

    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>> {
        self.inner.save(entity_type, entity).await
    }

    async fn list_ids(&self, entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        self.inner.list_ids(entity_type).await
    }
}

/// A backup store whose writes and reads can be switched off.
#[derive(Default)]
pub struct BrokenBackupStore {
    inner: scenesync_store::MemoryBackupStore,
    fail_put: AtomicBool,
    fail_get: AtomicBool,
}

impl BrokenBackupStore {
    /// Creates a working store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `put` fail.
    pub fn fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    /// Makes `get` fail.
    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackupStore for BrokenBackupStore {
    async fn put(&self, backup: &Backup) -> StoreResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("backup volume offline"));
        }
        self.inner.put(backup).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Backup>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("backup volume offline"));
        }
        self.inner.get(id).await
    }

    async fn list(&self) -> StoreResult<Vec<BackupInfo>> {
        self.inner.list().await
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.inner.remove(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flaky_layer_injects_failures() {
        let flaky = FlakyPersistence::new();
        flaky.fail_writes_for("w2");
        flaky.fail_loads_for("w3");

        let ok = flaky.save(EntityType::World, &Entity::new("w1")).await.unwrap();
        assert!(ok[0].success);
        let rejected = flaky.save(EntityType::World, &Entity::new("w2")).await.unwrap();
        assert!(!rejected[0].success);
        assert!(flaky.load(EntityType::World, "w3").await.is_err());

        flaky.heal();
        assert!(flaky.load(EntityType::World, "w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gate_blocks_until_opened() {
        let inner = Arc::new(MemoryPersistence::new());
        inner.insert(EntityType::Shot, Entity::new("x1"));
        let gated = Arc::new(GatedPersistence::new(inner));

        let loader = {
            let gated = gated.clone();
            tokio::spawn(async move { gated.load(EntityType::Shot, "x1").await })
        };

        gated.wait_until_entered().await;
        assert!(!loader.is_finished());
        gated.open();

        let loaded = loader.await.unwrap().unwrap();
        assert_eq!(loaded.unwrap().id(), "x1");
    }

    #[tokio::test]
    async fn broken_backup_store() {
        let store = BrokenBackupStore::new();
        store.fail_put(true);
        let backup = Backup {
            id: "b1".into(),
            created_at: chrono::Utc::now(),
            snapshot: Default::default(),
        };
        assert!(store.put(&backup).await.is_err());
        store.fail_put(false);
        store.put(&backup).await.unwrap();
        assert!(store.get("b1").await.unwrap().is_some());
    }
}
