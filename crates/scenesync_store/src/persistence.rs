//! Durable persistence contract.

use crate::entity::{Entity, EntityType};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Outcome of a write against one physical layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerResult {
    /// Name of the layer that handled the write.
    pub layer: String,
    /// Whether the layer accepted the write.
    pub success: bool,
    /// Error text when the layer rejected the write.
    pub error: Option<String>,
}

impl LayerResult {
    /// Creates a successful layer result.
    pub fn ok(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            success: true,
            error: None,
        }
    }

    /// Creates a failed layer result.
    pub fn failed(layer: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Returns true if at least one layer accepted the write.
pub fn any_layer_succeeded(results: &[LayerResult]) -> bool {
    results.iter().any(|r| r.success)
}

/// The durable layer, addressable by entity type and id.
///
/// # Invariants
///
/// - `load` never caches: every call reflects what is currently persisted
/// - `save` is insert-or-replace by id
/// - a write succeeded if at least one returned [`LayerResult`] is a success
///
/// # Implementors
///
/// - [`super::MemoryPersistence`] - For testing
/// - [`super::FilePersistence`] - One JSON file per entity
/// - [`LayeredPersistence`] - Fans writes out to several layers
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Returns a short name for logs and layer results.
    fn name(&self) -> &str;

    /// Returns false if this layer has no durable mapping for the type.
    fn supports(&self, _entity_type: EntityType) -> bool {
        true
    }

    /// Loads the durable version of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the stored record is malformed.
    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>>;

    /// Writes an entity durably.
    ///
    /// # Errors
    ///
    /// Returns an error only if the write could not be attempted at all.
    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>>;

    /// Lists every durable id of a type, if this layer can enumerate them.
    async fn list_ids(&self, _entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        Ok(None)
    }
}

/// A persistence service that writes to several layers.
///
/// Loads are served by the first layer that has the record. Saves go to
/// every layer; a layer that errors contributes a failed [`LayerResult`]
/// instead of failing the whole write.
pub struct LayeredPersistence {
    layers: Vec<Arc<dyn PersistenceService>>,
}

impl LayeredPersistence {
    /// Creates a layered service. The first layer is consulted first on load.
    pub fn new(layers: Vec<Arc<dyn PersistenceService>>) -> Self {
        Self { layers }
    }

    /// Returns the number of layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

#[async_trait]
impl PersistenceService for LayeredPersistence {
    fn name(&self) -> &str {
        "layered"
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        self.layers.iter().any(|l| l.supports(entity_type))
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>> {
        let mut last_error = None;
        for layer in self.layers.iter().filter(|l| l.supports(entity_type)) {
            match layer.load(entity_type, id).await {
                Ok(Some(entity)) => return Ok(Some(entity)),
                Ok(None) => {}
                Err(e) => {
                    warn!(layer = layer.name(), %entity_type, id, error = %e, "layer load failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>> {
        let mut results = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter().filter(|l| l.supports(entity_type)) {
            match layer.save(entity_type, entity).await {
                Ok(layer_results) => results.extend(layer_results),
                Err(e) => results.push(LayerResult::failed(layer.name(), e.to_string())),
            }
        }
        Ok(results)
    }

    async fn list_ids(&self, entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        let mut ids: Option<Vec<String>> = None;
        for layer in self.layers.iter().filter(|l| l.supports(entity_type)) {
            if let Some(layer_ids) = layer.list_ids(entity_type).await? {
                let merged = ids.get_or_insert_with(Vec::new);
                for id in layer_ids {
                    if !merged.contains(&id) {
                        merged.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}
