//! File-based durable layer.

use crate::entity::{Entity, EntityType};
use crate::error::{StoreError, StoreResult};
use crate::persistence::{LayerResult, PersistenceService};
use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A durable layer storing one JSON file per entity.
///
/// Layout: `<root>/<entity_type>/<id>.json`.
///
/// # Durability
///
/// Each write goes to a temporary sibling file which is then renamed over
/// the target, so readers never observe a partially written record.
///
/// # Example
///
/// ```no_run
/// use scenesync_store::FilePersistence;
/// use std::path::Path;
///
/// let store = FilePersistence::open(Path::new("project/durable")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    /// Opens a file layer rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, entity_type: EntityType) -> PathBuf {
        self.root.join(entity_type.as_str())
    }

    fn record_path(&self, entity_type: EntityType, id: &str) -> StoreResult<PathBuf> {
        validate_file_id(id)?;
        Ok(self.type_dir(entity_type).join(format!("{id}.json")))
    }
}

/// Rejects ids that would escape their directory.
pub(crate) fn validate_file_id(id: &str) -> StoreResult<()> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.contains('\0')
    {
        return Err(StoreError::malformed(format!("invalid record id: {id:?}")));
    }
    Ok(())
}

/// Writes a value as pretty JSON via a temp file and rename.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads a JSON file, returning `None` if it does not exist.
pub(crate) async fn read_json_opt(path: &Path) -> StoreResult<Option<serde_json::Value>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lists the stems of `*.json` files in a directory.
pub(crate) async fn list_json_stems(dir: &Path) -> StoreResult<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stems = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[async_trait]
impl PersistenceService for FilePersistence {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Entity>> {
        let path = self.record_path(entity_type, id)?;
        match read_json_opt(&path).await? {
            Some(value) => {
                let entity = Entity::from_value(value)?;
                if entity.id() != id {
                    return Err(StoreError::malformed(format!(
                        "record {} holds id {}",
                        path.display(),
                        entity.id()
                    )));
                }
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, entity_type: EntityType, entity: &Entity) -> StoreResult<Vec<LayerResult>> {
        let path = self.record_path(entity_type, entity.id())?;
        match write_json_atomic(&path, entity).await {
            Ok(()) => Ok(vec![LayerResult::ok(self.name())]),
            Err(e) => Ok(vec![LayerResult::failed(self.name(), e.to_string())]),
        }
    }

    async fn list_ids(&self, entity_type: EntityType) -> StoreResult<Option<Vec<String>>> {
        Ok(Some(list_json_stems(&self.type_dir(entity_type)).await?))
    }
}
