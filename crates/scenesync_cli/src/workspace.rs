//! On-disk workspace layout shared by every command.

use scenesync_engine::{DataSyncEngine, EngineConfig};
use scenesync_store::{
    BasicValidator, EntityType, FileBackupStore, FilePersistence, MemoryStateStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// State, durable layer and backups of one workspace directory.
pub struct Workspace {
    state_path: PathBuf,
    /// In-memory collections loaded from `state.json`.
    pub state: Arc<MemoryStateStore>,
    /// Durable layer under `data/`.
    pub persistence: Arc<FilePersistence>,
    /// Backups under `backups/`.
    pub backups: Arc<FileBackupStore>,
}

impl Workspace {
    /// Opens a workspace, creating missing directories.
    pub fn open(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() && !path.is_dir() {
            return Err(format!("{:?} is not a directory", path).into());
        }
        let state_path = path.join("state.json");
        let state = MemoryStateStore::load(&state_path)?;
        debug!(entities = state.len(), "state loaded from {:?}", state_path);

        Ok(Self {
            state_path,
            state: Arc::new(state),
            persistence: Arc::new(FilePersistence::open(&path.join("data"))?),
            backups: Arc::new(FileBackupStore::open(&path.join("backups"))?),
        })
    }

    /// Builds an engine over this workspace.
    pub fn engine(&self, config: EngineConfig) -> DataSyncEngine {
        let validator = BasicValidator::new()
            .require(EntityType::World, "name")
            .require(EntityType::Character, "name");
        DataSyncEngine::new(
            config.without_sync_timer(),
            self.persistence.clone(),
            Arc::new(validator),
            self.state.clone(),
            self.backups.clone(),
        )
    }

    /// Writes the in-memory collections back to `state.json`.
    pub async fn save_state(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.state.save(&self.state_path).await?;
        debug!("state saved to {:?}", self.state_path);
        Ok(())
    }
}
