//! # SceneSync Store
//!
//! Entity model, collaborator contracts and storage implementations for
//! SceneSync.
//!
//! This crate is the leaf of the workspace. It defines what the engine talks
//! to, not how a sync cycle runs:
//!
//! - [`Entity`] / [`EntityType`] - opaque JSON records with typed accessors
//! - [`PersistenceService`] - the durable layer, addressable by type and id
//! - [`DataValidator`] - pass/fail + diagnostics oracle
//! - [`StateStore`] - the application's in-memory working copy
//! - [`BackupStore`] - immutable, id-addressed snapshots
//!
//! ## Available Implementations
//!
//! - [`MemoryPersistence`], [`MemoryStateStore`], [`MemoryBackupStore`] - For testing
//! - [`FilePersistence`], [`FileBackupStore`] - JSON files on disk
//! - [`LayeredPersistence`] - Writes to several layers at once
//! - [`BasicValidator`] - Rule-based validation
//!
//! ## Example
//!
//! ```rust
//! use scenesync_store::{Entity, EntityType, MemoryStateStore, StateStore};
//!
//! let state = MemoryStateStore::new();
//! state.upsert(EntityType::World, Entity::new("w1").with("name", "Eldoria"));
//! assert_eq!(state.collection(EntityType::World).len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod entity;
mod error;
mod file;
mod memory;
mod persistence;
mod state;
mod validator;

pub use backup::{Backup, BackupInfo, BackupStore, FileBackupStore, MemoryBackupStore};
pub use entity::{
    in_scope, parse_timestamp, Entity, EntityRef, EntityType, ProjectScope, CREATED_AT_FIELD,
    ID_FIELD, PROJECT_ID_FIELD, UPDATED_AT_FIELD,
};
pub use error::{StoreError, StoreResult};
pub use file::FilePersistence;
pub use memory::MemoryPersistence;
pub use persistence::{any_layer_succeeded, LayerResult, LayeredPersistence, PersistenceService};
pub use state::{Collections, MemoryStateStore, StateStore};
pub use validator::{BasicValidator, DataValidator, ValidationReport};
