//! # SceneSync Engine
//!
//! Sync, migration and backup orchestration for SceneSync.
//!
//! This crate provides:
//! - Sync cycles that reconcile in-memory collections with the durable layer
//! - Conflict logging and resolution
//! - Timer and project-change triggered sync
//! - Migration of in-memory-only data with backup and rollback
//! - Migration history, retry and statistics
//!
//! ## Architecture
//!
//! A sync cycle fans out one task per entity type. Each task writes entities
//! that are missing durably and auto-resolves entities whose timestamps
//! diverge by more than the conflict threshold. Nothing is ever read back
//! from the durable layer into memory except through conflict resolution.
//!
//! A migration takes a backup first, then validates, checks and writes every
//! entity. Any error rolls the in-memory state back to the backup.
//!
//! ## Key Invariants
//!
//! - At most one sync cycle runs at a time
//! - Every migration attempt has a backup before its first write
//! - Per-entity failures never abort a batch
//! - The durable layer is re-queried on every existence check

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod engine;
mod error;
mod migration;
mod orchestrator;
mod scheduler;
mod task;

pub use backup::{BackupManager, RestoreStats};
pub use config::EngineConfig;
pub use engine::DataSyncEngine;
pub use error::{EngineError, EngineResult};
pub use migration::{
    MigrationError, MigrationOrchestrator, MigrationRecord, MigrationResult, MigrationState,
    MigrationStats, UNKNOWN_ENTITY_ID,
};
pub use orchestrator::{SyncOrchestrator, SyncResult, SyncStats, SyncStatus};
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncTrigger};
pub use task::{EntitySyncOutcome, EntitySyncTask};
