//! Error types for the sync and migration engine.

use scenesync_store::{EntityType, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during sync, migration, backup and restore.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A sync cycle is already running.
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Store error (persistence, state or backup).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Conflict construction or resolution failed.
    #[error("conflict error: {0}")]
    Conflict(#[from] scenesync_protocol::ConflictError),

    /// No layer accepted a write.
    #[error("write rejected by every layer for {entity_type}/{entity_id}")]
    WriteRejected {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        entity_id: String,
    },

    /// The entity type has no durable mapping.
    #[error("no durable mapping for entity type {0}")]
    Unsupported(EntityType),

    /// Creating the pre-migration backup failed.
    #[error("backup failed: {0}")]
    Backup(String),

    /// Restoring from a backup failed.
    #[error("rollback failed for backup {backup_id}: {message}")]
    Rollback {
        /// Backup that could not be restored.
        backup_id: String,
        /// Error message.
        message: String,
    },

    /// The backup does not exist.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// The migration id is unknown.
    #[error("migration not found: {0}")]
    MigrationNotFound(String),

    /// The conflict id is not in the conflict log.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// A spawned sub-task panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    /// Creates a write-rejected error.
    pub fn write_rejected(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self::WriteRejected {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_transient(),
            EngineError::WriteRejected { .. } => true,
            EngineError::TaskFailed(_) => true,
            EngineError::SyncInProgress => true,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed(err.to_string())
    }
}
