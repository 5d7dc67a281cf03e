//! Error types for store operations.

use crate::entity::EntityType;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in persistence, state and backup stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record is structurally invalid (for example, missing its id).
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The entity type has no durable mapping in this layer.
    #[error("no durable mapping for entity type {0}")]
    Unsupported(EntityType),

    /// A backup with this id already exists; backups are immutable.
    #[error("backup already exists: {0}")]
    BackupExists(String),

    /// The requested backup does not exist.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// The store rejected the operation for another reason.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a malformed-record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Unavailable(_))
    }
}
