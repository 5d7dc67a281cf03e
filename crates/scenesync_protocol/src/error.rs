//! Error types for conflict handling.

use thiserror::Error;

/// Result type for conflict operations.
pub type ConflictResult<T> = Result<T, ConflictError>;

/// Errors raised while building or resolving a conflict.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// The two versions do not describe the same entity.
    #[error("entity id mismatch: local={local}, durable={durable}")]
    IdMismatch {
        /// Id of the local version.
        local: String,
        /// Id of the durable version.
        durable: String,
    },

    /// Manual resolution was requested without a payload.
    #[error("manual resolution requires a payload")]
    MissingManualPayload,
}
