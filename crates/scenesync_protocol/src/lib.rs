//! # SceneSync Protocol
//!
//! Conflict detection and resolution for SceneSync.
//!
//! This crate provides:
//! - [`SyncConflict`] records with [`ConflictType`] and [`Resolution`]
//! - [`ConflictDetector`] for timestamp-based divergence detection
//! - [`ConflictResolver`] for local-wins, durable-wins, merge and manual resolution
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod detector;
mod error;
mod resolver;

pub use conflict::{ConflictType, Resolution, SyncConflict};
pub use detector::{ConflictDetector, DEFAULT_CONFLICT_THRESHOLD};
pub use error::{ConflictError, ConflictResult};
pub use resolver::{merge, ConflictResolver};
