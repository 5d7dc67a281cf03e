//! # SceneSync Testkit
//!
//! Test utilities for SceneSync.
//!
//! This crate provides:
//! - Entity fixtures with deterministic timestamps
//! - Populated in-memory stores and temporary file-backed stores
//! - Persistence doubles that inject failures or hold calls in flight
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scenesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_fixtures() {
//!     let state = state_with(&[(EntityType::World, entity_at("w1", 0))]);
//!     let durable = durable_with(&[(EntityType::World, entity_at("w1", 10))]);
//!     // ... build an engine over them
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doubles;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::doubles::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use scenesync_store::EntityType;
}

pub use doubles::*;
pub use fixtures::*;
pub use generators::*;
