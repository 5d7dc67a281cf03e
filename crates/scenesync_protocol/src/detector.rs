//! Divergence detection between local and durable versions.

use crate::conflict::{ConflictType, Resolution, SyncConflict};
use chrono::Utc;
use scenesync_store::{Entity, EntityType};
use std::time::Duration;

/// Default divergence threshold.
pub const DEFAULT_CONFLICT_THRESHOLD: Duration = Duration::from_millis(5000);

/// Decides whether two versions of one entity diverge meaningfully.
///
/// Versions are compared by timestamp (`updatedAt`, falling back to
/// `createdAt`). Differences up to the threshold are save-order jitter and
/// are not conflicts. If either side lacks a parsable timestamp, or the ids
/// differ, nothing can be adjudicated and no conflict is reported.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    threshold: Duration,
    default_resolution: Resolution,
}

impl ConflictDetector {
    /// Creates a detector with the given threshold.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            default_resolution: Resolution::LocalWins,
        }
    }

    /// Sets the resolution recorded on detected conflicts.
    #[must_use]
    pub fn with_default_resolution(mut self, resolution: Resolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    /// Returns the threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Compares two versions and returns a conflict if they diverge.
    pub fn detect(
        &self,
        local: &Entity,
        durable: &Entity,
        entity_type: EntityType,
    ) -> Option<SyncConflict> {
        let local_ts = local.timestamp()?;
        let durable_ts = durable.timestamp()?;

        let diff_ms = (local_ts - durable_ts).num_milliseconds().unsigned_abs();
        if u128::from(diff_ms) <= self.threshold.as_millis() {
            return None;
        }

        SyncConflict::new(
            entity_type,
            local.clone(),
            durable.clone(),
            ConflictType::Modified,
            self.default_resolution,
            Utc::now(),
        )
        .ok()
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_THRESHOLD)
    }
}
