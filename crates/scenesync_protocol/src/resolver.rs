//! Turning a conflict into the version to persist.

use crate::conflict::{Resolution, SyncConflict};
use crate::error::{ConflictError, ConflictResult};
use chrono::{DateTime, Utc};
use scenesync_store::{parse_timestamp, Entity, ID_FIELD};
use serde_json::Value;

/// Produces the entity version to persist for a conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves a conflict using the current time for merges.
    ///
    /// # Errors
    ///
    /// Returns an error for a manual resolution without a payload, or with a
    /// payload whose id differs from the conflicting entity.
    pub fn resolve(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
        manual_payload: Option<Entity>,
    ) -> ConflictResult<Entity> {
        self.resolve_at(conflict, resolution, manual_payload, Utc::now())
    }

    /// Resolves a conflict; `now` becomes the merged version's `updatedAt`.
    pub fn resolve_at(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
        manual_payload: Option<Entity>,
        now: DateTime<Utc>,
    ) -> ConflictResult<Entity> {
        match resolution {
            Resolution::LocalWins => Ok(conflict.local_version.clone()),
            Resolution::DurableWins => Ok(conflict.durable_version.clone()),
            Resolution::Merge => Ok(merge(
                &conflict.local_version,
                &conflict.durable_version,
                now,
            )),
            Resolution::Manual => {
                let payload = manual_payload.ok_or(ConflictError::MissingManualPayload)?;
                if payload.id() != conflict.entity_id {
                    return Err(ConflictError::IdMismatch {
                        local: conflict.entity_id.clone(),
                        durable: payload.id().to_string(),
                    });
                }
                Ok(payload)
            }
        }
    }
}

/// Field-wise merge starting from the local version.
///
/// A durable field overwrites the local one when the local field is absent
/// or the durable value is newer. Two timestamp values compare
/// chronologically; otherwise the durable value counts as newer.
pub fn merge(local: &Entity, durable: &Entity, now: DateTime<Utc>) -> Entity {
    let mut merged = local.clone();
    for (field, durable_value) in durable.fields() {
        if field == ID_FIELD {
            continue;
        }
        let take_durable = match local.get(field) {
            None => true,
            Some(local_value) => durable_is_newer(local_value, durable_value),
        };
        if take_durable {
            merged.set(field.clone(), durable_value.clone());
        }
    }
    merged.touch(now);
    merged
}

fn durable_is_newer(local: &Value, durable: &Value) -> bool {
    match (parse_timestamp(local), parse_timestamp(durable)) {
        (Some(l), Some(d)) => d > l,
        _ => true,
    }
}
