//! Conflict records.

use crate::error::{ConflictError, ConflictResult};
use chrono::{DateTime, Utc};
use scenesync_store::{Entity, EntityRef, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the two versions diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// Both versions exist and were modified independently.
    Modified,
    /// One side deleted the entity.
    Deleted,
    /// Both sides created the entity independently.
    Created,
}

/// Which version to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Keep the in-memory version.
    LocalWins,
    /// Keep the durable version.
    DurableWins,
    /// Field-wise merge of both versions.
    Merge,
    /// Use a caller-supplied payload.
    Manual,
}

impl Resolution {
    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LocalWins => "local-wins",
            Resolution::DurableWins => "durable-wins",
            Resolution::Merge => "merge",
            Resolution::Manual => "manual",
        }
    }

    /// Returns true if the resolution can be computed without caller input.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Resolution::Manual)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-wins" => Ok(Resolution::LocalWins),
            "durable-wins" => Ok(Resolution::DurableWins),
            "merge" => Ok(Resolution::Merge),
            "manual" => Ok(Resolution::Manual),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// A detected divergence between the local and durable versions of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Unique id of this conflict record.
    pub id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id, identical in both versions.
    pub entity_id: String,
    /// The in-memory version.
    pub local_version: Entity,
    /// The durable version.
    pub durable_version: Entity,
    /// Kind of divergence.
    pub conflict_type: ConflictType,
    /// Resolution applied or proposed.
    pub resolution: Resolution,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    /// Creates a conflict between two versions of the same entity.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::IdMismatch`] if the versions have different ids.
    pub fn new(
        entity_type: EntityType,
        local_version: Entity,
        durable_version: Entity,
        conflict_type: ConflictType,
        resolution: Resolution,
        detected_at: DateTime<Utc>,
    ) -> ConflictResult<Self> {
        if local_version.id() != durable_version.id() {
            return Err(ConflictError::IdMismatch {
                local: local_version.id().to_string(),
                durable: durable_version.id().to_string(),
            });
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id: local_version.id().to_string(),
            local_version,
            durable_version,
            conflict_type,
            resolution,
            detected_at,
        })
    }

    /// Returns a reference to the conflicting entity.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id.clone())
    }

    /// Returns true if the conflict was detected before `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.detected_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_ids() {
        let err = SyncConflict::new(
            EntityType::World,
            Entity::new("w1"),
            Entity::new("w2"),
            ConflictType::Modified,
            Resolution::LocalWins,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConflictError::IdMismatch {
                local: "w1".into(),
                durable: "w2".into()
            }
        );
    }

    #[test]
    fn new_assigns_unique_ids() {
        let make = || {
            SyncConflict::new(
                EntityType::Scene,
                Entity::new("s1"),
                Entity::new("s1"),
                ConflictType::Modified,
                Resolution::LocalWins,
                Utc::now(),
            )
            .unwrap()
        };
        let (a, b) = (make(), make());
        assert_ne!(a.id, b.id);
        assert_eq!(a.entity_id, "s1");
        assert_eq!(a.entity_ref().to_string(), "scene/s1");
    }

    #[test]
    fn resolution_names() {
        for r in [
            Resolution::LocalWins,
            Resolution::DurableWins,
            Resolution::Merge,
            Resolution::Manual,
        ] {
            assert_eq!(r.as_str().parse::<Resolution>().unwrap(), r);
        }
        assert!("theirs".parse::<Resolution>().is_err());
        assert!(!Resolution::Manual.is_automatic());
        assert_eq!(
            serde_json::to_string(&Resolution::DurableWins).unwrap(),
            "\"durable-wins\""
        );
    }
}
