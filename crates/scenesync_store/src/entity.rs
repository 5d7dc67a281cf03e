//! Syncable entity model.
//!
//! Entities are opaque JSON objects. The engine only relies on three
//! fields (`id`, `updatedAt`, `createdAt`); everything else is payload that
//! is passed through unchanged.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Field holding the entity identifier.
pub const ID_FIELD: &str = "id";
/// Field holding the last modification time (RFC 3339).
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Field holding the creation time (RFC 3339).
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field holding the owning project id.
pub const PROJECT_ID_FIELD: &str = "projectId";

/// The kinds of entity mirrored between the in-memory state and the durable layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A story world.
    World,
    /// A character.
    Character,
    /// A sequence of scenes.
    Sequence,
    /// A scene.
    Scene,
    /// A single shot.
    Shot,
}

impl EntityType {
    /// Every entity type, in fan-out order.
    pub const ALL: [EntityType; 5] = [
        EntityType::World,
        EntityType::Character,
        EntityType::Sequence,
        EntityType::Scene,
        EntityType::Shot,
    ];

    /// Returns the singular name used in storage paths and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::World => "world",
            EntityType::Character => "character",
            EntityType::Sequence => "sequence",
            EntityType::Scene => "scene",
            EntityType::Shot => "shot",
        }
    }

    /// Returns the plural collection name.
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityType::World => "worlds",
            EntityType::Character => "characters",
            EntityType::Sequence => "sequences",
            EntityType::Scene => "scenes",
            EntityType::Shot => "shots",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.collection_name() == s)
            .ok_or_else(|| StoreError::malformed(format!("unknown entity type: {s}")))
    }
}

/// Parses a JSON value as a point in time.
///
/// Only RFC 3339 strings are accepted; numbers are not treated as
/// timestamps because plain numeric fields are common in payloads.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// A syncable record: a JSON object with an `id` and optional timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    /// Creates an entity with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self(fields)
    }

    /// Wraps a JSON value, which must be an object with a string `id`.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(fields) => Self::from_map(fields),
            other => Err(StoreError::malformed(format!(
                "expected JSON object, got {other}"
            ))),
        }
    }

    /// Wraps a JSON map, which must contain a string `id`.
    pub fn from_map(fields: Map<String, Value>) -> StoreResult<Self> {
        match fields.get(ID_FIELD) {
            Some(Value::String(_)) => Ok(Self(fields)),
            _ => Err(StoreError::malformed("entity has no string id")),
        }
    }

    /// Returns the entity id.
    pub fn id(&self) -> &str {
        self.0.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default()
    }

    /// Returns the parsed `updatedAt` field.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.0.get(UPDATED_AT_FIELD).and_then(parse_timestamp)
    }

    /// Returns the parsed `createdAt` field.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.0.get(CREATED_AT_FIELD).and_then(parse_timestamp)
    }

    /// Returns `updatedAt`, falling back to `createdAt`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at().or_else(|| self.created_at())
    }

    /// Returns the owning project id, if any.
    pub fn project_id(&self) -> Option<&str> {
        self.0.get(PROJECT_ID_FIELD).and_then(Value::as_str)
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value. The id field cannot be changed this way.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        if field == ID_FIELD {
            return;
        }
        self.0.insert(field, value.into());
    }

    /// Sets `updatedAt` to the given time.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.0
            .insert(UPDATED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the entity, returning its fields.
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// A reference to one entity: its type and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Restricts a sync or migration to one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectScope {
    /// The project id entities must belong to.
    pub project_id: String,
}

impl ProjectScope {
    /// Creates a new scope.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    /// Returns true if the entity belongs to this project.
    ///
    /// Entities without a `projectId` are global and always in scope.
    pub fn contains(&self, entity: &Entity) -> bool {
        entity
            .project_id()
            .map_or(true, |project| project == self.project_id)
    }
}

/// Returns true if the entity is in the optional scope.
pub fn in_scope(scope: Option<&ProjectScope>, entity: &Entity) -> bool {
    scope.map_or(true, |s| s.contains(entity))
}
