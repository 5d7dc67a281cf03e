//! Validation contract consulted before migrating an entity.

use crate::entity::{Entity, EntityType, CREATED_AT_FIELD, UPDATED_AT_FIELD};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of validating one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the entity may be persisted.
    pub is_valid: bool,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Non-blocking problems.
    pub warnings: Vec<String>,
    /// Quality score between 0 and 100.
    pub score: f64,
}

impl ValidationReport {
    /// Builds a report from errors and warnings.
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        let penalty = 25.0 * errors.len() as f64 + 5.0 * warnings.len() as f64;
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            score: (100.0 - penalty).max(0.0),
        }
    }

    /// A report with no findings.
    pub fn valid() -> Self {
        Self::from_findings(Vec::new(), Vec::new())
    }
}

/// Pass/fail oracle with diagnostics.
#[async_trait]
pub trait DataValidator: Send + Sync {
    /// Validates an entity of the given type.
    async fn validate(&self, entity_type: EntityType, entity: &Entity) -> ValidationReport;
}

/// A rule-based validator.
///
/// - the id must be non-empty
/// - timestamps, when present, must be RFC 3339 strings
/// - required fields per entity type must be present and non-null
/// - a missing timestamp is only a warning
#[derive(Debug, Clone, Default)]
pub struct BasicValidator {
    required: HashMap<EntityType, Vec<String>>,
}

impl BasicValidator {
    /// Creates a validator with no required fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a field on every entity of the given type.
    #[must_use]
    pub fn require(mut self, entity_type: EntityType, field: impl Into<String>) -> Self {
        self.required.entry(entity_type).or_default().push(field.into());
        self
    }

    /// Runs the rules synchronously.
    pub fn check(&self, entity_type: EntityType, entity: &Entity) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if entity.id().trim().is_empty() {
            errors.push("id must not be empty".to_string());
        }

        for field in [UPDATED_AT_FIELD, CREATED_AT_FIELD] {
            match entity.get(field) {
                None | Some(Value::Null) => {}
                Some(value) if crate::entity::parse_timestamp(value).is_none() => {
                    errors.push(format!("{field} is not a valid timestamp"));
                }
                Some(_) => {}
            }
        }
        if entity.timestamp().is_none() && !errors.iter().any(|e| e.contains("timestamp")) {
            warnings.push("entity has no timestamp".to_string());
        }

        if let Some(fields) = self.required.get(&entity_type) {
            for field in fields {
                if matches!(entity.get(field), None | Some(Value::Null)) {
                    errors.push(format!("{entity_type} is missing required field {field}"));
                }
            }
        }

        ValidationReport::from_findings(errors, warnings)
    }
}

#[async_trait]
impl DataValidator for BasicValidator {
    async fn validate(&self, entity_type: EntityType, entity: &Entity) -> ValidationReport {
        self.check(entity_type, entity)
    }
}
