//! Property-based test generators using proptest.

use crate::fixtures::ts_millis;
use proptest::prelude::*;
use scenesync_protocol::Resolution;
use scenesync_store::{Collections, Entity, EntityType};

/// Strategy for entity types.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::ALL.to_vec())
}

/// Strategy for entity ids that are also valid file names.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for automatic resolutions.
pub fn auto_resolution_strategy() -> impl Strategy<Value = Resolution> {
    prop_oneof![
        Just(Resolution::LocalWins),
        Just(Resolution::DurableWins),
        Just(Resolution::Merge),
    ]
}

/// Strategy for an entity with a timestamp within a day of the fixture base
/// time and a few string fields.
pub fn entity_strategy() -> impl Strategy<Value = Entity> {
    (
        entity_id_strategy(),
        0i64..86_400_000,
        prop::collection::btree_map(
            "[a-z]{1,8}".prop_filter("reserved field", |f| f != "id"),
            "[a-zA-Z ]{0,12}",
            0..4,
        ),
    )
        .prop_map(|(id, millis, fields)| {
            let mut entity = Entity::new(id).with("updatedAt", ts_millis(millis));
            for (field, value) in fields {
                entity.set(field, value);
            }
            entity
        })
}

/// Strategy for in-memory collections with unique ids per type.
pub fn collections_strategy(max_per_type: usize) -> impl Strategy<Value = Collections> {
    prop::collection::btree_map(
        entity_type_strategy(),
        prop::collection::vec(entity_strategy(), 0..=max_per_type),
        0..=EntityType::ALL.len(),
    )
    .prop_map(|mut collections| {
        for entities in collections.values_mut() {
            let mut seen = std::collections::HashSet::new();
            entities.retain(|e| seen.insert(e.id().to_string()));
        }
        collections
    })
}
