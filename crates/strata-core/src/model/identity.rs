use serde::{Deserialize, Serialize};

use super::entity::Entity;
use super::metadata::EntityMetadata;
use super::value::{Row, Value};

/// Ordered tuple of primary-key values of one entity instance
///
/// Two instances with equal identities denote the same stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity(Vec<Value>);

impl EntityIdentity {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl std::fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Value::to_plain_string).collect();
        write!(f, "{}", parts.join("_"))
    }
}

/// Derive the identity of an entity from its primary property values
///
/// Returns `None` when any primary value is missing or null, meaning the
/// entity has not been persisted yet.
pub fn identity_of(metadata: &EntityMetadata, entity: &Entity) -> Option<EntityIdentity> {
    let mut values = Vec::new();
    for column in metadata.primary_columns() {
        match entity.get(&column.property) {
            Some(value) if !value.is_null() => values.push(value.clone()),
            _ => return None,
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(EntityIdentity(values))
}

/// Derive the identity of a stored row (keyed by storage names)
pub fn identity_from_row(metadata: &EntityMetadata, row: &Row) -> Option<EntityIdentity> {
    let mut values = Vec::new();
    for column in metadata.primary_columns() {
        match row.get(&column.storage) {
            Some(value) if !value.is_null() => {
                values.push(value.clone().coerce(column.column_type))
            }
            _ => return None,
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(EntityIdentity(values))
}
