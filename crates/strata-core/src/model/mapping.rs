//! Conversion between entity instances and stored rows

use crate::errors::{Result, StrataError};

use super::entity::{EntityGraph, NodeId, RelationValue, Snapshot};
use super::identity::identity_of;
use super::metadata::{EntityMetadata, RelationDescriptor};
use super::registry::MetadataRegistry;
use super::value::{Row, Value};

/// A to-one reference whose target had no identity when the row was built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKey {
    pub relation: String,
    pub node: NodeId,
}

/// Storage row of an entity plus the foreign keys that could not be resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPlan {
    pub row: Row,
    pub pending: Vec<PendingKey>,
}

/// Join-column values pointing at `related`
///
/// `Ok(None)` when the related entity has no value yet for a referenced column.
pub fn foreign_key_values(
    registry: &MetadataRegistry,
    relation: &RelationDescriptor,
    graph: &EntityGraph,
    related: NodeId,
) -> Result<Option<Vec<(String, Value)>>> {
    let related_meta = registry.get(&relation.target)?;
    let entity = graph.entity(related);
    let mut values = Vec::with_capacity(relation.join_columns.len());
    for join in &relation.join_columns {
        let column = related_meta
            .column_by_storage(&join.referenced)
            .ok_or_else(|| StrataError::MissingJoinDefinition {
                target: related_meta.target().to_string(),
                property: relation.property.clone(),
            })?;
        match entity.get(&column.property) {
            Some(value) if !value.is_null() => values.push((join.name.clone(), value.clone())),
            _ => return Ok(None),
        }
    }
    Ok(Some(values))
}

/// Build the storage row of a node: present column values plus the join
/// columns of owning to-one relations that are set on the entity
pub fn entity_to_row(
    registry: &MetadataRegistry,
    metadata: &EntityMetadata,
    graph: &EntityGraph,
    node: NodeId,
) -> Result<RowPlan> {
    let entity = graph.entity(node);
    let mut plan = RowPlan::default();

    for column in metadata.columns() {
        if let Some(value) = entity.get(&column.property) {
            plan.row.insert(column.storage.clone(), value.clone());
        }
    }

    for relation in metadata.foreign_key_relations() {
        if !relation.persistence {
            continue;
        }
        match entity.relation(&relation.property) {
            Some(RelationValue::One(Some(related))) => {
                match foreign_key_values(registry, relation, graph, *related)? {
                    Some(values) => plan.row.extend(values),
                    None => {
                        for join in &relation.join_columns {
                            plan.row.insert(join.name.clone(), Value::Null);
                        }
                        plan.pending.push(PendingKey {
                            relation: relation.property.clone(),
                            node: *related,
                        });
                    }
                }
            }
            Some(RelationValue::One(None)) => {
                for join in &relation.join_columns {
                    plan.row.insert(join.name.clone(), Value::Null);
                }
            }
            _ => {}
        }
    }

    Ok(plan)
}

/// Map a stored row back to an entity, coercing values to column types
///
/// Join columns that are not also declared columns are not mapped.
pub fn row_to_entity(metadata: &EntityMetadata, row: &Row) -> super::entity::Entity {
    let mut entity = super::entity::Entity::new(metadata.target());
    for column in metadata.columns() {
        if let Some(value) = row.get(&column.storage) {
            entity.set(column.property.clone(), value.clone().coerce(column.column_type));
        }
    }
    entity
}

/// Snapshot of what storage holds for `node` after it was written
///
/// Columns and junctions the entity does not mention keep their previous
/// snapshot values.
pub fn snapshot_after_write(
    registry: &MetadataRegistry,
    metadata: &EntityMetadata,
    graph: &EntityGraph,
    node: NodeId,
    previous: Option<&Snapshot>,
) -> Result<Snapshot> {
    let mut snapshot = previous.cloned().unwrap_or_default();
    let plan = entity_to_row(registry, metadata, graph, node)?;
    snapshot.columns.extend(plan.row);

    for relation in metadata.relations() {
        if !relation.holds_junction() || !relation.persistence {
            continue;
        }
        if let Some(RelationValue::Many(nodes)) = graph.entity(node).relation(&relation.property)
        {
            let related_meta = registry.get(&relation.target)?;
            let identities = nodes
                .iter()
                .filter_map(|n| identity_of(&related_meta, graph.entity(*n)))
                .collect();
            snapshot
                .junctions
                .insert(relation.property.clone(), identities);
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::Entity;
    use crate::model::metadata::{ColumnDescriptor, ColumnType, Generation};

    fn registry() -> MetadataRegistry {
        let user = EntityMetadata::builder("User")
            .column(ColumnDescriptor::primary("id", ColumnType::Int, Generation::Increment))
            .column(ColumnDescriptor::new("name", ColumnType::Text))
            .build();
        let token = EntityMetadata::builder("AccessToken")
            .column(ColumnDescriptor::primary("id", ColumnType::Int, Generation::Increment))
            .column(ColumnDescriptor::new("token", ColumnType::Text).storage("token_value"))
            .relation(RelationDescriptor::one_to_one("user", "User"))
            .build();
        MetadataRegistry::new().with(user).with(token)
    }

    #[test]
    fn test_row_uses_storage_names_and_join_columns() {
        let registry = registry();
        let meta = registry.get("AccessToken").unwrap();
        let mut graph = EntityGraph::new();
        let user = graph.add(Entity::new("User").with("id", 5).with("name", "john"));
        let token = graph.add(Entity::new("AccessToken").with("token", "abc"));
        graph.relate(token, "user", user);

        let plan = entity_to_row(&registry, &meta, &graph, token).unwrap();
        assert_eq!(plan.row.get("token_value"), Some(&Value::from("abc")));
        assert_eq!(plan.row.get("user_id"), Some(&Value::Int(5)));
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn test_unsaved_related_entity_is_pending() {
        let registry = registry();
        let meta = registry.get("AccessToken").unwrap();
        let mut graph = EntityGraph::new();
        let user = graph.add(Entity::new("User").with("name", "john"));
        let token = graph.add(Entity::new("AccessToken").with("token", "abc"));
        graph.relate(token, "user", user);

        let plan = entity_to_row(&registry, &meta, &graph, token).unwrap();
        assert_eq!(plan.row.get("user_id"), Some(&Value::Null));
        assert_eq!(
            plan.pending,
            vec![PendingKey {
                relation: "user".to_string(),
                node: user
            }]
        );
    }

    #[test]
    fn test_row_to_entity_maps_storage_to_properties() {
        let registry = registry();
        let meta = registry.get("AccessToken").unwrap();
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(1));
        row.insert("token_value".to_string(), Value::from("abc"));
        row.insert("user_id".to_string(), Value::Int(5));

        let entity = row_to_entity(&meta, &row);
        assert_eq!(entity.get("token"), Some(&Value::from("abc")));
        assert_eq!(entity.get("user_id"), None);
    }
}
