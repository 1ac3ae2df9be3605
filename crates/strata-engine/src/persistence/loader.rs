//! Reading stored state into the entity graph

use std::collections::BTreeMap;

use strata_core::errors::{Result, StrataError};
use strata_core::model::{
    identity_from_row, identity_of, row_to_entity, Baseline, EntityGraph, EntityIdentity,
    EntityMetadata, JoinColumn, MetadataRegistry, NodeId, Row, Snapshot, Value,
};
use strata_core::query::{identity_criteria, Expr, SelectQuery};
use strata_store::QueryRunner;

/// Values for `columns` taken from `identity`; each join column takes the
/// value of the primary column it references
pub(crate) fn key_values(
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
    columns: &[JoinColumn],
) -> Vec<(String, Value)> {
    let primaries = metadata.primary_columns();
    columns
        .iter()
        .filter_map(|join| {
            primaries
                .iter()
                .position(|c| c.storage == join.referenced)
                .and_then(|index| identity.values().get(index))
                .map(|value| (join.name.clone(), value.clone()))
        })
        .collect()
}

/// Identity of the entity `columns` point at in `row`, if all are set
pub(crate) fn identity_from_columns(
    metadata: &EntityMetadata,
    row: &Row,
    columns: &[JoinColumn],
) -> Option<EntityIdentity> {
    let mut values = Vec::new();
    for column in metadata.primary_columns() {
        let join = columns.iter().find(|j| j.referenced == column.storage)?;
        let value = row.get(&join.name)?.clone().coerce(column.column_type);
        if value.is_null() {
            return None;
        }
        values.push(value);
    }
    if values.is_empty() {
        return None;
    }
    Some(EntityIdentity::new(values))
}

/// Re-key the values of `from` columns in `row` onto `to` columns
/// referencing the same primary columns
pub(crate) fn rekey(row: &Row, from: &[JoinColumn], to: &[JoinColumn]) -> Vec<(String, Value)> {
    to.iter()
        .filter_map(|target| {
            from.iter()
                .find(|source| source.referenced == target.referenced)
                .and_then(|source| row.get(&source.name))
                .map(|value| (target.name.clone(), value.clone()))
        })
        .collect()
}

/// Conjunction of `column = value` over bare column names
pub(crate) fn matching(pairs: &[(String, Value)]) -> Expr {
    Expr::all(
        pairs
            .iter()
            .map(|(column, value)| Expr::eq(Expr::bare(column), Expr::lit(value.clone())))
            .collect(),
    )
}

/// Value of the single `count` column of a count query
pub(crate) fn count_of(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_i64)
        .map_or(0, |count| count.max(0) as u64)
}

/// The stored row of `identity`, deleted or not
pub(crate) async fn find_row(
    runner: &mut dyn QueryRunner,
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
) -> Result<Option<Row>> {
    let query = SelectQuery::from(metadata.table(), metadata.table())
        .filter(identity_criteria(metadata, identity, Some(metadata.table())))
        .limit(1);
    Ok(runner.select(&query).await?.into_iter().next())
}

/// Stored row of `identity` or `EntityNotFound`
pub(crate) async fn require_row(
    runner: &mut dyn QueryRunner,
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
) -> Result<Row> {
    find_row(runner, metadata, identity)
        .await?
        .ok_or_else(|| StrataError::EntityNotFound {
            target: metadata.target().to_string(),
            criteria: identity.to_string(),
        })
}

/// Snapshot of a stored row plus the junction memberships it owns
pub(crate) async fn snapshot_of(
    registry: &MetadataRegistry,
    metadata: &EntityMetadata,
    runner: &mut dyn QueryRunner,
    row: Row,
    identity: &EntityIdentity,
) -> Result<Snapshot> {
    let mut junctions = BTreeMap::new();
    for relation in metadata.relations() {
        if !relation.holds_junction() || !relation.persistence {
            continue;
        }
        let junction =
            relation
                .junction
                .as_ref()
                .ok_or_else(|| StrataError::MissingJoinDefinition {
                    target: metadata.target().to_string(),
                    property: relation.property.clone(),
                })?;
        let related = registry.get(&relation.target)?;
        let owner = key_values(metadata, identity, &junction.owner_columns);
        let query =
            SelectQuery::from(&junction.table, &junction.table).filter(matching(&owner));
        let identities = runner
            .select(&query)
            .await?
            .iter()
            .filter_map(|r| identity_from_columns(&related, r, &junction.inverse_columns))
            .collect();
        junctions.insert(relation.property.clone(), identities);
    }
    Ok(Snapshot {
        columns: row,
        junctions,
    })
}

/// Resolve `Unknown` baselines of `nodes` against the store
///
/// Nodes without identity stay `Unknown`; identities with no stored row
/// become `Missing`.
pub(crate) async fn load_baselines(
    registry: &MetadataRegistry,
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    nodes: &[NodeId],
) -> Result<()> {
    for &node in nodes {
        if graph.baseline(node) != &Baseline::Unknown {
            continue;
        }
        let metadata = registry.get(graph.entity(node).target())?;
        let Some(identity) = identity_of(&metadata, graph.entity(node)) else {
            continue;
        };
        let baseline = match find_row(runner, &metadata, &identity).await? {
            Some(row) => {
                Baseline::Loaded(snapshot_of(registry, &metadata, runner, row, &identity).await?)
            }
            None => Baseline::Missing,
        };
        graph.set_baseline(node, baseline);
    }
    Ok(())
}

/// Add one node per row, each with a loaded baseline
pub(crate) async fn load_rows(
    registry: &MetadataRegistry,
    metadata: &EntityMetadata,
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    rows: Vec<Row>,
) -> Result<Vec<NodeId>> {
    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        let entity = row_to_entity(metadata, &row);
        let baseline = match identity_from_row(metadata, &row) {
            Some(identity) => {
                Baseline::Loaded(snapshot_of(registry, metadata, runner, row, &identity).await?)
            }
            None => Baseline::Unknown,
        };
        nodes.push(graph.add_node(entity, baseline));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::model::{ColumnDescriptor, ColumnType, Generation};

    fn pair() -> EntityMetadata {
        EntityMetadata::builder("Pair")
            .column(ColumnDescriptor::primary("left", ColumnType::Int, Generation::None))
            .column(ColumnDescriptor::primary("right", ColumnType::Text, Generation::None))
            .build()
    }

    #[test]
    fn test_key_values_follow_referenced_columns() {
        let meta = pair();
        let identity = EntityIdentity::new(vec![Value::Int(4), Value::from("b")]);
        let columns = vec![
            JoinColumn::new("pair_right", "right"),
            JoinColumn::new("pair_left", "left"),
        ];

        let values = key_values(&meta, &identity, &columns);

        assert_eq!(
            values,
            vec![
                ("pair_right".to_string(), Value::from("b")),
                ("pair_left".to_string(), Value::Int(4)),
            ]
        );
    }

    #[test]
    fn test_identity_from_columns_requires_every_value() {
        let meta = pair();
        let columns = vec![
            JoinColumn::new("pair_left", "left"),
            JoinColumn::new("pair_right", "right"),
        ];
        let mut row = Row::new();
        row.insert("pair_left".to_string(), Value::from("4"));
        assert_eq!(identity_from_columns(&meta, &row, &columns), None);

        row.insert("pair_right".to_string(), Value::from("b"));
        assert_eq!(
            identity_from_columns(&meta, &row, &columns),
            Some(EntityIdentity::new(vec![Value::Int(4), Value::from("b")]))
        );
    }

    #[test]
    fn test_rekey_maps_ancestor_to_descendant_columns() {
        let mut row = Row::new();
        row.insert("ancestor_id".to_string(), Value::Int(7));
        let from = vec![JoinColumn::new("ancestor_id", "id")];
        let to = vec![JoinColumn::new("descendant_id", "id")];

        assert_eq!(
            rekey(&row, &from, &to),
            vec![("descendant_id".to_string(), Value::Int(7))]
        );
    }

    #[test]
    fn test_count_of_empty_result_is_zero() {
        assert_eq!(count_of(&[]), 0);
        let mut row = Row::new();
        row.insert("count".to_string(), Value::Int(3));
        assert_eq!(count_of(&[row]), 3);
    }
}
