//! Keeping tree encodings consistent with parent links
//!
//! - closure table: one row per (ancestor, descendant) pair, self pair included
//! - nested set: new nodes become the last child of their parent; roots are
//!   appended after the widest existing interval
//! - materialized path: `parentPath + identity + "."`

use strata_core::errors::{Result, StrataError};
use strata_core::model::{
    identity_from_row, identity_of, EntityGraph, EntityIdentity, EntityMetadata, NodeId, Row,
    TreeStrategy, Value,
};
use strata_core::query::{
    identity_criteria, Assignment, CompareOp, DeleteStatement, Expr, InsertStatement,
    SelectQuery, UpdateStatement,
};
use strata_store::QueryRunner;
use tracing::debug;

use super::loader::{key_values, matching, rekey, require_row};

fn strategy(metadata: &EntityMetadata) -> Option<&TreeStrategy> {
    metadata.tree().map(|tree| &tree.strategy)
}

fn require_identity(
    metadata: &EntityMetadata,
    graph: &EntityGraph,
    node: NodeId,
    op: &str,
) -> Result<EntityIdentity> {
    identity_of(metadata, graph.entity(node)).ok_or_else(|| StrataError::MissingIdentity {
        target: metadata.target().to_string(),
        op: op.to_string(),
    })
}

fn parent_node(metadata: &EntityMetadata, graph: &EntityGraph, node: NodeId) -> Option<NodeId> {
    let relation = metadata.tree_parent_relation()?;
    graph.related_one(node, &relation.property)
}

fn parent_identity(
    metadata: &EntityMetadata,
    graph: &EntityGraph,
    node: NodeId,
) -> Option<EntityIdentity> {
    parent_node(metadata, graph, node).and_then(|parent| identity_of(metadata, graph.entity(parent)))
}

fn property_of(metadata: &EntityMetadata, storage: &str) -> Result<String> {
    metadata
        .column_by_storage(storage)
        .map(|column| column.property.clone())
        .ok_or_else(|| StrataError::InvalidTreeDeclaration {
            target: metadata.target().to_string(),
            reason: format!("tree column {} is not declared", storage),
        })
}

fn depth_of(row: &Row, depth_column: &Option<String>) -> i64 {
    depth_column
        .as_ref()
        .and_then(|column| row.get(column))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Reserve the nested-set interval of a node that is about to be inserted
pub(super) async fn assign_nested_set(
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    metadata: &EntityMetadata,
    node: NodeId,
) -> Result<()> {
    let Some(TreeStrategy::NestedSet { left, right }) = strategy(metadata) else {
        return Ok(());
    };
    let left_property = property_of(metadata, left)?;
    let right_property = property_of(metadata, right)?;
    let table = metadata.table();

    let parent = parent_node(metadata, graph, node);
    let slot = match parent_identity(metadata, graph, node) {
        Some(identity) => {
            let row = require_row(runner, metadata, &identity).await?;
            let bound = row.get(right).and_then(Value::as_i64).ok_or_else(|| {
                StrataError::InvalidTreeDeclaration {
                    target: metadata.target().to_string(),
                    reason: format!("parent {} has no {} value", identity, right),
                }
            })?;
            shift(runner, table, right, CompareOp::Gte, bound).await?;
            shift(runner, table, left, CompareOp::Gt, bound).await?;
            if let Some(parent) = parent {
                graph.entity_mut(parent).set(right_property.clone(), bound + 2);
            }
            bound
        }
        None => {
            let widest = SelectQuery::from(table, table)
                .order_by(Expr::bare(right), true)
                .limit(1);
            let max = runner
                .select(&widest)
                .await?
                .first()
                .and_then(|row| row.get(right))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            max + 1
        }
    };

    debug!(target_entity = metadata.target(), left = slot, right = slot + 1, "nested-set slot");
    let entity = graph.entity_mut(node);
    entity.set(left_property, slot);
    entity.set(right_property, slot + 1);
    Ok(())
}

async fn shift(
    runner: &mut dyn QueryRunner,
    table: &str,
    column: &str,
    op: CompareOp,
    bound: i64,
) -> Result<u64> {
    runner
        .update(&UpdateStatement {
            table: table.to_string(),
            assignments: vec![Assignment::new(
                column,
                Expr::add(Expr::bare(column), Expr::lit(2i64)),
            )],
            criteria: Expr::compare(op, Expr::bare(column), Expr::lit(bound)),
        })
        .await
}

/// Write closure rows or the materialized path of a freshly inserted node
pub(super) async fn after_insert(
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    metadata: &EntityMetadata,
    node: NodeId,
) -> Result<()> {
    match strategy(metadata) {
        Some(TreeStrategy::ClosureTable {
            table,
            ancestor_columns,
            descendant_columns,
            depth_column,
        }) => {
            let identity = require_identity(metadata, graph, node, "insert")?;
            let descendant = key_values(metadata, &identity, descendant_columns);

            let mut own: Row = key_values(metadata, &identity, ancestor_columns)
                .into_iter()
                .collect();
            own.extend(descendant.clone());
            if let Some(depth) = depth_column {
                own.insert(depth.clone(), Value::Int(0));
            }
            runner.insert(&InsertStatement::new(table.clone(), own)).await?;

            if let Some(parent) = parent_identity(metadata, graph, node) {
                let above = SelectQuery::from(table, table).filter(matching(&key_values(
                    metadata,
                    &parent,
                    descendant_columns,
                )));
                for ancestor in runner.select(&above).await? {
                    let mut link: Row = rekey(&ancestor, ancestor_columns, ancestor_columns)
                        .into_iter()
                        .collect();
                    link.extend(descendant.clone());
                    if let Some(depth) = depth_column {
                        link.insert(
                            depth.clone(),
                            Value::Int(depth_of(&ancestor, depth_column) + 1),
                        );
                    }
                    runner.insert(&InsertStatement::new(table.clone(), link)).await?;
                }
            }
            Ok(())
        }
        Some(TreeStrategy::MaterializedPath { path }) => {
            let identity = require_identity(metadata, graph, node, "insert")?;
            let prefix = match parent_identity(metadata, graph, node) {
                Some(parent) => stored_path(runner, metadata, &parent, path).await?,
                None => String::new(),
            };
            let value = format!("{}{}.", prefix, identity);
            write_path(runner, metadata, &identity, path, value.clone()).await?;
            graph.entity_mut(node).set(property_of(metadata, path)?, value);
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn stored_path(
    runner: &mut dyn QueryRunner,
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
    path: &str,
) -> Result<String> {
    let row = require_row(runner, metadata, identity).await?;
    Ok(row
        .get(path)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

async fn write_path(
    runner: &mut dyn QueryRunner,
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
    path: &str,
    value: String,
) -> Result<u64> {
    runner
        .update(&UpdateStatement {
            table: metadata.table().to_string(),
            assignments: vec![Assignment::value(path, value)],
            criteria: identity_criteria(metadata, identity, None),
        })
        .await
}

/// Move the stored subtree of `identity` below `new_parent`
///
/// A no-op when the stored parent already matches. Nested sets cannot move
/// nodes.
pub(super) async fn reparent(
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    metadata: &EntityMetadata,
    node: NodeId,
    identity: &EntityIdentity,
    new_parent: Option<NodeId>,
) -> Result<()> {
    let (Some(encoding), Some(parent_relation)) =
        (strategy(metadata), metadata.tree_parent_relation())
    else {
        return Ok(());
    };
    let new_parent = new_parent.and_then(|parent| identity_of(metadata, graph.entity(parent)));
    let row = require_row(runner, metadata, identity).await?;
    let stored = super::loader::identity_from_columns(metadata, &row, &parent_relation.join_columns);
    if stored == new_parent {
        return Ok(());
    }

    match encoding {
        TreeStrategy::NestedSet { .. } => Err(StrataError::NotSupported {
            target: metadata.target().to_string(),
            reason: "nested-set entities cannot change parent".to_string(),
        }),
        TreeStrategy::ClosureTable {
            table,
            ancestor_columns,
            descendant_columns,
            depth_column,
        } => {
            let as_ancestor = key_values(metadata, identity, ancestor_columns);
            let as_descendant = key_values(metadata, identity, descendant_columns);

            let subtree = runner
                .select(&SelectQuery::from(table, table).filter(matching(&as_ancestor)))
                .await?;
            if let Some(parent) = &new_parent {
                let target = key_values(metadata, parent, descendant_columns);
                let inside = subtree.iter().any(|member| {
                    target
                        .iter()
                        .all(|(column, value)| member.get(column) == Some(value))
                });
                if inside {
                    return Err(StrataError::NotSupported {
                        target: metadata.target().to_string(),
                        reason: format!("cannot move {} below its own subtree", identity),
                    });
                }
            }
            let old_ancestors = runner
                .select(&SelectQuery::from(table, table).filter(Expr::all(vec![
                    matching(&as_descendant),
                    Expr::not(matching(&as_ancestor)),
                ])))
                .await?;

            for ancestor in &old_ancestors {
                let above = rekey(ancestor, ancestor_columns, ancestor_columns);
                for member in &subtree {
                    let mut pair = above.clone();
                    pair.extend(rekey(member, descendant_columns, descendant_columns));
                    runner
                        .delete(&DeleteStatement {
                            table: table.clone(),
                            criteria: matching(&pair),
                        })
                        .await?;
                }
            }

            if let Some(parent) = &new_parent {
                let new_ancestors = runner
                    .select(&SelectQuery::from(table, table).filter(matching(&key_values(
                        metadata,
                        parent,
                        descendant_columns,
                    ))))
                    .await?;
                for ancestor in &new_ancestors {
                    for member in &subtree {
                        let mut link: Row = rekey(ancestor, ancestor_columns, ancestor_columns)
                            .into_iter()
                            .collect();
                        link.extend(rekey(member, descendant_columns, descendant_columns));
                        if let Some(depth) = depth_column {
                            let total =
                                depth_of(ancestor, depth_column) + depth_of(member, depth_column) + 1;
                            link.insert(depth.clone(), Value::Int(total));
                        }
                        runner.insert(&InsertStatement::new(table.clone(), link)).await?;
                    }
                }
            }
            debug!(
                target_entity = metadata.target(),
                moved = subtree.len(),
                "closure subtree relinked"
            );
            Ok(())
        }
        TreeStrategy::MaterializedPath { path } => {
            let old = row
                .get(path)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let prefix = match &new_parent {
                Some(parent) => stored_path(runner, metadata, parent, path).await?,
                None => String::new(),
            };
            if !old.is_empty() && prefix.starts_with(&old) {
                return Err(StrataError::NotSupported {
                    target: metadata.target().to_string(),
                    reason: format!("cannot move {} below its own subtree", identity),
                });
            }
            let moved = format!("{}{}.", prefix, identity);

            let members = if old.is_empty() {
                vec![row]
            } else {
                let subtree = SelectQuery::from(metadata.table(), metadata.table())
                    .filter(Expr::starts_with(Expr::bare(path), Expr::lit(old.clone())));
                runner.select(&subtree).await?
            };
            for member in &members {
                let Some(member_identity) = identity_from_row(metadata, member) else {
                    continue;
                };
                let current = member.get(path).and_then(Value::as_str).unwrap_or_default();
                let rest = current.strip_prefix(old.as_str()).unwrap_or_default();
                write_path(
                    runner,
                    metadata,
                    &member_identity,
                    path,
                    format!("{}{}", moved, rest),
                )
                .await?;
            }
            graph.entity_mut(node).set(property_of(metadata, path)?, moved);
            Ok(())
        }
    }
}

/// Drop the closure rows that mention a node about to be deleted
pub(super) async fn before_delete(
    runner: &mut dyn QueryRunner,
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
) -> Result<()> {
    if let Some(TreeStrategy::ClosureTable {
        table,
        ancestor_columns,
        descendant_columns,
        ..
    }) = strategy(metadata)
    {
        let criteria = Expr::any(vec![
            matching(&key_values(metadata, identity, ancestor_columns)),
            matching(&key_values(metadata, identity, descendant_columns)),
        ]);
        runner
            .delete(&DeleteStatement {
                table: table.clone(),
                criteria,
            })
            .await?;
    }
    Ok(())
}
