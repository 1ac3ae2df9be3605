//! Change-set execution
//!
//! A `UnitOfWork` runs one computed change set through a query runner:
//! 1. inserts in dependency order, with generated values written back
//! 2. foreign keys deferred because their target was inserted later
//! 3. updates, including version bump, update date and re-parenting
//! 4. junction rows of owning many-to-many relations
//! 5. deletes, soft deletes and recovers
//!
//! The unit of work never begins or ends a transaction; whoever owns the
//! runner does that around `run`.

pub(crate) mod loader;
mod tree;

use std::mem;
use std::sync::Arc;

use chrono::Utc;
use strata_core::changeset::{Change, ChangeOperation, ChangeSet};
use strata_core::errors::{Result, StrataError};
use strata_core::events::{CommittedEvent, EventKind};
use strata_core::model::{
    entity_to_row, foreign_key_values, identity_of, snapshot_after_write, Baseline, ColumnRole,
    EntityGraph, EntityIdentity, EntityMetadata, Generation, MetadataRegistry, NodeId,
    RelationDescriptor, Row, Snapshot, TreeRole, Value,
};
use strata_core::query::{
    identity_criteria, Assignment, DeleteStatement, Expr, InsertStatement, SelectQuery,
    UpdateStatement,
};
use strata_core_types::WorkContext;
use strata_store::QueryRunner;
use tracing::debug;
use uuid::Uuid;

use loader::{count_of, key_values, matching};

/// Foreign key left null on insert because its target had no identity yet
struct Deferred {
    metadata: Arc<EntityMetadata>,
    node: NodeId,
    relation: String,
    related: NodeId,
}

struct JunctionWrite {
    metadata: Arc<EntityMetadata>,
    node: NodeId,
    property: String,
    added: Vec<NodeId>,
    removed: Vec<EntityIdentity>,
}

/// What a finished unit of work leaves for its owner to apply
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub events: Vec<CommittedEvent>,
    /// Nodes whose stored state now matches the entity
    pub written: Vec<NodeId>,
    /// Nodes whose rows were deleted
    pub removed: Vec<NodeId>,
}

impl Outcome {
    /// Move the graph baselines to the state the store now holds
    ///
    /// # Errors
    ///
    /// `EntityMetadataNotFound` for nodes of unregistered entities.
    /// A node that cannot be refreshed keeps its old baseline; the others
    /// are still moved and the first failure is returned.
    pub fn refresh_baselines(&self, registry: &MetadataRegistry, graph: &mut EntityGraph) -> Result<()> {
        let mut first_error = None;
        for &node in &self.written {
            if let Err(err) = refresh_written(registry, graph, node) {
                first_error.get_or_insert(err);
            }
        }
        for &node in &self.removed {
            graph.set_baseline(node, Baseline::Missing);
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn refresh_written(registry: &MetadataRegistry, graph: &mut EntityGraph, node: NodeId) -> Result<()> {
    let metadata = registry.get(graph.entity(node).target())?;
    let previous = match graph.baseline(node) {
        Baseline::Loaded(snapshot) => Some(snapshot.clone()),
        _ => None,
    };
    let snapshot: Snapshot =
        snapshot_after_write(registry, &metadata, graph, node, previous.as_ref())?;
    graph.set_baseline(node, Baseline::Loaded(snapshot));
    Ok(())
}

pub(crate) struct UnitOfWork<'a> {
    registry: &'a MetadataRegistry,
    runner: &'a mut dyn QueryRunner,
    graph: &'a mut EntityGraph,
    context: &'a WorkContext,
    deferred: Vec<Deferred>,
    junctions: Vec<JunctionWrite>,
    outcome: Outcome,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(
        registry: &'a MetadataRegistry,
        runner: &'a mut dyn QueryRunner,
        graph: &'a mut EntityGraph,
        context: &'a WorkContext,
    ) -> Self {
        Self {
            registry,
            runner,
            graph,
            context,
            deferred: Vec::new(),
            junctions: Vec::new(),
            outcome: Outcome::default(),
        }
    }

    /// Execute every operation of `change_set`; stops at the first failure
    pub async fn run(mut self, change_set: &ChangeSet) -> Result<Outcome> {
        for operation in change_set.iter() {
            if let ChangeOperation::Insert { metadata, node } = operation {
                self.insert(Arc::clone(metadata), *node).await?;
            }
        }
        self.resolve_deferred().await?;

        for operation in change_set.iter() {
            match operation {
                ChangeOperation::Insert { .. } => {}
                ChangeOperation::Update {
                    metadata,
                    node,
                    identity,
                    changes,
                } => {
                    self.update(Arc::clone(metadata), *node, identity, changes)
                        .await?
                }
                ChangeOperation::Delete { .. }
                | ChangeOperation::SoftDelete { .. }
                | ChangeOperation::Recover { .. } => {}
            }
        }
        self.write_junctions().await?;

        for operation in change_set.iter() {
            match operation {
                ChangeOperation::Delete {
                    metadata,
                    node,
                    identity,
                } => self.delete(metadata, *node, identity).await?,
                ChangeOperation::SoftDelete {
                    metadata,
                    node,
                    identity,
                } => {
                    self.mark_deleted(metadata, *node, identity, Some(Utc::now()))
                        .await?
                }
                ChangeOperation::Recover {
                    metadata,
                    node,
                    identity,
                } => self.mark_deleted(metadata, *node, identity, None).await?,
                ChangeOperation::Insert { .. } | ChangeOperation::Update { .. } => {}
            }
        }

        debug!(
            operations = change_set.len(),
            events = self.outcome.events.len(),
            "unit of work executed"
        );
        Ok(self.outcome)
    }

    fn record(&mut self, kind: EventKind, metadata: &EntityMetadata, node: NodeId) {
        self.outcome.events.push(CommittedEvent {
            kind,
            target: metadata.target().to_string(),
            identity: identity_of(metadata, self.graph.entity(node)),
            unit_of_work: self.context.unit_of_work,
        });
    }

    async fn insert(&mut self, metadata: Arc<EntityMetadata>, node: NodeId) -> Result<()> {
        self.fill_client_values(&metadata, node);
        tree::assign_nested_set(&mut *self.runner, &mut *self.graph, &metadata, node).await?;

        let plan = entity_to_row(self.registry, &metadata, self.graph, node)?;
        for pending in plan.pending {
            let relation = relation_of(&metadata, &pending.relation)?;
            if !relation.nullable {
                return Err(StrataError::NullForeignKey {
                    target: metadata.target().to_string(),
                    property: relation.property.clone(),
                });
            }
            self.deferred.push(Deferred {
                metadata: Arc::clone(&metadata),
                node,
                relation: pending.relation,
                related: pending.node,
            });
        }
        if let Some(relation) = metadata.foreign_key_relations().find(|relation| {
            !relation.nullable
                && relation.persistence
                && self.graph.related_one(node, &relation.property).is_none()
                && self.graph.entity(node).relation(&relation.property).is_some()
        }) {
            return Err(StrataError::NullForeignKey {
                target: metadata.target().to_string(),
                property: relation.property.clone(),
            });
        }

        let mut statement = InsertStatement::new(metadata.table(), plan.row);
        for column in metadata.columns() {
            let missing = statement
                .values
                .get(&column.storage)
                .map_or(true, Value::is_null);
            if column.is_store_generated() && missing {
                statement = statement.returning(column.storage.clone(), column.generation.clone());
            }
        }

        let result = self.runner.insert(&statement).await?;
        let entity = self.graph.entity_mut(node);
        for (storage, value) in result.generated {
            if let Some(column) = metadata.column_by_storage(&storage) {
                entity.set(column.property.clone(), value.coerce(column.column_type));
            }
        }

        tree::after_insert(&mut *self.runner, &mut *self.graph, &metadata, node).await?;

        for relation in metadata.relations() {
            if !relation.holds_junction() || !relation.persistence {
                continue;
            }
            let added = self.graph.related_many(node, &relation.property);
            if !added.is_empty() {
                self.junctions.push(JunctionWrite {
                    metadata: Arc::clone(&metadata),
                    node,
                    property: relation.property.clone(),
                    added,
                    removed: Vec::new(),
                });
            }
        }

        self.outcome.written.push(node);
        self.record(EventKind::Inserted, &metadata, node);
        Ok(())
    }

    /// Values produced on the client side when the caller left them unset
    fn fill_client_values(&mut self, metadata: &EntityMetadata, node: NodeId) {
        let now = Utc::now();
        let entity = self.graph.entity_mut(node);
        for column in metadata.columns() {
            if entity.get(&column.property).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if column.generation == Generation::Uuid {
                entity.set(column.property.clone(), Uuid::new_v4());
            } else if column.has_role(ColumnRole::Version) {
                entity.set(column.property.clone(), 1i64);
            } else if column.has_role(ColumnRole::CreateDate)
                || column.has_role(ColumnRole::UpdateDate)
            {
                entity.set(column.property.clone(), now);
            }
        }
    }

    async fn resolve_deferred(&mut self) -> Result<()> {
        for deferred in mem::take(&mut self.deferred) {
            let relation = relation_of(&deferred.metadata, &deferred.relation)?;
            let Some(values) =
                foreign_key_values(self.registry, relation, self.graph, deferred.related)?
            else {
                continue;
            };
            let identity = identity_of(&deferred.metadata, self.graph.entity(deferred.node))
                .ok_or_else(|| StrataError::MissingIdentity {
                    target: deferred.metadata.target().to_string(),
                    op: "update".to_string(),
                })?;
            self.runner
                .update(&UpdateStatement {
                    table: deferred.metadata.table().to_string(),
                    assignments: values
                        .into_iter()
                        .map(|(column, value)| Assignment::value(column, value))
                        .collect(),
                    criteria: identity_criteria(&deferred.metadata, &identity, None),
                })
                .await?;
        }
        Ok(())
    }

    async fn update(
        &mut self,
        metadata: Arc<EntityMetadata>,
        node: NodeId,
        identity: &EntityIdentity,
        changes: &[Change],
    ) -> Result<()> {
        let mut assignments = Vec::new();
        let mut junction_changed = false;

        for change in changes {
            match change {
                Change::Column { storage, new, .. } => {
                    assignments.push(Assignment::value(storage.clone(), new.clone()));
                }
                Change::Relation { property, target } => {
                    let relation = relation_of(&metadata, property)?;
                    let values = match target {
                        Some(related) => {
                            foreign_key_values(self.registry, relation, self.graph, *related)?
                        }
                        None => None,
                    };
                    let values = match values {
                        Some(values) => values,
                        None if relation.nullable => relation
                            .join_columns
                            .iter()
                            .map(|join| (join.name.clone(), Value::Null))
                            .collect(),
                        None => {
                            return Err(StrataError::NullForeignKey {
                                target: metadata.target().to_string(),
                                property: property.clone(),
                            })
                        }
                    };
                    if relation.tree_role == TreeRole::Parent {
                        tree::reparent(
                            &mut *self.runner,
                            &mut *self.graph,
                            &metadata,
                            node,
                            identity,
                            *target,
                        )
                        .await?;
                    }
                    assignments.extend(
                        values
                            .into_iter()
                            .map(|(column, value)| Assignment::value(column, value)),
                    );
                }
                Change::Junction {
                    property,
                    added,
                    removed,
                } => {
                    junction_changed = true;
                    self.junctions.push(JunctionWrite {
                        metadata: Arc::clone(&metadata),
                        node,
                        property: property.clone(),
                        added: added.clone(),
                        removed: removed.clone(),
                    });
                }
            }
        }

        if !assignments.is_empty() {
            self.stamp(&metadata, node, &mut assignments);
            self.runner
                .update(&UpdateStatement {
                    table: metadata.table().to_string(),
                    assignments,
                    criteria: identity_criteria(&metadata, identity, None),
                })
                .await?;
            self.record(EventKind::Updated, &metadata, node);
        } else if junction_changed {
            self.record(EventKind::Updated, &metadata, node);
        }
        self.outcome.written.push(node);
        Ok(())
    }

    /// Version bump and update date of an updated row
    fn stamp(&mut self, metadata: &EntityMetadata, node: NodeId, assignments: &mut Vec<Assignment>) {
        let entity = self.graph.entity_mut(node);
        if let Some(version) = metadata.column_with_role(ColumnRole::Version) {
            assignments.push(Assignment::new(
                version.storage.clone(),
                Expr::add(Expr::bare(&version.storage), Expr::lit(1i64)),
            ));
            if let Some(current) = entity.get(&version.property).and_then(Value::as_i64) {
                entity.set(version.property.clone(), current + 1);
            }
        }
        if let Some(updated) = metadata.column_with_role(ColumnRole::UpdateDate) {
            let now = Utc::now();
            assignments.push(Assignment::value(updated.storage.clone(), now));
            entity.set(updated.property.clone(), now);
        }
    }

    async fn write_junctions(&mut self) -> Result<()> {
        for write in mem::take(&mut self.junctions) {
            let relation = relation_of(&write.metadata, &write.property)?;
            let junction =
                relation
                    .junction
                    .as_ref()
                    .ok_or_else(|| StrataError::MissingJoinDefinition {
                        target: write.metadata.target().to_string(),
                        property: write.property.clone(),
                    })?;
            let related = self.registry.get(&relation.target)?;
            let owner = identity_of(&write.metadata, self.graph.entity(write.node)).ok_or_else(
                || StrataError::MissingIdentity {
                    target: write.metadata.target().to_string(),
                    op: "link".to_string(),
                },
            )?;
            let owner_values = key_values(&write.metadata, &owner, &junction.owner_columns);

            for node in &write.added {
                let identity = identity_of(&related, self.graph.entity(*node)).ok_or_else(|| {
                    StrataError::MissingIdentity {
                        target: related.target().to_string(),
                        op: "link".to_string(),
                    }
                })?;
                let mut pair = owner_values.clone();
                pair.extend(key_values(&related, &identity, &junction.inverse_columns));

                let existing = self
                    .runner
                    .select(
                        &SelectQuery::from(&junction.table, &junction.table)
                            .filter(matching(&pair))
                            .into_count(),
                    )
                    .await?;
                if count_of(&existing) > 0 {
                    continue;
                }
                let row: Row = pair.into_iter().collect();
                self.runner
                    .insert(&InsertStatement::new(junction.table.clone(), row))
                    .await?;
            }

            for identity in &write.removed {
                let mut pair = owner_values.clone();
                pair.extend(key_values(&related, identity, &junction.inverse_columns));
                self.runner
                    .delete(&DeleteStatement {
                        table: junction.table.clone(),
                        criteria: matching(&pair),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(
        &mut self,
        metadata: &Arc<EntityMetadata>,
        node: NodeId,
        identity: &EntityIdentity,
    ) -> Result<()> {
        tree::before_delete(&mut *self.runner, metadata, identity).await?;
        for relation in metadata.relations() {
            if !relation.holds_junction() || !relation.persistence {
                continue;
            }
            if let Some(junction) = &relation.junction {
                let owner = key_values(metadata, identity, &junction.owner_columns);
                self.runner
                    .delete(&DeleteStatement {
                        table: junction.table.clone(),
                        criteria: matching(&owner),
                    })
                    .await?;
            }
        }
        self.runner
            .delete(&DeleteStatement {
                table: metadata.table().to_string(),
                criteria: identity_criteria(metadata, identity, None),
            })
            .await?;

        self.outcome.removed.push(node);
        self.record(EventKind::Removed, metadata, node);
        Ok(())
    }

    /// Soft delete (`Some(now)`) or recover (`None`)
    async fn mark_deleted(
        &mut self,
        metadata: &Arc<EntityMetadata>,
        node: NodeId,
        identity: &EntityIdentity,
        at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let column = metadata
            .column_with_role(ColumnRole::DeleteDate)
            .ok_or_else(|| StrataError::MissingDeleteDateColumn {
                target: metadata.target().to_string(),
            })?;
        let value = Value::from(at);
        self.runner
            .update(&UpdateStatement {
                table: metadata.table().to_string(),
                assignments: vec![Assignment::value(column.storage.clone(), value.clone())],
                criteria: identity_criteria(metadata, identity, None),
            })
            .await?;
        self.graph
            .entity_mut(node)
            .set(column.property.clone(), value);

        self.outcome.written.push(node);
        let kind = if at.is_some() {
            EventKind::SoftRemoved
        } else {
            EventKind::Recovered
        };
        self.record(kind, metadata, node);
        Ok(())
    }
}

fn relation_of<'m>(metadata: &'m EntityMetadata, property: &str) -> Result<&'m RelationDescriptor> {
    metadata
        .relation(property)
        .ok_or_else(|| StrataError::UnknownProperty {
            target: metadata.target().to_string(),
            property: property.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::model::{Cascade, ColumnDescriptor, ColumnType, Entity};
    use strata_store::{Driver, MemoryDriver};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new()
            .with(
                EntityMetadata::builder("Author")
                    .column(ColumnDescriptor::primary(
                        "id",
                        ColumnType::Int,
                        Generation::Increment,
                    ))
                    .column(ColumnDescriptor::new("name", ColumnType::Text))
                    .build(),
            )
            .with(
                EntityMetadata::builder("Note")
                    .column(ColumnDescriptor::primary(
                        "id",
                        ColumnType::Int,
                        Generation::Increment,
                    ))
                    .column(ColumnDescriptor::new("body", ColumnType::Text))
                    .column(ColumnDescriptor::new("version", ColumnType::Int).role(ColumnRole::Version))
                    .relation(
                        RelationDescriptor::many_to_one("author", "Author").cascade(Cascade::save()),
                    )
                    .build(),
            )
    }

    fn context() -> WorkContext {
        WorkContext::new()
    }

    #[test]
    fn test_refresh_moves_remaining_baselines_past_a_failure() {
        // GIVEN: an outcome naming a node of an unregistered entity
        let registry = registry();
        let mut graph = EntityGraph::new();
        let ghost = graph.add(Entity::new("Ghost").with("id", 1));
        let author = graph.add(Entity::new("Author").with("id", 1).with("name", "ada"));
        let gone = graph.add(Entity::new("Author").with("id", 2));
        let outcome = Outcome {
            events: Vec::new(),
            written: vec![ghost, author],
            removed: vec![gone],
        };

        // WHEN: refreshing
        let err = outcome.refresh_baselines(&registry, &mut graph).unwrap_err();

        // THEN: the failure is reported and every other node still moved on
        assert!(matches!(err, StrataError::EntityMetadataNotFound { .. }));
        assert_eq!(graph.baseline(ghost), &Baseline::Unknown);
        assert!(matches!(graph.baseline(author), Baseline::Loaded(_)));
        assert_eq!(graph.baseline(gone), &Baseline::Missing);
    }

    #[tokio::test]
    async fn test_insert_writes_generated_keys_back() {
        let registry = registry();
        let driver = MemoryDriver::new();
        let mut runner = driver.create_runner();
        let mut graph = EntityGraph::new();
        let author = graph.add(Entity::new("Author").with("name", "ada"));
        let note = graph.add(Entity::new("Note").with("body", "first"));
        graph.relate(note, "author", author);
        let context = context();

        let change_set = strata_core::compute_changes(
            &registry,
            &mut graph,
            &[note],
            strata_core::OperationKind::Save,
        )
        .unwrap();
        let outcome = UnitOfWork::new(&registry, runner.as_mut(), &mut graph, &context)
            .run(&change_set)
            .await
            .unwrap();

        assert_eq!(graph.entity(author).get("id"), Some(&Value::Int(1)));
        assert_eq!(graph.entity(note).get("version"), Some(&Value::Int(1)));
        let notes = driver.rows("note");
        assert_eq!(notes[0].get("author_id"), Some(&Value::Int(1)));
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].kind, EventKind::Inserted);
        assert_eq!(outcome.events[0].target, "Author");
        assert_eq!(outcome.events[0].unit_of_work, context.unit_of_work);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_skips_empty_changes() {
        let registry = registry();
        let driver = MemoryDriver::new();
        let mut runner = driver.create_runner();
        let mut graph = EntityGraph::new();
        let note = graph.add(Entity::new("Note").with("body", "first"));
        let context = context();

        let inserted = strata_core::compute_changes(
            &registry,
            &mut graph,
            &[note],
            strata_core::OperationKind::Save,
        )
        .unwrap();
        let outcome = UnitOfWork::new(&registry, runner.as_mut(), &mut graph, &context)
            .run(&inserted)
            .await
            .unwrap();
        outcome.refresh_baselines(&registry, &mut graph).unwrap();

        graph.entity_mut(note).set("body", "second");
        let updated = strata_core::compute_changes(
            &registry,
            &mut graph,
            &[note],
            strata_core::OperationKind::Save,
        )
        .unwrap();
        let outcome = UnitOfWork::new(&registry, runner.as_mut(), &mut graph, &context)
            .run(&updated)
            .await
            .unwrap();
        outcome.refresh_baselines(&registry, &mut graph).unwrap();

        let rows = driver.rows("note");
        assert_eq!(rows[0].get("body"), Some(&Value::from("second")));
        assert_eq!(rows[0].get("version"), Some(&Value::Int(2)));
        assert_eq!(graph.entity(note).get("version"), Some(&Value::Int(2)));

        let before = driver.statement_count();
        let unchanged = strata_core::compute_changes(
            &registry,
            &mut graph,
            &[note],
            strata_core::OperationKind::Save,
        )
        .unwrap();
        let outcome = UnitOfWork::new(&registry, runner.as_mut(), &mut graph, &context)
            .run(&unchanged)
            .await
            .unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(driver.statement_count(), before);
    }

    #[tokio::test]
    async fn test_soft_delete_requires_delete_date_column() {
        let registry = registry();
        let driver = MemoryDriver::new();
        let mut runner = driver.create_runner();
        let mut graph = EntityGraph::new();
        let note = graph.add(Entity::new("Note").with("id", 3i64).with("body", "x"));
        let context = context();

        let change_set = strata_core::compute_changes(
            &registry,
            &mut graph,
            &[note],
            strata_core::OperationKind::SoftRemove,
        )
        .unwrap();
        let err = UnitOfWork::new(&registry, runner.as_mut(), &mut graph, &context)
            .run(&change_set)
            .await
            .unwrap_err();

        assert!(matches!(err, StrataError::MissingDeleteDateColumn { .. }));
    }
}
