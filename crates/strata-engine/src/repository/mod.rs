//! Repositories
//!
//! A `Repository` is an entity manager bound to one entity type. Lookups
//! place loaded entities into the caller's graph with a loaded baseline, so a
//! later save of an unchanged entity writes nothing. Bulk operations work on
//! criteria directly and never touch a graph.

mod tree;

pub use tree::TreeRepository;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use strata_core::criteria::{Condition, FindInput, FindOptions};
use strata_core::errors::{Result, StrataError};
use strata_core::model::{ColumnRole, Entity, EntityGraph, EntityMetadata, NodeId, Row, Value};
use strata_core::query::{Assignment, DeleteStatement, Expr, SelectQuery, UpdateStatement};
use strata_core::{log_op_end, log_op_error, log_op_start};
use tracing::debug;

use crate::manager::EntityManager;
use crate::persistence::loader::{self, count_of};

enum Bulk {
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

#[derive(Debug, Clone)]
pub struct Repository {
    manager: EntityManager,
    metadata: Arc<EntityMetadata>,
}

impl Repository {
    pub(crate) fn new(manager: EntityManager, metadata: Arc<EntityMetadata>) -> Self {
        Self { manager, metadata }
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    /// A blank entity of this repository's type
    pub fn create(&self) -> Entity {
        Entity::new(self.metadata.target())
    }

    pub async fn save(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.manager.save(graph, node).await
    }

    pub async fn save_all(&self, graph: &mut EntityGraph, nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        self.manager.save_all(graph, nodes).await
    }

    pub async fn remove(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.manager.remove(graph, node).await
    }

    pub async fn remove_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.manager.remove_all(graph, nodes).await
    }

    pub async fn soft_remove(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.manager.soft_remove(graph, node).await
    }

    pub async fn soft_remove_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.manager.soft_remove_all(graph, nodes).await
    }

    pub async fn recover(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.manager.recover(graph, node).await
    }

    pub async fn recover_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.manager.recover_all(graph, nodes).await
    }

    /// Load every matching entity into `graph`
    ///
    /// # Errors
    ///
    /// `UnknownProperty` for criteria naming unknown properties; store errors.
    pub async fn find(
        &self,
        graph: &mut EntityGraph,
        input: impl Into<FindInput>,
    ) -> Result<Vec<NodeId>> {
        let query = input.into().into_options().to_query(&self.metadata)?;
        self.load(graph, &query).await
    }

    pub async fn find_by(&self, graph: &mut EntityGraph, condition: Condition) -> Result<Vec<NodeId>> {
        self.find(graph, condition).await
    }

    /// First matching entity; `None` input finds nothing without any I/O
    pub async fn find_one(
        &self,
        graph: &mut EntityGraph,
        input: Option<FindInput>,
    ) -> Result<Option<NodeId>> {
        let Some(input) = input else {
            return Ok(None);
        };
        let query = input
            .into_options()
            .to_query(&self.metadata)?
            .limit(1);
        Ok(self.load(graph, &query).await?.into_iter().next())
    }

    pub async fn find_one_by(
        &self,
        graph: &mut EntityGraph,
        condition: Condition,
    ) -> Result<Option<NodeId>> {
        self.find_one(graph, Some(condition.into())).await
    }

    /// # Errors
    ///
    /// `EntityNotFound` carrying the target and the criteria text when
    /// nothing matches.
    pub async fn find_one_or_fail(
        &self,
        graph: &mut EntityGraph,
        input: impl Into<FindInput>,
    ) -> Result<NodeId> {
        let options = input.into().into_options();
        let criteria = options.describe();
        self.find_one(graph, Some(FindInput::Options(options)))
            .await?
            .ok_or_else(|| StrataError::EntityNotFound {
                target: self.metadata.target().to_string(),
                criteria,
            })
    }

    pub async fn count(&self, input: impl Into<FindInput>) -> Result<u64> {
        let query = input
            .into()
            .into_options()
            .to_query(&self.metadata)?
            .into_count();
        Ok(count_of(&self.select(&query).await?))
    }

    pub async fn exists(&self, input: impl Into<FindInput>) -> Result<bool> {
        Ok(self.count(input).await? > 0)
    }

    /// Count of every row, soft-deleted ones excluded
    pub async fn count_all(&self) -> Result<u64> {
        self.count(FindOptions::new()).await
    }

    /// Set `partial` (property → value) on every row matching `criteria`
    ///
    /// Version and update-date columns are maintained as for entity updates.
    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// `EmptyCriteria` before any I/O when `criteria` constrains nothing;
    /// `UnknownProperty` for unknown properties.
    pub async fn update(
        &self,
        criteria: Condition,
        partial: BTreeMap<String, Value>,
    ) -> Result<u64> {
        self.require_criteria(&criteria, "update")?;
        let mut assignments = Vec::with_capacity(partial.len() + 2);
        for (property, value) in partial {
            let column = self.metadata.column(&property).ok_or_else(|| {
                StrataError::UnknownProperty {
                    target: self.metadata.target().to_string(),
                    property: property.clone(),
                }
            })?;
            assignments.push(Assignment::value(column.storage.clone(), value));
        }
        if assignments.is_empty() {
            return Ok(0);
        }
        if let Some(version) = self.metadata.column_with_role(ColumnRole::Version) {
            assignments.push(Assignment::new(
                version.storage.clone(),
                Expr::add(Expr::bare(&version.storage), Expr::lit(1i64)),
            ));
        }
        if let Some(updated) = self.metadata.column_with_role(ColumnRole::UpdateDate) {
            assignments.push(Assignment::value(updated.storage.clone(), Utc::now()));
        }
        self.bulk_update("update", &criteria, assignments).await
    }

    /// Delete every row matching `criteria`; returns the affected row count
    ///
    /// # Errors
    ///
    /// `EmptyCriteria` before any I/O when `criteria` constrains nothing.
    pub async fn delete(&self, criteria: Condition) -> Result<u64> {
        self.require_criteria(&criteria, "delete")?;
        let statement = DeleteStatement {
            table: self.metadata.table().to_string(),
            criteria: criteria.to_expr(&self.metadata, self.metadata.table())?,
        };
        self.bulk("delete", Bulk::Delete(statement)).await
    }

    /// Stamp the delete date of every row matching `criteria`
    ///
    /// # Errors
    ///
    /// `EmptyCriteria` before any I/O, `MissingDeleteDateColumn` when the
    /// entity has no delete-date column.
    pub async fn soft_delete(&self, criteria: Condition) -> Result<u64> {
        self.require_criteria(&criteria, "soft_delete")?;
        let column = self.delete_date_column()?;
        let assignments = vec![Assignment::value(column, Utc::now())];
        self.bulk_update("soft_delete", &criteria, assignments).await
    }

    /// Clear the delete date of every row matching `criteria`
    ///
    /// # Errors
    ///
    /// Same as [`Repository::soft_delete`].
    pub async fn restore(&self, criteria: Condition) -> Result<u64> {
        self.require_criteria(&criteria, "restore")?;
        let column = self.delete_date_column()?;
        let assignments = vec![Assignment::value(column, Value::Null)];
        self.bulk_update("restore", &criteria, assignments).await
    }

    fn require_criteria(&self, criteria: &Condition, op: &str) -> Result<()> {
        if criteria.is_empty() {
            return Err(StrataError::EmptyCriteria { op: op.to_string() });
        }
        Ok(())
    }

    fn delete_date_column(&self) -> Result<String> {
        self.metadata
            .column_with_role(ColumnRole::DeleteDate)
            .map(|column| column.storage.clone())
            .ok_or_else(|| StrataError::MissingDeleteDateColumn {
                target: self.metadata.target().to_string(),
            })
    }

    async fn bulk_update(
        &self,
        op: &'static str,
        criteria: &Condition,
        assignments: Vec<Assignment>,
    ) -> Result<u64> {
        let statement = UpdateStatement {
            table: self.metadata.table().to_string(),
            assignments,
            criteria: criteria.to_expr(&self.metadata, self.metadata.table())?,
        };
        self.bulk(op, Bulk::Update(statement)).await
    }

    async fn bulk(&self, op: &'static str, statement: Bulk) -> Result<u64> {
        log_op_start!(op, target = self.metadata.target());
        let start = Instant::now();

        let mut handle = self.manager.acquire().await;
        let result = match &statement {
            Bulk::Update(update) => handle.runner().update(update).await,
            Bulk::Delete(delete) => handle.runner().delete(delete).await,
        };
        handle.finish().await;

        let affected = result.map_err(|e| {
            log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;
        log_op_end!(
            op,
            duration_ms = start.elapsed().as_millis() as u64,
            affected = affected
        );
        Ok(affected)
    }

    pub(crate) async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let mut handle = self.manager.acquire().await;
        let result = handle.runner().select(query).await;
        handle.finish().await;
        result
    }

    /// Add one node per already selected row to `graph`
    pub(crate) async fn load_rows(&self, graph: &mut EntityGraph, rows: Vec<Row>) -> Result<Vec<NodeId>> {
        let mut handle = self.manager.acquire().await;
        let registry = self.manager.registry();
        let result =
            loader::load_rows(registry, &self.metadata, handle.runner(), graph, rows).await;
        handle.finish().await;
        result
    }

    /// Run `query` and add one node per row to `graph`
    pub(crate) async fn load(&self, graph: &mut EntityGraph, query: &SelectQuery) -> Result<Vec<NodeId>> {
        let mut handle = self.manager.acquire().await;
        let registry = self.manager.registry();
        let result = match handle.runner().select(query).await {
            Ok(rows) => {
                loader::load_rows(registry, &self.metadata, handle.runner(), graph, rows).await
            }
            Err(err) => Err(err),
        };
        handle.finish().await;
        if let Ok(nodes) = &result {
            debug!(target_entity = self.metadata.target(), loaded = nodes.len(), "entities loaded");
        }
        result
    }
}
