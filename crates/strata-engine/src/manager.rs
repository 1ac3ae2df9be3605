//! Entity manager
//!
//! Every `save`/`remove`/`soft_remove`/`recover` call is one unit of work:
//! baselines of reachable nodes are loaded, the change set is computed and
//! executed, then graph baselines are refreshed. A manager outside a
//! transaction uses a fresh runner and its own transaction per call; a
//! manager handed out by [`EntityManager::transaction`] runs on the shared
//! runner and leaves commit to the transaction.

use std::sync::Arc;
use std::time::Instant;

use strata_core::changeset::{collect_reachable, compute_changes, OperationKind};
use strata_core::errors::Result;
use strata_core::events::Subscriber;
use strata_core::model::{EntityGraph, MetadataRegistry, NodeId};
use strata_core::{log_op_end, log_op_error, log_op_start};
use strata_core_types::{TraceId, WorkContext};
use strata_store::{Driver, QueryRunner};
use tracing::{info_span, warn, Instrument};

use crate::config::DataSourceOptions;
use crate::persistence::{loader, Outcome, UnitOfWork};
use crate::repository::{Repository, TreeRepository};
use crate::transaction::{notify, rollback_quietly, RunnerHandle, TransactionScope};

/// Everything managers of one data source share
pub(crate) struct Context {
    pub registry: Arc<MetadataRegistry>,
    pub driver: Arc<dyn Driver>,
    pub subscribers: Vec<Arc<dyn Subscriber>>,
    pub options: DataSourceOptions,
}

/// Handle for running units of work against one data source
///
/// Cheap to clone; clones share the data source and, inside a transaction,
/// the transaction.
#[derive(Clone)]
pub struct EntityManager {
    context: Arc<Context>,
    scope: Option<Arc<TransactionScope>>,
    trace_id: Option<TraceId>,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("driver", &self.context.driver.name())
            .field("transactional", &self.is_transactional())
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

impl EntityManager {
    pub(crate) fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            scope: None,
            trace_id: None,
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn scoped(&self, scope: Arc<TransactionScope>) -> Self {
        Self {
            context: Arc::clone(&self.context),
            scope: Some(scope),
            trace_id: self.trace_id.clone(),
        }
    }

    /// Tag every unit of work of this manager with a caller trace id
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.context.registry
    }

    /// Whether this manager runs inside [`EntityManager::transaction`]
    pub fn is_transactional(&self) -> bool {
        self.scope.is_some()
    }

    /// # Errors
    ///
    /// `EntityMetadataNotFound` when `target` is not registered.
    pub fn repository(&self, target: &str) -> Result<Repository> {
        Ok(Repository::new(self.clone(), self.context.registry.get(target)?))
    }

    /// # Errors
    ///
    /// `EntityMetadataNotFound` for unregistered targets, `NotTreeEntity`
    /// when the entity declares no tree.
    pub fn tree_repository(&self, target: &str) -> Result<TreeRepository> {
        TreeRepository::new(self.repository(target)?)
    }

    pub async fn save(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.persist(graph, &[node], OperationKind::Save).await?;
        Ok(node)
    }

    pub async fn save_all(&self, graph: &mut EntityGraph, nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        self.persist(graph, nodes, OperationKind::Save).await?;
        Ok(nodes.to_vec())
    }

    pub async fn remove(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.persist(graph, &[node], OperationKind::Remove).await?;
        Ok(node)
    }

    pub async fn remove_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.persist(graph, nodes, OperationKind::Remove).await?;
        Ok(nodes.to_vec())
    }

    pub async fn soft_remove(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.persist(graph, &[node], OperationKind::SoftRemove)
            .await?;
        Ok(node)
    }

    pub async fn soft_remove_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.persist(graph, nodes, OperationKind::SoftRemove).await?;
        Ok(nodes.to_vec())
    }

    pub async fn recover(&self, graph: &mut EntityGraph, node: NodeId) -> Result<NodeId> {
        self.persist(graph, &[node], OperationKind::Recover).await?;
        Ok(node)
    }

    pub async fn recover_all(
        &self,
        graph: &mut EntityGraph,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.persist(graph, nodes, OperationKind::Recover).await?;
        Ok(nodes.to_vec())
    }

    /// The transaction's runner, or a fresh one for a single call
    pub(crate) async fn acquire(&self) -> RunnerHandle {
        match &self.scope {
            Some(scope) => RunnerHandle::Shared(scope.lock().await),
            None => RunnerHandle::Owned(self.context.driver.create_runner()),
        }
    }

    pub(crate) fn work_context(&self) -> WorkContext {
        match &self.trace_id {
            Some(trace_id) => WorkContext::new().with_trace_id(trace_id.clone()),
            None => WorkContext::new(),
        }
    }

    async fn persist(
        &self,
        graph: &mut EntityGraph,
        roots: &[NodeId],
        kind: OperationKind,
    ) -> Result<()> {
        if roots.is_empty() {
            return Ok(());
        }
        let work = self.work_context();
        let op = kind.as_str();
        let span = info_span!(
            "unit_of_work",
            unit_of_work = %work.unit_of_work,
            trace_id = ?work.trace_id,
            kind = op,
            transactional = self.is_transactional(),
            timeout_ms = ?self.context.options.transaction_timeout_ms,
        );

        async {
            log_op_start!(op, roots = roots.len());
            let start = Instant::now();

            let events = self.persist_impl(graph, roots, kind, &work).await.map_err(|e| {
                log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
                e
            })?;

            log_op_end!(
                op,
                duration_ms = start.elapsed().as_millis() as u64,
                events = events
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn persist_impl(
        &self,
        graph: &mut EntityGraph,
        roots: &[NodeId],
        kind: OperationKind,
        work: &WorkContext,
    ) -> Result<usize> {
        let registry: &MetadataRegistry = &self.context.registry;
        let mut handle = self.acquire().await;
        let owned = handle.is_owned();
        // Values written back during a failed owned unit of work are undone
        let before = owned.then(|| graph.clone());

        if owned {
            if let Err(err) = handle
                .runner()
                .begin_transaction(self.context.options.isolation)
                .await
            {
                handle.finish().await;
                return Err(err);
            }
        }

        let executed = execute(registry, handle.runner(), graph, roots, kind, work).await;
        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(err) => {
                if owned {
                    rollback_quietly(handle.runner()).await;
                }
                handle.finish().await;
                if let Some(before) = before {
                    *graph = before;
                }
                return Err(err);
            }
        };

        if owned {
            if let Err(err) = handle.runner().commit_transaction().await {
                rollback_quietly(handle.runner()).await;
                handle.finish().await;
                if let Some(before) = before {
                    *graph = before;
                }
                return Err(err);
            }
        }
        handle.finish().await;

        Ok(self.settle(registry, graph, outcome))
    }

    /// Apply a committed outcome to the graph and hand its events on
    ///
    /// The write has landed by now, so a baseline that cannot be refreshed
    /// is only logged.
    fn settle(&self, registry: &MetadataRegistry, graph: &mut EntityGraph, outcome: Outcome) -> usize {
        if let Err(err) = outcome.refresh_baselines(registry, graph) {
            warn!(error = %err, "baselines not refreshed after commit");
        }
        let count = outcome.events.len();
        match &self.scope {
            Some(scope) => scope.defer(outcome.events),
            None => notify(&self.context.subscribers, &outcome.events),
        }
        count
    }
}

async fn execute(
    registry: &MetadataRegistry,
    runner: &mut dyn QueryRunner,
    graph: &mut EntityGraph,
    roots: &[NodeId],
    kind: OperationKind,
    work: &WorkContext,
) -> Result<Outcome> {
    if kind == OperationKind::Save {
        let reachable = collect_reachable(registry, graph, roots)?;
        loader::load_baselines(registry, runner, graph, &reachable).await?;
    }
    let change_set = compute_changes(registry, graph, roots, kind)?;
    UnitOfWork::new(registry, runner, graph, work)
        .run(&change_set)
        .await
}
