//! Change-set computation
//!
//! Walks the entity graph reachable from a set of roots through cascading
//! relations and produces the ordered operations needed to reconcile it with
//! storage. Every stored identity (or unsaved node) yields at most one
//! operation; cycles in the graph are cut by the visited set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StrataError};
use crate::model::{
    foreign_key_values, identity_of, Baseline, ColumnRole, EntityGraph, EntityIdentity,
    EntityMetadata, MetadataRegistry, NodeId, RelationDescriptor, RelationKind, RelationValue,
    Value,
};

/// Which persistence operation a change set is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Save,
    Remove,
    SoftRemove,
    Recover,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Save => "save",
            OperationKind::Remove => "remove",
            OperationKind::SoftRemove => "soft_remove",
            OperationKind::Recover => "recover",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed field of an updated entity
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Column {
        property: String,
        storage: String,
        /// Stored value when a baseline was loaded
        old: Option<Value>,
        new: Value,
    },
    /// Owning to-one reference now points at `target` (or nothing)
    Relation {
        property: String,
        target: Option<NodeId>,
    },
    /// Membership change of an owning many-to-many relation
    Junction {
        property: String,
        added: Vec<NodeId>,
        removed: Vec<EntityIdentity>,
    },
}

#[derive(Debug, Clone)]
pub enum ChangeOperation {
    Insert {
        metadata: Arc<EntityMetadata>,
        node: NodeId,
    },
    Update {
        metadata: Arc<EntityMetadata>,
        node: NodeId,
        identity: EntityIdentity,
        changes: Vec<Change>,
    },
    Delete {
        metadata: Arc<EntityMetadata>,
        node: NodeId,
        identity: EntityIdentity,
    },
    SoftDelete {
        metadata: Arc<EntityMetadata>,
        node: NodeId,
        identity: EntityIdentity,
    },
    Recover {
        metadata: Arc<EntityMetadata>,
        node: NodeId,
        identity: EntityIdentity,
    },
}

impl ChangeOperation {
    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        match self {
            ChangeOperation::Insert { metadata, .. }
            | ChangeOperation::Update { metadata, .. }
            | ChangeOperation::Delete { metadata, .. }
            | ChangeOperation::SoftDelete { metadata, .. }
            | ChangeOperation::Recover { metadata, .. } => metadata,
        }
    }

    pub fn node(&self) -> NodeId {
        match self {
            ChangeOperation::Insert { node, .. }
            | ChangeOperation::Update { node, .. }
            | ChangeOperation::Delete { node, .. }
            | ChangeOperation::SoftDelete { node, .. }
            | ChangeOperation::Recover { node, .. } => *node,
        }
    }

    /// Identity known when the change set was computed (`None` for inserts)
    pub fn identity(&self) -> Option<&EntityIdentity> {
        match self {
            ChangeOperation::Insert { .. } => None,
            ChangeOperation::Update { identity, .. }
            | ChangeOperation::Delete { identity, .. }
            | ChangeOperation::SoftDelete { identity, .. }
            | ChangeOperation::Recover { identity, .. } => Some(identity),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChangeOperation::Insert { .. } => "insert",
            ChangeOperation::Update { .. } => "update",
            ChangeOperation::Delete { .. } => "delete",
            ChangeOperation::SoftDelete { .. } => "soft_delete",
            ChangeOperation::Recover { .. } => "recover",
        }
    }
}

/// Ordered operations of one unit of work
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub kind: OperationKind,
    pub operations: Vec<ChangeOperation>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeOperation> {
        self.operations.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VisitKey {
    Stored(String, EntityIdentity),
    Node(NodeId),
}

struct Visit {
    node: NodeId,
    metadata: Arc<EntityMetadata>,
    identity: Option<EntityIdentity>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WalkMode {
    /// Follow the exact cascade flag and adopt orphaned children
    Cascade,
    /// Follow any save cascade, dedupe by node only, leave the graph untouched
    Reachable,
}

/// Compute the change set for `roots`
///
/// `graph` is mutated only to set unset back-references of children reached
/// through inverse one-to-many / one-to-one relations during a save.
///
/// # Errors
///
/// `EntityMetadataNotFound` for unregistered entities, `MissingIdentity` when a
/// root of a removal pass is unsaved, `CyclicDependency` when inserts form a
/// cycle of non-nullable foreign keys.
pub fn compute_changes(
    registry: &MetadataRegistry,
    graph: &mut EntityGraph,
    roots: &[NodeId],
    kind: OperationKind,
) -> Result<ChangeSet> {
    let visits = walk(registry, graph, roots, kind, WalkMode::Cascade)?;
    let mut operations = Vec::with_capacity(visits.len());

    match kind {
        OperationKind::Save => {
            let (inserts, updates): (Vec<&Visit>, Vec<&Visit>) = visits
                .iter()
                .partition(|v| v.identity.is_none() || graph.baseline(v.node) == &Baseline::Missing);

            for index in dependency_order(registry, graph, &inserts)? {
                let visit = inserts[index];
                operations.push(ChangeOperation::Insert {
                    metadata: visit.metadata.clone(),
                    node: visit.node,
                });
            }
            for visit in updates {
                let Some(identity) = visit.identity.clone() else {
                    continue;
                };
                operations.push(ChangeOperation::Update {
                    metadata: visit.metadata.clone(),
                    node: visit.node,
                    identity,
                    changes: diff(registry, graph, visit)?,
                });
            }
        }
        _ => {
            let all: Vec<&Visit> = visits.iter().collect();
            let mut order = dependency_order(registry, graph, &all)?;
            order.reverse();
            for index in order {
                let visit = all[index];
                let Some(identity) = visit.identity.clone() else {
                    continue;
                };
                let metadata = visit.metadata.clone();
                let node = visit.node;
                operations.push(match kind {
                    OperationKind::Remove => ChangeOperation::Delete {
                        metadata,
                        node,
                        identity,
                    },
                    OperationKind::SoftRemove => ChangeOperation::SoftDelete {
                        metadata,
                        node,
                        identity,
                    },
                    _ => ChangeOperation::Recover {
                        metadata,
                        node,
                        identity,
                    },
                });
            }
        }
    }

    Ok(ChangeSet { kind, operations })
}

/// Every node a save of `roots` could touch, in discovery order
///
/// Follows relations whose insert or update cascade is set, whatever the
/// stored state of the related entity. Used to load baselines before
/// `compute_changes` decides between insert and update.
///
/// # Errors
///
/// `EntityMetadataNotFound` for unregistered entities.
pub fn collect_reachable(
    registry: &MetadataRegistry,
    graph: &mut EntityGraph,
    roots: &[NodeId],
) -> Result<Vec<NodeId>> {
    let visits = walk(registry, graph, roots, OperationKind::Save, WalkMode::Reachable)?;
    Ok(visits.into_iter().map(|v| v.node).collect())
}

fn is_new(registry: &MetadataRegistry, graph: &EntityGraph, node: NodeId) -> Result<bool> {
    let metadata = registry.get(graph.entity(node).target())?;
    Ok(identity_of(&metadata, graph.entity(node)).is_none()
        || graph.baseline(node) == &Baseline::Missing)
}

fn follows(
    registry: &MetadataRegistry,
    graph: &EntityGraph,
    relation: &RelationDescriptor,
    related: NodeId,
    kind: OperationKind,
    mode: WalkMode,
) -> Result<bool> {
    let cascade = &relation.cascade;
    Ok(match kind {
        OperationKind::Save if mode == WalkMode::Reachable => cascade.insert || cascade.update,
        OperationKind::Save => {
            if is_new(registry, graph, related)? {
                cascade.insert
            } else {
                cascade.update
            }
        }
        OperationKind::Remove => cascade.remove,
        OperationKind::SoftRemove => cascade.soft_remove,
        OperationKind::Recover => cascade.recover,
    })
}

/// Point an unset back-reference of `child` at `parent`
fn adopt(graph: &mut EntityGraph, relation: &RelationDescriptor, parent: NodeId, child: NodeId) {
    if relation.owner || !matches!(relation.kind, RelationKind::OneToMany | RelationKind::OneToOne)
    {
        return;
    }
    let Some(inverse) = relation.inverse.as_deref() else {
        return;
    };
    if graph.entity(child).relation(inverse).is_none() {
        graph.relate(child, inverse, parent);
    }
}

fn walk(
    registry: &MetadataRegistry,
    graph: &mut EntityGraph,
    roots: &[NodeId],
    kind: OperationKind,
    mode: WalkMode,
) -> Result<Vec<Visit>> {
    let mut visited: HashSet<VisitKey> = HashSet::new();
    let mut visits = Vec::new();
    let mut stack: Vec<(NodeId, bool)> = roots.iter().rev().map(|n| (*n, true)).collect();

    while let Some((node, is_root)) = stack.pop() {
        let metadata = registry.get(graph.entity(node).target())?;
        let identity = identity_of(&metadata, graph.entity(node));

        if kind != OperationKind::Save && identity.is_none() {
            if is_root {
                return Err(StrataError::MissingIdentity {
                    target: metadata.target().to_string(),
                    op: kind.as_str().to_string(),
                });
            }
            continue;
        }

        let key = match (&identity, mode) {
            (Some(identity), WalkMode::Cascade) => {
                VisitKey::Stored(metadata.target().to_string(), identity.clone())
            }
            _ => VisitKey::Node(node),
        };
        if !visited.insert(key) {
            continue;
        }

        let mut next = Vec::new();
        for relation in metadata.relations() {
            if !relation.persistence {
                continue;
            }
            let related = match graph.entity(node).relation(&relation.property) {
                Some(value) => value.nodes(),
                None => continue,
            };
            for child in related {
                if !follows(registry, graph, relation, child, kind, mode)? {
                    continue;
                }
                if kind == OperationKind::Save && mode == WalkMode::Cascade {
                    adopt(graph, relation, node, child);
                }
                next.push(child);
            }
        }

        visits.push(Visit {
            node,
            metadata,
            identity,
        });
        stack.extend(next.into_iter().rev().map(|child| (child, false)));
    }

    Ok(visits)
}

struct Edge {
    /// Must be written before `to`
    from: usize,
    to: usize,
    nullable: bool,
}

/// Insertion order of `visits`: referenced entities before the entities whose
/// foreign keys point at them, discovery order otherwise
fn dependency_order(
    registry: &MetadataRegistry,
    graph: &EntityGraph,
    visits: &[&Visit],
) -> Result<Vec<usize>> {
    let positions: HashMap<NodeId, usize> = visits
        .iter()
        .enumerate()
        .map(|(i, v)| (v.node, i))
        .collect();

    let mut edges = Vec::new();
    for (index, visit) in visits.iter().enumerate() {
        for relation in visit.metadata.relations() {
            if !relation.persistence {
                continue;
            }
            if relation.holds_foreign_key() {
                if let Some(&from) = graph
                    .related_one(visit.node, &relation.property)
                    .and_then(|t| positions.get(&t))
                {
                    if from != index {
                        edges.push(Edge {
                            from,
                            to: index,
                            nullable: relation.nullable,
                        });
                    }
                }
            } else if !relation.owner
                && matches!(relation.kind, RelationKind::OneToMany | RelationKind::OneToOne)
            {
                let nullable = registry
                    .get(&relation.target)?
                    .relation(relation.inverse.as_deref().unwrap_or_default())
                    .map(|inverse| inverse.nullable)
                    .unwrap_or(true);
                for child in graph.related_many(visit.node, &relation.property) {
                    if let Some(&to) = positions.get(&child) {
                        if to != index {
                            edges.push(Edge {
                                from: index,
                                to,
                                nullable,
                            });
                        }
                    }
                }
            }
        }
    }

    match kahn(visits.len(), &edges, true) {
        Ok(order) => Ok(order),
        Err(_) => kahn(visits.len(), &edges, false).map_err(|stuck| {
            let targets: BTreeSet<String> = stuck
                .into_iter()
                .map(|i| visits[i].metadata.target().to_string())
                .collect();
            StrataError::CyclicDependency {
                targets: targets.into_iter().collect(),
            }
        }),
    }
}

/// Stable topological sort; on failure returns the positions left in a cycle
fn kahn(
    count: usize,
    edges: &[Edge],
    keep_nullable: bool,
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0usize; count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); count];
    for edge in edges.iter().filter(|e| keep_nullable || !e.nullable) {
        indegree[edge.to] += 1;
        outgoing[edge.from].push(edge.to);
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &to in &outgoing[next] {
            indegree[to] -= 1;
            if indegree[to] == 0 {
                ready.insert(to);
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|i| indegree[*i] > 0).collect())
    }
}

const UNTRACKED_ROLES: [ColumnRole; 7] = [
    ColumnRole::Primary,
    ColumnRole::Version,
    ColumnRole::CreateDate,
    ColumnRole::UpdateDate,
    ColumnRole::TreePath,
    ColumnRole::NestedSetLeft,
    ColumnRole::NestedSetRight,
];

/// Fields of a stored entity that differ from its baseline
fn diff(registry: &MetadataRegistry, graph: &EntityGraph, visit: &Visit) -> Result<Vec<Change>> {
    let entity = graph.entity(visit.node);
    let snapshot = match graph.baseline(visit.node) {
        Baseline::Loaded(snapshot) => Some(snapshot),
        _ => None,
    };
    let mut changes = Vec::new();

    for column in visit.metadata.columns() {
        if UNTRACKED_ROLES.iter().any(|role| column.has_role(*role)) {
            continue;
        }
        let Some(new) = entity.get(&column.property) else {
            continue;
        };
        let old = snapshot.map(|s| {
            s.columns
                .get(&column.storage)
                .cloned()
                .unwrap_or(Value::Null)
                .coerce(column.column_type)
        });
        if old.as_ref() == Some(&new.clone().coerce(column.column_type)) {
            continue;
        }
        changes.push(Change::Column {
            property: column.property.clone(),
            storage: column.storage.clone(),
            old,
            new: new.clone(),
        });
    }

    for relation in visit.metadata.foreign_key_relations() {
        if !relation.persistence {
            continue;
        }
        let target = match entity.relation(&relation.property) {
            Some(RelationValue::One(target)) => *target,
            _ => continue,
        };
        let current = match target {
            Some(related) => foreign_key_values(registry, relation, graph, related)?,
            None => Some(
                relation
                    .join_columns
                    .iter()
                    .map(|join| (join.name.clone(), Value::Null))
                    .collect(),
            ),
        };
        let related_meta = registry.get(&relation.target)?;
        let unchanged = match (snapshot, &current) {
            (Some(snapshot), Some(values)) => values.iter().zip(&relation.join_columns).all(
                |((name, value), join)| {
                    let stored = snapshot.columns.get(name).cloned().unwrap_or(Value::Null);
                    let stored = match related_meta.column_by_storage(&join.referenced) {
                        Some(column) => stored.coerce(column.column_type),
                        None => stored,
                    };
                    &stored == value
                },
            ),
            _ => false,
        };
        if !unchanged {
            changes.push(Change::Relation {
                property: relation.property.clone(),
                target,
            });
        }
    }

    for relation in visit.metadata.relations() {
        if !relation.holds_junction() || !relation.persistence {
            continue;
        }
        let Some(RelationValue::Many(nodes)) = entity.relation(&relation.property) else {
            continue;
        };
        let related_meta = registry.get(&relation.target)?;
        let known = snapshot.and_then(|s| s.junctions.get(&relation.property));

        let mut current = BTreeSet::new();
        let mut added = Vec::new();
        for &node in nodes {
            match identity_of(&related_meta, graph.entity(node)) {
                Some(identity) => {
                    if !known.is_some_and(|k| k.contains(&identity)) {
                        added.push(node);
                    }
                    current.insert(identity);
                }
                None => added.push(node),
            }
        }
        let removed: Vec<EntityIdentity> = known
            .map(|k| k.iter().filter(|id| !current.contains(*id)).cloned().collect())
            .unwrap_or_default();

        if !added.is_empty() || !removed.is_empty() {
            changes.push(Change::Junction {
                property: relation.property.clone(),
                added,
                removed,
            });
        }
    }

    Ok(changes)
}
