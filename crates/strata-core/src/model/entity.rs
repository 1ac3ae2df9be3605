use std::collections::BTreeMap;

use super::identity::EntityIdentity;
use super::value::{Row, Value};

/// Index of an entity inside an `EntityGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value of a relation property: a single reference or a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

impl RelationValue {
    /// Every node referenced by this value
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            RelationValue::One(node) => node.iter().copied().collect(),
            RelationValue::Many(nodes) => nodes.clone(),
        }
    }
}

/// A dynamic entity instance: column values and relation references by property
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    target: String,
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationValue>,
}

impl Entity {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            values: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(property.into(), value.into());
    }

    pub fn unset(&mut self, property: &str) -> Option<Value> {
        self.values.remove(property)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn relation(&self, property: &str) -> Option<&RelationValue> {
        self.relations.get(property)
    }

    pub fn set_relation(&mut self, property: impl Into<String>, value: RelationValue) {
        self.relations.insert(property.into(), value);
    }

    pub fn clear_relation(&mut self, property: &str) -> Option<RelationValue> {
        self.relations.remove(property)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> {
        &self.relations
    }
}

/// Last known stored state of an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Stored column values keyed by storage name, join columns included
    pub columns: Row,
    /// Related identities of owned many-to-many relations, by property
    pub junctions: BTreeMap<String, Vec<EntityIdentity>>,
}

/// What the unit of work knows about the stored counterpart of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Baseline {
    /// Never looked up
    #[default]
    Unknown,
    /// Looked up and absent from storage
    Missing,
    /// Loaded from (or just written to) storage
    Loaded(Snapshot),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub entity: Entity,
    pub baseline: Baseline,
}

/// Arena of entity instances
///
/// Relations hold `NodeId`s, so back-references and cycles are plain indices.
/// Node ids are only meaningful for the graph that issued them; indexing with
/// a foreign id panics like an out-of-bounds slice access.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    nodes: Vec<EntityNode>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity the unit of work knows nothing about yet
    pub fn add(&mut self, entity: Entity) -> NodeId {
        self.add_node(entity, Baseline::Unknown)
    }

    pub fn add_node(&mut self, entity: Entity, baseline: Baseline) -> NodeId {
        self.nodes.push(EntityNode { entity, baseline });
        NodeId(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> &EntityNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut EntityNode {
        &mut self.nodes[id.0]
    }

    /// # Panics
    ///
    /// When `id` was not issued by this graph; see [`EntityGraph::get`].
    pub fn entity(&self, id: NodeId) -> &Entity {
        &self.nodes[id.0].entity
    }

    /// Checked twin of [`EntityGraph::entity`]
    pub fn get(&self, id: NodeId) -> Option<&Entity> {
        self.nodes.get(id.0).map(|node| &node.entity)
    }

    pub fn entity_mut(&mut self, id: NodeId) -> &mut Entity {
        &mut self.nodes[id.0].entity
    }

    pub fn baseline(&self, id: NodeId) -> &Baseline {
        &self.nodes[id.0].baseline
    }

    pub fn set_baseline(&mut self, id: NodeId, baseline: Baseline) {
        self.nodes[id.0].baseline = baseline;
    }

    /// Point a to-one relation of `from` at `to`
    pub fn relate(&mut self, from: NodeId, property: &str, to: NodeId) {
        self.entity_mut(from)
            .set_relation(property, RelationValue::One(Some(to)));
    }

    /// Explicitly clear a to-one relation (stored as null on save)
    pub fn unrelate(&mut self, from: NodeId, property: &str) {
        self.entity_mut(from)
            .set_relation(property, RelationValue::One(None));
    }

    /// Append `to` to a to-many relation of `from`
    pub fn add_to(&mut self, from: NodeId, property: &str, to: NodeId) {
        let entity = self.entity_mut(from);
        match entity.relations.get_mut(property) {
            Some(RelationValue::Many(nodes)) => {
                if !nodes.contains(&to) {
                    nodes.push(to);
                }
            }
            _ => entity.set_relation(property, RelationValue::Many(vec![to])),
        }
    }

    /// The single node a to-one relation points at, if any
    pub fn related_one(&self, from: NodeId, property: &str) -> Option<NodeId> {
        match self.entity(from).relation(property) {
            Some(RelationValue::One(node)) => *node,
            _ => None,
        }
    }

    /// Nodes of a to-many relation (empty when unset)
    pub fn related_many(&self, from: NodeId, property: &str) -> Vec<NodeId> {
        match self.entity(from).relation(property) {
            Some(value) => value.nodes(),
            None => Vec::new(),
        }
    }
}
