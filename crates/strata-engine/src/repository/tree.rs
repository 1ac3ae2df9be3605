//! Tree repository
//!
//! Traversals run through the tree query builder, so all three encodings
//! answer the same questions. Results include the starting entity.

use std::collections::HashMap;

use strata_core::errors::{Result, StrataError};
use strata_core::model::{
    identity_from_row, identity_of, EntityGraph, EntityIdentity, EntityMetadata, NodeId,
    RelationDescriptor, Row,
};
use strata_core::tree::{
    build_ancestor_chain, build_descendants_tree, ParentLink, TreeNode, TreeQueryBuilder,
};

use super::Repository;
use crate::persistence::loader::{count_of, identity_from_columns};

#[derive(Debug, Clone)]
pub struct TreeRepository {
    base: Repository,
}

impl TreeRepository {
    pub(crate) fn new(base: Repository) -> Result<Self> {
        TreeQueryBuilder::new(base.metadata())?;
        Ok(Self { base })
    }

    /// The plain repository of the same entity
    pub fn repository(&self) -> &Repository {
        &self.base
    }

    fn metadata(&self) -> &EntityMetadata {
        self.base.metadata()
    }

    fn builder(&self) -> Result<TreeQueryBuilder<'_>> {
        TreeQueryBuilder::new(self.metadata())
    }

    fn identity(&self, graph: &EntityGraph, node: NodeId) -> Result<EntityIdentity> {
        let entity = graph
            .get(node)
            .filter(|entity| entity.target() == self.metadata().target())
            .ok_or_else(|| StrataError::UnknownNode {
                target: self.metadata().target().to_string(),
                node: node.index(),
            })?;
        identity_of(self.metadata(), entity).ok_or_else(|| {
            StrataError::MissingIdentity {
                target: self.metadata().target().to_string(),
                op: "tree".to_string(),
            }
        })
    }

    fn parent_relation(&self) -> Result<&RelationDescriptor> {
        self.metadata().tree_parent_relation().ok_or_else(|| {
            StrataError::InvalidTreeDeclaration {
                target: self.metadata().target().to_string(),
                reason: "missing tree-parent relation".to_string(),
            }
        })
    }

    fn links(&self, rows: &[Row]) -> Result<Vec<ParentLink>> {
        let parent = self.parent_relation()?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                identity_from_row(self.metadata(), row).map(|child| ParentLink {
                    child,
                    parent: identity_from_columns(self.metadata(), row, &parent.join_columns),
                })
            })
            .collect())
    }

    pub async fn find_roots(&self, graph: &mut EntityGraph) -> Result<Vec<NodeId>> {
        let query = self.builder()?.roots_query()?;
        self.base.load(graph, &query).await
    }

    /// `node` and everything below it, flat
    pub async fn find_descendants(
        &self,
        graph: &mut EntityGraph,
        node: NodeId,
    ) -> Result<Vec<NodeId>> {
        let identity = self.identity(graph, node)?;
        let query = self.builder()?.descendants_query(&identity);
        self.base.load(graph, &query).await
    }

    /// `node` and everything above it, flat
    pub async fn find_ancestors(&self, graph: &mut EntityGraph, node: NodeId) -> Result<Vec<NodeId>> {
        let identity = self.identity(graph, node)?;
        let query = self.builder()?.ancestors_query(&identity);
        self.base.load(graph, &query).await
    }

    pub async fn count_descendants(&self, graph: &EntityGraph, node: NodeId) -> Result<u64> {
        let identity = self.identity(graph, node)?;
        let query = self.builder()?.count_descendants_query(&identity);
        Ok(count_of(&self.base.select(&query).await?))
    }

    pub async fn count_ancestors(&self, graph: &EntityGraph, node: NodeId) -> Result<u64> {
        let identity = self.identity(graph, node)?;
        let query = self.builder()?.count_ancestors_query(&identity);
        Ok(count_of(&self.base.select(&query).await?))
    }

    /// Load the subtree below `node` and wire parent/children relations
    ///
    /// The returned tree mirrors the wiring, rooted at `node`'s identity.
    pub async fn find_descendants_tree(
        &self,
        graph: &mut EntityGraph,
        node: NodeId,
    ) -> Result<TreeNode> {
        let identity = self.identity(graph, node)?;
        let rows = self
            .base
            .select(&self.builder()?.descendants_query(&identity))
            .await?;
        let tree = build_descendants_tree(&identity, &self.links(&rows)?);

        let nodes = self.adopt(graph, node, &identity, rows).await?;
        self.wire(graph, &tree, &nodes)?;
        Ok(tree)
    }

    /// Load the chain from `node` up to its root, `node` first, with parent
    /// relations wired
    pub async fn find_ancestors_tree(
        &self,
        graph: &mut EntityGraph,
        node: NodeId,
    ) -> Result<Vec<NodeId>> {
        let identity = self.identity(graph, node)?;
        let rows = self
            .base
            .select(&self.builder()?.ancestors_query(&identity))
            .await?;
        let chain = build_ancestor_chain(&identity, &self.links(&rows)?);

        let nodes = self.adopt(graph, node, &identity, rows).await?;
        let parent = self.parent_relation()?.property.clone();
        let children = self
            .metadata()
            .tree_children_relation()
            .map(|r| r.property.clone());

        let chain: Vec<NodeId> = chain
            .iter()
            .filter_map(|identity| nodes.get(identity).copied())
            .collect();
        for pair in chain.windows(2) {
            graph.relate(pair[0], &parent, pair[1]);
            if let Some(children) = &children {
                graph.add_to(pair[1], children, pair[0]);
            }
        }
        Ok(chain)
    }

    /// Every root with its whole subtree
    pub async fn find_trees(&self, graph: &mut EntityGraph) -> Result<Vec<TreeNode>> {
        let roots = self.find_roots(graph).await?;
        let mut trees = Vec::with_capacity(roots.len());
        for root in roots {
            trees.push(self.find_descendants_tree(graph, root).await?);
        }
        Ok(trees)
    }

    /// Load `rows` into the graph, reusing `node` for its own row
    async fn adopt(
        &self,
        graph: &mut EntityGraph,
        node: NodeId,
        identity: &EntityIdentity,
        rows: Vec<Row>,
    ) -> Result<HashMap<EntityIdentity, NodeId>> {
        let others: Vec<Row> = rows
            .into_iter()
            .filter(|row| identity_from_row(self.metadata(), row).as_ref() != Some(identity))
            .collect();
        let loaded = self.base.load_rows(graph, others).await?;

        let mut nodes = HashMap::from([(identity.clone(), node)]);
        for loaded_node in loaded {
            let loaded_identity = graph
                .get(loaded_node)
                .and_then(|entity| identity_of(self.metadata(), entity));
            if let Some(loaded_identity) = loaded_identity {
                nodes.insert(loaded_identity, loaded_node);
            }
        }
        Ok(nodes)
    }

    fn wire(
        &self,
        graph: &mut EntityGraph,
        tree: &TreeNode,
        nodes: &HashMap<EntityIdentity, NodeId>,
    ) -> Result<()> {
        let parent = self.parent_relation()?.property.clone();
        let children = self
            .metadata()
            .tree_children_relation()
            .map(|r| r.property.clone());

        let mut stack = vec![tree];
        while let Some(branch) = stack.pop() {
            let Some(&parent_node) = nodes.get(&branch.identity) else {
                continue;
            };
            for child in &branch.children {
                let Some(&child_node) = nodes.get(&child.identity) else {
                    continue;
                };
                graph.relate(child_node, &parent, parent_node);
                if let Some(children) = &children {
                    graph.add_to(parent_node, children, child_node);
                }
                stack.push(child);
            }
        }
        Ok(())
    }
}
