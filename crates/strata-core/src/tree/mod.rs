//! Tree traversal queries
//!
//! Translates logical ancestor/descendant lookups into query fragments for the
//! three physical tree encodings. Every fragment selects rows of the tree
//! entity under the alias `treeEntity`; result sets include the entity itself.

pub mod materialize;

pub use materialize::{build_ancestor_chain, build_descendants_tree, ParentLink, TreeNode};

use crate::errors::{Result, StrataError};
use crate::model::{EntityIdentity, EntityMetadata, TreeDescriptor, TreeStrategy};
use crate::query::{identity_criteria, Expr, Projection, SelectQuery};

/// Alias of the tree entity rows in every generated fragment
pub const TREE_ALIAS: &str = "treeEntity";
/// Alias of the closure junction table
pub const CLOSURE_ALIAS: &str = "treeClosure";
/// Alias of the pinned self-join row in nested-set fragments
pub const JOINED_ALIAS: &str = "joined";
/// Alias of the path-resolving sub-query in materialized-path fragments
pub const PATH_ALIAS: &str = "pathOwner";

/// Builds traversal fragments for one tree entity
pub struct TreeQueryBuilder<'a> {
    metadata: &'a EntityMetadata,
    tree: &'a TreeDescriptor,
}

impl<'a> TreeQueryBuilder<'a> {
    /// # Errors
    ///
    /// `NotTreeEntity` when `metadata` has no tree descriptor.
    pub fn new(metadata: &'a EntityMetadata) -> Result<Self> {
        let tree = metadata.tree().ok_or_else(|| StrataError::NotTreeEntity {
            target: metadata.target().to_string(),
        })?;
        Ok(Self { metadata, tree })
    }

    pub fn strategy(&self) -> &TreeStrategy {
        &self.tree.strategy
    }

    /// Rows of the subtree rooted at `identity`
    pub fn descendants_query(&self, identity: &EntityIdentity) -> SelectQuery {
        self.ordered(self.traversal(identity, Direction::Descendants))
    }

    /// Rows on the path from `identity` up to its root
    pub fn ancestors_query(&self, identity: &EntityIdentity) -> SelectQuery {
        self.ordered(self.traversal(identity, Direction::Ancestors))
    }

    pub fn count_descendants_query(&self, identity: &EntityIdentity) -> SelectQuery {
        self.traversal(identity, Direction::Descendants).into_count()
    }

    pub fn count_ancestors_query(&self, identity: &EntityIdentity) -> SelectQuery {
        self.traversal(identity, Direction::Ancestors).into_count()
    }

    /// Rows without a parent
    ///
    /// # Errors
    ///
    /// `InvalidTreeDeclaration` when the entity has no tree-parent relation.
    pub fn roots_query(&self) -> Result<SelectQuery> {
        let parent = self.metadata.tree_parent_relation().ok_or_else(|| {
            StrataError::InvalidTreeDeclaration {
                target: self.metadata.target().to_string(),
                reason: "missing tree-parent relation".to_string(),
            }
        })?;
        let nulls = parent
            .join_columns
            .iter()
            .map(|join| Expr::is_null(Expr::col(TREE_ALIAS, &join.name)))
            .collect();
        Ok(self.ordered(
            SelectQuery::from(self.metadata.table(), TREE_ALIAS).filter(Expr::all(nulls)),
        ))
    }

    fn traversal(&self, identity: &EntityIdentity, direction: Direction) -> SelectQuery {
        let table = self.metadata.table();
        match &self.tree.strategy {
            TreeStrategy::ClosureTable {
                table: closure,
                ancestor_columns,
                descendant_columns,
                ..
            } => {
                let (joined_on, pinned_by) = match direction {
                    Direction::Descendants => (descendant_columns, ancestor_columns),
                    Direction::Ancestors => (ancestor_columns, descendant_columns),
                };
                let on = joined_on
                    .iter()
                    .map(|join| {
                        Expr::eq(
                            Expr::col(CLOSURE_ALIAS, &join.name),
                            Expr::col(TREE_ALIAS, &join.referenced),
                        )
                    })
                    .collect();
                let pinned = pinned_by
                    .iter()
                    .zip(identity.values())
                    .map(|(join, value)| {
                        Expr::eq(
                            Expr::col(CLOSURE_ALIAS, &join.name),
                            Expr::Literal(value.clone()),
                        )
                    })
                    .collect();
                SelectQuery::from(table, TREE_ALIAS)
                    .inner_join(closure, CLOSURE_ALIAS, Expr::all(on))
                    .filter(Expr::all(pinned))
            }
            TreeStrategy::NestedSet { left, right } => {
                let on = match direction {
                    Direction::Descendants => Expr::between(
                        Expr::col(TREE_ALIAS, left),
                        Expr::col(JOINED_ALIAS, left),
                        Expr::col(JOINED_ALIAS, right),
                    ),
                    Direction::Ancestors => Expr::between(
                        Expr::col(JOINED_ALIAS, left),
                        Expr::col(TREE_ALIAS, left),
                        Expr::col(TREE_ALIAS, right),
                    ),
                };
                SelectQuery::from(table, TREE_ALIAS)
                    .inner_join(table, JOINED_ALIAS, on)
                    .filter(identity_criteria(self.metadata, identity, Some(JOINED_ALIAS)))
            }
            TreeStrategy::MaterializedPath { path } => {
                let owner_path = Expr::subquery(
                    SelectQuery::from(table, PATH_ALIAS)
                        .project(Projection::Columns(vec![(
                            PATH_ALIAS.to_string(),
                            path.clone(),
                        )]))
                        .filter(identity_criteria(self.metadata, identity, Some(PATH_ALIAS))),
                );
                let predicate = match direction {
                    Direction::Descendants => {
                        Expr::starts_with(Expr::col(TREE_ALIAS, path), owner_path)
                    }
                    Direction::Ancestors => {
                        Expr::starts_with(owner_path, Expr::col(TREE_ALIAS, path))
                    }
                };
                SelectQuery::from(table, TREE_ALIAS).filter(predicate)
            }
        }
    }

    fn ordered(&self, query: SelectQuery) -> SelectQuery {
        self.metadata
            .primary_columns()
            .into_iter()
            .fold(query, |query, column| {
                query.order_by(Expr::col(TREE_ALIAS, &column.storage), false)
            })
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Descendants,
    Ancestors,
}
