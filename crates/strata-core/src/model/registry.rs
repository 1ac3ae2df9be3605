use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{Result, StrataError};

use super::metadata::{ColumnRole, EntityMetadata, RelationKind, TreeRole, TreeStrategy};

/// Explicit registry of resolved entity metadata
///
/// Built once per data source and shared read-only by every unit of work.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entities: BTreeMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one entity, replacing any previous registration for its target
    pub fn register(&mut self, metadata: EntityMetadata) -> &mut Self {
        self.entities
            .insert(metadata.target().to_string(), Arc::new(metadata));
        self
    }

    pub fn with(mut self, metadata: EntityMetadata) -> Self {
        self.register(metadata);
        self
    }

    /// Look up metadata by target name
    ///
    /// # Errors
    ///
    /// Returns `EntityMetadataNotFound` for unregistered targets.
    pub fn get(&self, target: &str) -> Result<Arc<EntityMetadata>> {
        self.entities
            .get(target)
            .cloned()
            .ok_or_else(|| StrataError::EntityMetadataNotFound {
                target: target.to_string(),
            })
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entities.contains_key(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check every registered entity for configuration errors
    ///
    /// # Errors
    ///
    /// The first configuration error found, in target order.
    pub fn validate(&self) -> Result<()> {
        for metadata in self.entities.values() {
            self.validate_entity(metadata)?;
        }
        Ok(())
    }

    fn validate_entity(&self, metadata: &EntityMetadata) -> Result<()> {
        let target = metadata.target();

        if metadata.primary_columns().is_empty() {
            return Err(StrataError::MissingPrimaryColumn {
                target: target.to_string(),
            });
        }

        for relation in metadata.relations() {
            let related = self.get(&relation.target)?;

            if relation.kind.is_to_many() && relation.pre_populated && relation.persistence {
                return Err(StrataError::InitializedRelationArray {
                    target: target.to_string(),
                    property: relation.property.clone(),
                });
            }

            if relation.holds_foreign_key() {
                if relation.join_columns.is_empty() {
                    return Err(StrataError::MissingJoinDefinition {
                        target: target.to_string(),
                        property: relation.property.clone(),
                    });
                }
                for join in &relation.join_columns {
                    if related.column_by_storage(&join.referenced).is_none() {
                        return Err(StrataError::MissingJoinDefinition {
                            target: target.to_string(),
                            property: relation.property.clone(),
                        });
                    }
                    let shadows = metadata.column_by_storage(&join.name);
                    if relation.cascade.any()
                        && shadows.is_some_and(|c| {
                            c.is_primary() || c.has_role(ColumnRole::TreeChildrenCount)
                        })
                    {
                        return Err(StrataError::InvalidCascadeDeclaration {
                            target: target.to_string(),
                            property: relation.property.clone(),
                            reason: format!(
                                "join column \"{}\" is a primary or children-count column",
                                join.name
                            ),
                        });
                    }
                }
            }

            if relation.holds_junction() && relation.junction.is_none() {
                return Err(StrataError::MissingJoinDefinition {
                    target: target.to_string(),
                    property: relation.property.clone(),
                });
            }

            if !relation.owner
                && matches!(relation.kind, RelationKind::OneToMany | RelationKind::OneToOne)
            {
                let inverse = relation
                    .inverse
                    .as_deref()
                    .and_then(|name| related.relation(name));
                if inverse.is_none() {
                    return Err(StrataError::MissingJoinDefinition {
                        target: target.to_string(),
                        property: relation.property.clone(),
                    });
                }
            }
        }

        if let Some(tree) = metadata.tree() {
            let invalid = |reason: String| StrataError::InvalidTreeDeclaration {
                target: target.to_string(),
                reason,
            };

            let parent = metadata
                .tree_parent_relation()
                .ok_or_else(|| invalid("missing tree-parent relation".to_string()))?;
            if parent.target != target || !parent.holds_foreign_key() {
                return Err(invalid(
                    "tree-parent must be an owning self-reference".to_string(),
                ));
            }
            if let Some(children) = metadata.tree_children_relation() {
                if children.target != target || children.tree_role != TreeRole::Children {
                    return Err(invalid("tree-children must be a self-reference".to_string()));
                }
            }

            match &tree.strategy {
                TreeStrategy::ClosureTable {
                    ancestor_columns,
                    descendant_columns,
                    ..
                } => {
                    let primaries = metadata.primary_columns().len();
                    if ancestor_columns.len() != primaries || descendant_columns.len() != primaries
                    {
                        return Err(invalid(
                            "closure columns must cover every primary column".to_string(),
                        ));
                    }
                }
                TreeStrategy::NestedSet { left, right } => {
                    for column in [left, right] {
                        if metadata.column_by_storage(column).is_none() {
                            return Err(invalid(format!("unknown nested-set column \"{}\"", column)));
                        }
                    }
                }
                TreeStrategy::MaterializedPath { path } => {
                    if metadata.column_by_storage(path).is_none() {
                        return Err(invalid(format!("unknown path column \"{}\"", path)));
                    }
                }
            }
        }

        Ok(())
    }
}
