//! Entity metadata model
//!
//! Static description of an entity type: its table, columns, relations and
//! tree role. Metadata is plain data built once during schema resolution and
//! shared read-only (`Arc<EntityMetadata>`) by every unit of work.

use serde::{Deserialize, Serialize};

/// Logical column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    Json,
}

/// How a column value is produced when the caller does not supply one
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Generation {
    #[default]
    None,
    /// Store-side auto increment, handed back by the runner after insert
    Increment,
    /// Generated client-side (UUID v4) right before insert
    Uuid,
    /// Store-side default expression, handed back by the runner after insert
    Custom(String),
}

/// Special meaning attached to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRole {
    Primary,
    Version,
    DeleteDate,
    CreateDate,
    UpdateDate,
    TreeLevel,
    TreeChildrenCount,
    ObjectId,
    TreePath,
    NestedSetLeft,
    NestedSetRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Property name on the entity
    pub property: String,
    /// Column name in storage
    pub storage: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub generation: Generation,
    pub roles: Vec<ColumnRole>,
}

impl ColumnDescriptor {
    /// A non-nullable column stored under its property name
    pub fn new(property: impl Into<String>, column_type: ColumnType) -> Self {
        let property = property.into();
        Self {
            storage: property.clone(),
            property,
            column_type,
            nullable: false,
            generation: Generation::None,
            roles: Vec::new(),
        }
    }

    /// Primary column with the given generation strategy
    pub fn primary(
        property: impl Into<String>,
        column_type: ColumnType,
        generation: Generation,
    ) -> Self {
        Self::new(property, column_type)
            .generated(generation)
            .role(ColumnRole::Primary)
    }

    pub fn storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn generated(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    pub fn role(mut self, role: ColumnRole) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn has_role(&self, role: ColumnRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_primary(&self) -> bool {
        self.has_role(ColumnRole::Primary)
    }

    /// Whether the store fills this column when it is omitted on insert
    pub fn is_store_generated(&self) -> bool {
        matches!(self.generation, Generation::Increment | Generation::Custom(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

impl RelationKind {
    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Per-operation cascade flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cascade {
    pub insert: bool,
    pub update: bool,
    pub remove: bool,
    pub soft_remove: bool,
    pub recover: bool,
}

impl Cascade {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
            soft_remove: true,
            recover: true,
        }
    }

    /// Cascade on save only (insert + update)
    pub fn save() -> Self {
        Self {
            insert: true,
            update: true,
            ..Self::default()
        }
    }

    pub fn insert_only() -> Self {
        Self {
            insert: true,
            ..Self::default()
        }
    }

    pub fn any(&self) -> bool {
        self.insert || self.update || self.remove || self.soft_remove || self.recover
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeRole {
    #[default]
    None,
    Parent,
    Children,
}

/// A physical join column: `name` on the owning table references
/// `referenced` (a storage name) on the target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinColumn {
    pub name: String,
    pub referenced: String,
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced: referenced.into(),
        }
    }
}

/// Junction table of an owning many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionTable {
    pub table: String,
    /// Columns referencing the owning entity's primary columns
    pub owner_columns: Vec<JoinColumn>,
    /// Columns referencing the related entity's primary columns
    pub inverse_columns: Vec<JoinColumn>,
}

impl JunctionTable {
    /// Junction between two single-column `id` primary keys
    pub fn simple(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        inverse_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_columns: vec![JoinColumn::new(owner_column, "id")],
            inverse_columns: vec![JoinColumn::new(inverse_column, "id")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub property: String,
    pub kind: RelationKind,
    /// Target entity name
    pub target: String,
    /// Property on the target pointing back
    pub inverse: Option<String>,
    /// Whether this side holds the physical join
    pub owner: bool,
    pub join_columns: Vec<JoinColumn>,
    pub junction: Option<JunctionTable>,
    pub cascade: Cascade,
    pub eager: bool,
    pub lazy: bool,
    /// Disabled relations are read/inverse-only and never written or cascaded
    pub persistence: bool,
    pub tree_role: TreeRole,
    /// Whether the join columns accept null
    pub nullable: bool,
    /// Declared with a default collection value; rejected at validation when
    /// the relation is to-many with persistence enabled
    pub pre_populated: bool,
}

impl RelationDescriptor {
    fn new(property: String, kind: RelationKind, target: String, owner: bool) -> Self {
        let join_columns = if owner && !kind.is_to_many() {
            vec![JoinColumn::new(format!("{}_id", property), "id")]
        } else {
            Vec::new()
        };
        Self {
            property,
            kind,
            target,
            inverse: None,
            owner,
            join_columns,
            junction: None,
            cascade: Cascade::none(),
            eager: false,
            lazy: false,
            persistence: true,
            tree_role: TreeRole::None,
            nullable: true,
            pre_populated: false,
        }
    }

    /// Owning many-to-one with a default `<property>_id` join column
    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property.into(), RelationKind::ManyToOne, target.into(), true)
    }

    /// Inverse one-to-many mapped by `inverse` on the target
    pub fn one_to_many(
        property: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(property.into(), RelationKind::OneToMany, target.into(), false)
            .inverse(inverse)
    }

    /// Owning one-to-one with a default `<property>_id` join column
    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property.into(), RelationKind::OneToOne, target.into(), true)
    }

    /// Inverse one-to-one mapped by `inverse` on the target
    pub fn one_to_one_inverse(
        property: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(property.into(), RelationKind::OneToOne, target.into(), false).inverse(inverse)
    }

    /// Owning many-to-many; a junction must be supplied
    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property.into(), RelationKind::ManyToMany, target.into(), true)
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn inverse_side(mut self) -> Self {
        self.owner = false;
        self.join_columns.clear();
        self
    }

    pub fn join_columns(mut self, columns: Vec<JoinColumn>) -> Self {
        self.join_columns = columns;
        self
    }

    pub fn join_column(self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.join_columns(vec![JoinColumn::new(name, referenced)])
    }

    pub fn junction(mut self, junction: JunctionTable) -> Self {
        self.junction = Some(junction);
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn persistence(mut self, enabled: bool) -> Self {
        self.persistence = enabled;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn tree_parent(mut self) -> Self {
        self.tree_role = TreeRole::Parent;
        self
    }

    pub fn tree_children(mut self) -> Self {
        self.tree_role = TreeRole::Children;
        self
    }

    pub fn pre_populated(mut self) -> Self {
        self.pre_populated = true;
        self
    }

    /// Owning side of a many-to-one or one-to-one: holds foreign key columns
    pub fn holds_foreign_key(&self) -> bool {
        self.owner && matches!(self.kind, RelationKind::ManyToOne | RelationKind::OneToOne)
    }

    /// Owning side of a many-to-many: writes junction rows
    pub fn holds_junction(&self) -> bool {
        self.owner && self.kind == RelationKind::ManyToMany
    }
}

/// Physical tree encoding with its structural references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeStrategy {
    ClosureTable {
        table: String,
        /// Junction columns referencing the ancestor's primary columns
        ancestor_columns: Vec<JoinColumn>,
        /// Junction columns referencing the descendant's primary columns
        descendant_columns: Vec<JoinColumn>,
        depth_column: Option<String>,
    },
    NestedSet {
        left: String,
        right: String,
    },
    MaterializedPath {
        path: String,
    },
}

impl TreeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            TreeStrategy::ClosureTable { .. } => "closure-table",
            TreeStrategy::NestedSet { .. } => "nested-set",
            TreeStrategy::MaterializedPath { .. } => "materialized-path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub strategy: TreeStrategy,
}

/// Immutable description of one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    target: String,
    table: String,
    columns: Vec<ColumnDescriptor>,
    relations: Vec<RelationDescriptor>,
    tree: Option<TreeDescriptor>,
}

impl EntityMetadata {
    pub fn builder(target: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(target)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    pub fn tree(&self) -> Option<&TreeDescriptor> {
        self.tree.as_ref()
    }

    /// Primary columns in declared order
    pub fn primary_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_primary()).collect()
    }

    pub fn column(&self, property: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.property == property)
    }

    pub fn column_by_storage(&self, storage: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.storage == storage)
    }

    pub fn column_with_role(&self, role: ColumnRole) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.has_role(role))
    }

    pub fn relation(&self, property: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.property == property)
    }

    pub fn tree_parent_relation(&self) -> Option<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|r| r.tree_role == TreeRole::Parent)
    }

    pub fn tree_children_relation(&self) -> Option<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|r| r.tree_role == TreeRole::Children)
    }

    /// Relations whose join columns live in this entity's table
    pub fn foreign_key_relations(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter().filter(|r| r.holds_foreign_key())
    }

    /// Whether `property` names a column or relation of this entity
    pub fn has_property(&self, property: &str) -> bool {
        self.column(property).is_some() || self.relation(property).is_some()
    }
}

enum TreeShape {
    Explicit(TreeDescriptor),
    ClosureTable,
    NestedSet,
    MaterializedPath,
}

/// Builder for `EntityMetadata`
///
/// The tree shorthands add the structural columns each encoding needs
/// (`nsleft`/`nsright`, `mpath`) and derive the closure junction from the
/// primary columns at `build()` time.
pub struct EntityMetadataBuilder {
    target: String,
    table: Option<String>,
    columns: Vec<ColumnDescriptor>,
    relations: Vec<RelationDescriptor>,
    tree: Option<TreeShape>,
}

impl EntityMetadataBuilder {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            table: None,
            columns: Vec::new(),
            relations: Vec::new(),
            tree: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn tree(mut self, tree: TreeDescriptor) -> Self {
        self.tree = Some(TreeShape::Explicit(tree));
        self
    }

    pub fn closure_table(mut self) -> Self {
        self.tree = Some(TreeShape::ClosureTable);
        self
    }

    pub fn nested_set(mut self) -> Self {
        self.tree = Some(TreeShape::NestedSet);
        self
    }

    pub fn materialized_path(mut self) -> Self {
        self.tree = Some(TreeShape::MaterializedPath);
        self
    }

    pub fn build(mut self) -> EntityMetadata {
        let table = self
            .table
            .take()
            .unwrap_or_else(|| to_snake_case(&self.target));

        let tree = match self.tree.take() {
            None => None,
            Some(TreeShape::Explicit(tree)) => Some(tree),
            Some(TreeShape::ClosureTable) => {
                let primaries: Vec<&ColumnDescriptor> =
                    self.columns.iter().filter(|c| c.is_primary()).collect();
                let ancestor_columns = primaries
                    .iter()
                    .map(|c| JoinColumn::new(format!("ancestor_{}", c.storage), c.storage.clone()))
                    .collect();
                let descendant_columns = primaries
                    .iter()
                    .map(|c| {
                        JoinColumn::new(format!("descendant_{}", c.storage), c.storage.clone())
                    })
                    .collect();
                Some(TreeDescriptor {
                    strategy: TreeStrategy::ClosureTable {
                        table: format!("{}_closure", table),
                        ancestor_columns,
                        descendant_columns,
                        depth_column: None,
                    },
                })
            }
            Some(TreeShape::NestedSet) => {
                self.columns.push(
                    ColumnDescriptor::new("nsleft", ColumnType::Int)
                        .role(ColumnRole::NestedSetLeft),
                );
                self.columns.push(
                    ColumnDescriptor::new("nsright", ColumnType::Int)
                        .role(ColumnRole::NestedSetRight),
                );
                Some(TreeDescriptor {
                    strategy: TreeStrategy::NestedSet {
                        left: "nsleft".to_string(),
                        right: "nsright".to_string(),
                    },
                })
            }
            Some(TreeShape::MaterializedPath) => {
                self.columns.push(
                    ColumnDescriptor::new("mpath", ColumnType::Text)
                        .nullable()
                        .role(ColumnRole::TreePath),
                );
                Some(TreeDescriptor {
                    strategy: TreeStrategy::MaterializedPath {
                        path: "mpath".to_string(),
                    },
                })
            }
        };

        EntityMetadata {
            target: self.target,
            table,
            columns: self.columns,
            relations: self.relations,
            tree,
        }
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
