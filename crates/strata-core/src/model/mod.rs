pub mod entity;
pub mod identity;
pub mod mapping;
pub mod metadata;
pub mod registry;
pub mod value;

pub use entity::{Baseline, Entity, EntityGraph, EntityNode, NodeId, RelationValue, Snapshot};
pub use identity::{identity_from_row, identity_of, EntityIdentity};
pub use mapping::{entity_to_row, foreign_key_values, row_to_entity, snapshot_after_write, PendingKey, RowPlan};
pub use metadata::{
    Cascade, ColumnDescriptor, ColumnRole, ColumnType, EntityMetadata, EntityMetadataBuilder,
    Generation, JoinColumn, JunctionTable, RelationDescriptor, RelationKind, TreeDescriptor,
    TreeRole, TreeStrategy,
};
pub use registry::MetadataRegistry;
pub use value::{Row, Value};
