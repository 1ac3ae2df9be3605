use strata_core::model::{
    Cascade, ColumnDescriptor, ColumnType, EntityMetadata, Generation, RelationDescriptor,
};
use strata_core::MetadataRegistry;

/// Self-referencing node type: `link` is an owning many-to-one and `items`
/// the inverse one-to-many of `owner`, every relation cascading everything
#[allow(dead_code)]
pub fn node_registry() -> MetadataRegistry {
    let node = EntityMetadata::builder("Node")
        .column(ColumnDescriptor::primary(
            "id",
            ColumnType::Int,
            Generation::Increment,
        ))
        .column(ColumnDescriptor::new("label", ColumnType::Text).nullable())
        .relation(RelationDescriptor::many_to_one("link", "Node").cascade(Cascade::all()))
        .relation(RelationDescriptor::many_to_one("owner", "Node").cascade(Cascade::all()))
        .relation(
            RelationDescriptor::one_to_many("items", "Node", "owner").cascade(Cascade::all()),
        )
        .build();
    MetadataRegistry::new().with(node)
}
