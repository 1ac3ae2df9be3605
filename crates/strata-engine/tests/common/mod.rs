//! Shared fixtures for engine tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use strata_core::errors::{Result, StrataError};
use strata_core::events::{CommittedEvent, EventKind, Subscriber};
use strata_core::model::{
    Cascade, ColumnDescriptor, ColumnRole, ColumnType, Entity, EntityGraph, EntityMetadata,
    EntityMetadataBuilder, Generation, JunctionTable, MetadataRegistry, NodeId,
    RelationDescriptor,
};
use strata_engine::DataSource;
use strata_store::MemoryDriver;

/// Posts with soft delete, versioning and tags through a junction table
pub fn blog_registry() -> MetadataRegistry {
    MetadataRegistry::new()
        .with(
            EntityMetadata::builder("Post")
                .column(ColumnDescriptor::primary(
                    "id",
                    ColumnType::Int,
                    Generation::Increment,
                ))
                .column(ColumnDescriptor::new("title", ColumnType::Text))
                .column(ColumnDescriptor::new("author", ColumnType::Text).nullable())
                .column(ColumnDescriptor::new("text", ColumnType::Text).nullable())
                .column(ColumnDescriptor::new("version", ColumnType::Int).role(ColumnRole::Version))
                .column(
                    ColumnDescriptor::new("created_at", ColumnType::Timestamp)
                        .role(ColumnRole::CreateDate),
                )
                .column(
                    ColumnDescriptor::new("deleted_at", ColumnType::Timestamp)
                        .nullable()
                        .role(ColumnRole::DeleteDate),
                )
                .relation(
                    RelationDescriptor::many_to_many("tags", "Tag")
                        .junction(JunctionTable::simple("post_tags", "post_id", "tag_id"))
                        .cascade(Cascade::save()),
                )
                .build(),
        )
        .with(
            EntityMetadata::builder("Tag")
                .column(ColumnDescriptor::primary(
                    "id",
                    ColumnType::Uuid,
                    Generation::Uuid,
                ))
                .column(ColumnDescriptor::new("name", ColumnType::Text))
                .build(),
        )
}

/// Access tokens owning a required one-to-one link to their user
pub fn account_registry() -> MetadataRegistry {
    MetadataRegistry::new()
        .with(
            EntityMetadata::builder("User")
                .column(ColumnDescriptor::primary(
                    "id",
                    ColumnType::Int,
                    Generation::Increment,
                ))
                .column(ColumnDescriptor::new("name", ColumnType::Text))
                .build(),
        )
        .with(
            EntityMetadata::builder("AccessToken")
                .column(ColumnDescriptor::primary(
                    "id",
                    ColumnType::Int,
                    Generation::Increment,
                ))
                .column(ColumnDescriptor::new("token", ColumnType::Text))
                .relation(
                    RelationDescriptor::one_to_one("user", "User")
                        .cascade(Cascade::insert_only())
                        .not_null(),
                )
                .build(),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    ClosureTable,
    NestedSet,
    MaterializedPath,
}

pub const ENCODINGS: [Encoding; 3] = [
    Encoding::ClosureTable,
    Encoding::NestedSet,
    Encoding::MaterializedPath,
];

/// A self-referencing `Category` tree stored with `encoding`
pub fn category_registry(encoding: Encoding) -> MetadataRegistry {
    let builder: EntityMetadataBuilder = EntityMetadata::builder("Category")
        .column(ColumnDescriptor::primary(
            "id",
            ColumnType::Int,
            Generation::Increment,
        ))
        .column(ColumnDescriptor::new("name", ColumnType::Text))
        .relation(RelationDescriptor::many_to_one("parent", "Category").tree_parent())
        .relation(
            RelationDescriptor::one_to_many("children", "Category", "parent").tree_children(),
        );
    let builder = match encoding {
        Encoding::ClosureTable => builder.closure_table(),
        Encoding::NestedSet => builder.nested_set(),
        Encoding::MaterializedPath => builder.materialized_path(),
    };
    MetadataRegistry::new().with(builder.build())
}

pub fn memory_source(registry: MetadataRegistry) -> (MemoryDriver, DataSource) {
    let driver = MemoryDriver::new();
    let source = DataSource::new(registry, Arc::new(driver.clone())).unwrap();
    (driver, source)
}

/// Add a category below `parent` (or as a root) without saving it
pub fn category(graph: &mut EntityGraph, name: &str, parent: Option<NodeId>) -> NodeId {
    let node = graph.add(Entity::new("Category").with("name", name));
    if let Some(parent) = parent {
        graph.relate(node, "parent", parent);
    }
    node
}

pub fn names(graph: &EntityGraph, nodes: &[NodeId]) -> Vec<String> {
    let mut names: Vec<String> = nodes
        .iter()
        .filter_map(|&node| graph.entity(node).get("name"))
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Keeps every batch of committed events it is handed
#[derive(Debug, Default)]
pub struct Recorder {
    batches: Mutex<Vec<Vec<CommittedEvent>>>,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Vec<CommittedEvent>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<Vec<EventKind>> {
        self.batches()
            .iter()
            .map(|batch| batch.iter().map(|event| event.kind).collect())
            .collect()
    }
}

impl Subscriber for Recorder {
    fn after_commit(&self, events: &[CommittedEvent]) -> Result<()> {
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// Fails on every notification
#[derive(Debug, Default)]
pub struct Failing;

impl Subscriber for Failing {
    fn after_commit(&self, _events: &[CommittedEvent]) -> Result<()> {
        Err(StrataError::persistence("after_commit", "subscriber down"))
    }
}

pub const BLOG_DDL: &str = "
    CREATE TABLE post (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        text TEXT,
        version INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE TABLE tag (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE post_tags (
        post_id INTEGER NOT NULL REFERENCES post(id),
        tag_id TEXT NOT NULL REFERENCES tag(id),
        PRIMARY KEY (post_id, tag_id)
    );
";

pub const CATEGORY_CLOSURE_DDL: &str = "
    CREATE TABLE category (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES category(id)
    );
    CREATE TABLE category_closure (
        ancestor_id INTEGER NOT NULL REFERENCES category(id),
        descendant_id INTEGER NOT NULL REFERENCES category(id),
        PRIMARY KEY (ancestor_id, descendant_id)
    );
";
