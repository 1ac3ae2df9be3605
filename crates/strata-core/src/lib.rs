//! Strata Core - persistence model and change computation
//!
//! This crate holds everything of the persistence layer that needs no I/O:
//! - Entity metadata, the explicit metadata registry and its validation
//! - Dynamic values, entity instances and the arena entity graph
//! - Identity resolution and row mapping
//! - Change-set computation for save/remove/soft-remove/recover
//! - A dialect-free query AST shared with the query runners
//! - Tree traversal fragments for closure-table, nested-set and
//!   materialized-path encodings, plus tree materialization
//! - Find criteria, post-commit notification contracts, errors and logging

pub mod changeset;
pub mod criteria;
pub mod errors;
pub mod events;
pub mod logging_facility;
pub mod model;
pub mod query;
pub mod tree;

pub use changeset::{
    collect_reachable, compute_changes, Change, ChangeOperation, ChangeSet, OperationKind,
};
pub use criteria::{Condition, FindInput, FindOptions, SortDirection};
pub use errors::{ExError, ExErrorKind, Result, StrataError};
pub use events::{CommittedEvent, EventKind, Subscriber};
pub use model::{
    identity_of, Entity, EntityGraph, EntityIdentity, EntityMetadata, MetadataRegistry, NodeId,
    Row, Value,
};
pub use tree::{TreeNode, TreeQueryBuilder};
