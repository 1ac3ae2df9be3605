//! Post-commit notification contract

use serde::Serialize;
use strata_core_types::UnitOfWorkId;

use crate::changeset::ChangeOperation;
use crate::errors::Result;
use crate::model::EntityIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Inserted,
    Updated,
    Removed,
    SoftRemoved,
    Recovered,
}

impl EventKind {
    pub fn of(operation: &ChangeOperation) -> Self {
        match operation {
            ChangeOperation::Insert { .. } => EventKind::Inserted,
            ChangeOperation::Update { .. } => EventKind::Updated,
            ChangeOperation::Delete { .. } => EventKind::Removed,
            ChangeOperation::SoftDelete { .. } => EventKind::SoftRemoved,
            ChangeOperation::Recover { .. } => EventKind::Recovered,
        }
    }
}

/// One write that is part of a committed unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommittedEvent {
    pub kind: EventKind,
    pub target: String,
    /// Identity after the write (generated keys included)
    pub identity: Option<EntityIdentity>,
    pub unit_of_work: UnitOfWorkId,
}

/// Receives the events of every committed unit of work
///
/// Called after commit; an error is logged by the caller and never undoes
/// the commit.
pub trait Subscriber: Send + Sync {
    /// # Errors
    ///
    /// Any failure of the callback.
    fn after_commit(&self, events: &[CommittedEvent]) -> Result<()>;
}
