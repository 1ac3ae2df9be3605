//! Query execution contract
//!
//! A `Driver` hands out `QueryRunner`s. A runner is one execution context:
//! it runs statements, owns at most one transaction at a time and becomes
//! unusable once released.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::model::Row;
use strata_core::query::{
    DeleteStatement, InsertResult, InsertStatement, SelectQuery, UpdateStatement,
};

use crate::errors::Result;

/// Transaction isolation requested by the caller and passed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// One execution context against a store
///
/// Every statement method fails with `RunnerReleased` after `release`.
#[async_trait]
pub trait QueryRunner: Send {
    fn is_transaction_active(&self) -> bool;

    fn is_released(&self) -> bool;

    /// # Errors
    ///
    /// `TransactionAlreadyStarted` when a transaction is already open on this runner.
    async fn begin_transaction(&mut self, isolation: Option<IsolationLevel>) -> Result<()>;

    /// # Errors
    ///
    /// `TransactionNotStarted` without an open transaction.
    async fn commit_transaction(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// `TransactionNotStarted` without an open transaction.
    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Give the context back; an open transaction is rolled back
    async fn release(&mut self) -> Result<()>;

    /// Insert one row and return the store-generated values it asked for
    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertResult>;

    /// Returns the number of affected rows
    async fn update(&mut self, statement: &UpdateStatement) -> Result<u64>;

    /// Returns the number of affected rows
    async fn delete(&mut self, statement: &DeleteStatement) -> Result<u64>;

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>>;
}

/// Factory of query runners for one store
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_runner(&self) -> Box<dyn QueryRunner>;
}
