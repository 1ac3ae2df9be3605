//! In-process store
//!
//! Tables are created on first insert. A transaction takes the writer lock and
//! keeps a copy of the whole database; rollback puts the copy back. Statements
//! run outside a transaction wait for any open transaction to finish.

mod eval;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::errors::StrataError;
use strata_core::model::Row;
use strata_core::query::{
    DeleteStatement, InsertResult, InsertStatement, SelectQuery, UpdateStatement,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::errors::{lock_poisoned, Result};
use crate::runner::{Driver, IsolationLevel, QueryRunner};
use eval::Database;

#[derive(Debug, Default)]
struct Faults {
    insert_tables: BTreeSet<String>,
    rollback: bool,
}

#[derive(Debug, Default)]
struct Shared {
    database: Mutex<Database>,
    writer: Arc<tokio::sync::Mutex<()>>,
    faults: Mutex<Faults>,
    statements: AtomicU64,
}

/// Driver over an in-process database; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert into `table` fail until faults are cleared
    pub fn fail_on_insert(&self, table: &str) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.insert_tables.insert(table.to_string());
        }
    }

    /// Make rollbacks report a failure (the data is still restored)
    pub fn fail_rollback(&self, enabled: bool) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.rollback = enabled;
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            *faults = Faults::default();
        }
    }

    /// Number of statements executed through any runner of this driver
    pub fn statement_count(&self) -> u64 {
        self.shared.statements.load(Ordering::SeqCst)
    }

    /// Current rows of `table` in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.shared
            .database
            .lock()
            .map(|db| {
                db.tables
                    .get(table)
                    .map(|t| t.rows.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_runner(&self) -> Box<dyn QueryRunner> {
        Box::new(MemoryRunner {
            shared: Arc::clone(&self.shared),
            tx: None,
            released: false,
        })
    }
}

struct MemoryTransaction {
    _writer: OwnedMutexGuard<()>,
    snapshot: Database,
}

pub struct MemoryRunner {
    shared: Arc<Shared>,
    tx: Option<MemoryTransaction>,
    released: bool,
}

impl MemoryRunner {
    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(StrataError::RunnerReleased);
        }
        Ok(())
    }

    async fn run<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Database) -> Result<T> + Send,
    ) -> Result<T> {
        self.ensure_open()?;
        self.shared.statements.fetch_add(1, Ordering::SeqCst);
        let _writer = match self.tx {
            Some(_) => None,
            None => Some(Arc::clone(&self.shared.writer).lock_owned().await),
        };
        let mut db = self.shared.database.lock().map_err(|_| lock_poisoned(op))?;
        f(&mut *db)
    }

    fn insert_fault(&self, table: &str) -> Result<bool> {
        let faults = self
            .shared
            .faults
            .lock()
            .map_err(|_| lock_poisoned("insert"))?;
        Ok(faults.insert_tables.contains(table))
    }

    fn rollback_fault(&self) -> Result<bool> {
        let faults = self
            .shared
            .faults
            .lock()
            .map_err(|_| lock_poisoned("rollback"))?;
        Ok(faults.rollback)
    }
}

#[async_trait]
impl QueryRunner for MemoryRunner {
    fn is_transaction_active(&self) -> bool {
        self.tx.is_some()
    }

    fn is_released(&self) -> bool {
        self.released
    }

    async fn begin_transaction(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(StrataError::TransactionAlreadyStarted);
        }
        let writer = Arc::clone(&self.shared.writer).lock_owned().await;
        let snapshot = self
            .shared
            .database
            .lock()
            .map_err(|_| lock_poisoned("begin_transaction"))?
            .clone();
        debug!(
            isolation = isolation.map(|i| i.as_str()).unwrap_or("default"),
            "memory transaction started"
        );
        self.tx = Some(MemoryTransaction {
            _writer: writer,
            snapshot,
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.tx.take().ok_or(StrataError::TransactionNotStarted)?;
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        let tx = self.tx.take().ok_or(StrataError::TransactionNotStarted)?;
        let fault = self.rollback_fault()?;
        {
            let mut db = self
                .shared
                .database
                .lock()
                .map_err(|_| lock_poisoned("rollback_transaction"))?;
            *db = tx.snapshot;
        }
        debug!("memory transaction rolled back");
        if fault {
            return Err(StrataError::persistence(
                "rollback",
                "injected rollback failure",
            ));
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if self.tx.is_some() {
            if let Err(err) = self.rollback_transaction().await {
                warn!(error = %err, "rollback during release failed");
            }
        }
        self.released = true;
        Ok(())
    }

    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertResult> {
        self.ensure_open()?;
        if self.insert_fault(&statement.table)? {
            return Err(StrataError::persistence(
                "insert",
                format!("injected failure on insert into {}", statement.table),
            ));
        }
        self.run("insert", |db| db.insert(statement)).await
    }

    async fn update(&mut self, statement: &UpdateStatement) -> Result<u64> {
        self.run("update", |db| db.update(statement)).await
    }

    async fn delete(&mut self, statement: &DeleteStatement) -> Result<u64> {
        self.run("delete", |db| db.delete(statement)).await
    }

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>> {
        self.run("select", |db| db.select(query)).await
    }
}
