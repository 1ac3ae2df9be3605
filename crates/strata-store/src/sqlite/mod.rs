//! SQLite store over a single shared `rusqlite` connection
//!
//! A transaction holds the connection lock from BEGIN until COMMIT or ROLLBACK;
//! statements outside a transaction take the lock for their own duration.

mod render;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use strata_core::errors::StrataError;
use strata_core::model::{Generation, Row, Value};
use strata_core::query::{
    DeleteStatement, InsertResult, InsertStatement, SelectQuery, UpdateStatement,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::errors::{sqlite_op, Result};
use crate::runner::{Driver, IsolationLevel, QueryRunner};

#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_connection(db::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(db::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run schema statements (DDL) outside any runner
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql).map_err(sqlite_op("execute_batch"))
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_runner(&self) -> Box<dyn QueryRunner> {
        Box::new(SqliteRunner {
            conn: Arc::clone(&self.conn),
            tx: None,
            released: false,
        })
    }
}

pub struct SqliteRunner {
    conn: Arc<Mutex<Connection>>,
    tx: Option<OwnedMutexGuard<Connection>>,
    released: bool,
}

impl SqliteRunner {
    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(StrataError::RunnerReleased);
        }
        Ok(())
    }

    // The connection is !Sync; no borrow of it may live across an await.
    async fn with_conn<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T> + Send,
    ) -> Result<T> {
        self.ensure_open()?;
        if self.tx.is_none() {
            let guard = Arc::clone(&self.conn).lock_owned().await;
            return f(&*guard);
        }
        match &self.tx {
            Some(guard) => f(&**guard),
            None => Err(StrataError::TransactionNotStarted),
        }
    }
}

fn finish(guard: OwnedMutexGuard<Connection>, sql: &str, op: &'static str) -> Result<()> {
    guard.execute_batch(sql).map_err(sqlite_op(op))
}

#[async_trait]
impl QueryRunner for SqliteRunner {
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
        let guard = Arc::clone(&self.conn).lock_owned().await;
        let read_uncommitted = isolation == Some(IsolationLevel::ReadUncommitted);
        guard
            .pragma_update(None, "read_uncommitted", read_uncommitted)
            .map_err(sqlite_op("begin_transaction"))?;
        let begin = match isolation {
            Some(IsolationLevel::Serializable) => "BEGIN IMMEDIATE",
            _ => "BEGIN",
        };
        guard
            .execute_batch(begin)
            .map_err(sqlite_op("begin_transaction"))?;
        debug!(statement = begin, "sqlite transaction started");
        self.tx = Some(guard);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        let guard = self.tx.take().ok_or(StrataError::TransactionNotStarted)?;
        if let Err(err) = guard.execute_batch("COMMIT") {
            if let Err(rollback) = guard.execute_batch("ROLLBACK") {
                warn!(error = %rollback, "rollback after failed commit failed");
            }
            return Err(sqlite_op("commit_transaction")(err));
        }
        debug!("sqlite transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        let guard = self.tx.take().ok_or(StrataError::TransactionNotStarted)?;
        finish(guard, "ROLLBACK", "rollback_transaction")?;
        debug!("sqlite transaction rolled back");
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if let Some(guard) = self.tx.take() {
            if let Err(err) = finish(guard, "ROLLBACK", "release") {
                warn!(error = %err, "rollback during release failed");
            }
        }
        self.released = true;
        Ok(())
    }

    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertResult> {
        // SQLite has no uuid generator; missing uuid columns are filled here and
        // null placeholders for generated columns are left to the store.
        let mut prepared = statement.clone();
        for column in &statement.returning {
            let missing = prepared
                .values
                .get(&column.column)
                .map_or(true, Value::is_null);
            if !missing {
                continue;
            }
            match column.generation {
                Generation::Uuid => {
                    prepared
                        .values
                        .insert(column.column.clone(), Value::Uuid(Uuid::new_v4()));
                }
                _ => {
                    prepared.values.remove(&column.column);
                }
            }
        }
        let rendered = render::insert(&prepared);
        let columns: Vec<String> = prepared
            .returning
            .iter()
            .map(|c| c.column.clone())
            .collect();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(&rendered.sql)
                .map_err(sqlite_op("insert"))?;
            let mut rows = stmt
                .query(params_from_iter(rendered.params.iter()))
                .map_err(sqlite_op("insert"))?;
            let mut generated = Row::new();
            if let Some(row) = rows.next().map_err(sqlite_op("insert"))? {
                for (index, column) in columns.iter().enumerate() {
                    let value = row.get_ref(index).map_err(sqlite_op("insert"))?;
                    generated.insert(column.clone(), render::from_sql_value(value));
                }
            }
            Ok(InsertResult { generated })
        })
        .await
    }

    async fn update(&mut self, statement: &UpdateStatement) -> Result<u64> {
        let rendered = render::update(statement);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(&rendered.sql)
                .map_err(sqlite_op("update"))?;
            let affected = stmt
                .execute(params_from_iter(rendered.params.iter()))
                .map_err(sqlite_op("update"))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn delete(&mut self, statement: &DeleteStatement) -> Result<u64> {
        let rendered = render::delete(statement);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(&rendered.sql)
                .map_err(sqlite_op("delete"))?;
            let affected = stmt
                .execute(params_from_iter(rendered.params.iter()))
                .map_err(sqlite_op("delete"))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>> {
        let rendered = render::select(query);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(&rendered.sql)
                .map_err(sqlite_op("select"))?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt
                .query(params_from_iter(rendered.params.iter()))
                .map_err(sqlite_op("select"))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(sqlite_op("select"))? {
                let mut record = Row::new();
                for (index, name) in names.iter().enumerate() {
                    let value = row.get_ref(index).map_err(sqlite_op("select"))?;
                    record.insert(name.clone(), render::from_sql_value(value));
                }
                out.push(record);
            }
            Ok(out)
        })
        .await
    }
}
