//! Transaction lifecycle
//!
//! [`EntityManager::transaction`] binds one runner to a manager for the
//! duration of a closure. Units of work inside share that runner and its
//! transaction; their events are held back until the commit succeeds.

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use strata_core::errors::{Result, StrataError};
use strata_core::events::{CommittedEvent, Subscriber};
use strata_core::{log_op_end, log_op_error, log_op_start};
use strata_store::{IsolationLevel, QueryRunner};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info_span, warn, Instrument};

use crate::manager::EntityManager;

/// The runner and the held-back events of one open transaction
pub(crate) struct TransactionScope {
    runner: Arc<Mutex<Box<dyn QueryRunner>>>,
    pending: std::sync::Mutex<Vec<CommittedEvent>>,
}

impl TransactionScope {
    fn new(runner: Box<dyn QueryRunner>) -> Self {
        Self {
            runner: Arc::new(Mutex::new(runner)),
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn lock(&self) -> OwnedMutexGuard<Box<dyn QueryRunner>> {
        Arc::clone(&self.runner).lock_owned().await
    }

    /// Hold events of a unit of work until the transaction commits
    pub(crate) fn defer(&self, events: Vec<CommittedEvent>) {
        match self.pending.lock() {
            Ok(mut pending) => pending.extend(events),
            Err(_) => warn!(dropped = events.len(), "pending event list poisoned"),
        }
    }

    fn take(&self) -> Vec<CommittedEvent> {
        self.pending
            .lock()
            .map(|mut pending| mem::take(&mut *pending))
            .unwrap_or_default()
    }
}

/// A runner borrowed for one call
pub(crate) enum RunnerHandle {
    /// Created for this call; the caller owns its transaction and release
    Owned(Box<dyn QueryRunner>),
    /// The enclosing transaction's runner
    Shared(OwnedMutexGuard<Box<dyn QueryRunner>>),
}

impl RunnerHandle {
    pub(crate) fn runner(&mut self) -> &mut dyn QueryRunner {
        match self {
            RunnerHandle::Owned(runner) => &mut **runner,
            RunnerHandle::Shared(guard) => &mut ***guard,
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, RunnerHandle::Owned(_))
    }

    /// Release an owned runner; a shared one goes back to its transaction
    pub(crate) async fn finish(self) {
        if let RunnerHandle::Owned(mut runner) = self {
            release_quietly(runner.as_mut()).await;
        }
    }
}

/// Roll back if a transaction is open; a failure is logged, never returned
pub(crate) async fn rollback_quietly(runner: &mut dyn QueryRunner) {
    if !runner.is_transaction_active() {
        return;
    }
    if let Err(err) = runner.rollback_transaction().await {
        warn!(error = %err, "rollback failed; keeping the original error");
    }
}

async fn release_quietly(runner: &mut dyn QueryRunner) {
    if let Err(err) = runner.release().await {
        warn!(error = %err, "runner release failed");
    }
}

/// Hand committed events to every subscriber; failures are logged
pub(crate) fn notify(subscribers: &[Arc<dyn Subscriber>], events: &[CommittedEvent]) {
    if events.is_empty() {
        return;
    }
    for subscriber in subscribers {
        if let Err(err) = subscriber.after_commit(events) {
            warn!(error = %err, events = events.len(), "subscriber failed after commit");
        }
    }
}

impl EntityManager {
    /// Run `work` inside one transaction
    ///
    /// `work` receives a transactional manager; everything it saves or loads
    /// goes through the same runner. `Ok` commits, `Err` rolls back, and the
    /// runner is released either way. Subscribers see the events of the
    /// whole transaction once, after commit.
    ///
    /// Managers outside the transaction wait for it to finish before they
    /// reach the store, so `work` must only use the manager it is given.
    ///
    /// # Errors
    ///
    /// `TransactionAlreadyStarted` when called on a transactional manager;
    /// otherwise the error of `work`, of begin or of commit.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::FutureExt;
    ///
    /// manager
    ///     .transaction(None, |tx| {
    ///         async move {
    ///             tx.save(&mut graph, post).await?;
    ///             tx.save(&mut graph, comment).await?;
    ///             Ok(())
    ///         }
    ///         .boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<'a, T, F>(
        &self,
        isolation: Option<IsolationLevel>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(EntityManager) -> BoxFuture<'a, Result<T>>,
    {
        let isolation = isolation.or(self.context().options.isolation);
        let span = info_span!(
            "transaction",
            isolation = isolation.map(|i| i.as_str()).unwrap_or("default"),
        );

        async {
            log_op_start!("transaction");
            let start = Instant::now();

            let value = self.transaction_impl(isolation, work).await.map_err(|e| {
                log_op_error!(
                    "transaction",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                e
            })?;

            log_op_end!(
                "transaction",
                duration_ms = start.elapsed().as_millis() as u64
            );
            Ok(value)
        }
        .instrument(span)
        .await
    }

    async fn transaction_impl<'a, T, F>(
        &self,
        isolation: Option<IsolationLevel>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(EntityManager) -> BoxFuture<'a, Result<T>>,
    {
        if self.is_transactional() {
            return Err(StrataError::TransactionAlreadyStarted);
        }

        let mut runner = self.context().driver.create_runner();
        if let Err(err) = runner.begin_transaction(isolation).await {
            release_quietly(runner.as_mut()).await;
            return Err(err);
        }
        let scope = Arc::new(TransactionScope::new(runner));

        let result = work(self.scoped(Arc::clone(&scope))).await;

        let outcome = {
            let mut guard = scope.lock().await;
            let runner: &mut dyn QueryRunner = &mut **guard;
            let outcome = match result {
                Ok(value) => match runner.commit_transaction().await {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        rollback_quietly(runner).await;
                        Err(err)
                    }
                },
                Err(err) => {
                    rollback_quietly(runner).await;
                    Err(err)
                }
            };
            release_quietly(runner).await;
            outcome
        };

        if outcome.is_ok() {
            notify(&self.context().subscribers, &scope.take());
        }
        outcome
    }
}
