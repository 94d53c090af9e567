//! Transactions that track managed entities and flush them at commit.

use super::state::{TransactionMode, TransactionState, TransactionStatus};
use crate::entity::EntityStore;
use crate::error::{BoxError, PersistenceError, PersistenceResult, PostCommitFailure};
use crate::types::{TransactionId, TransactionIdGenerator};
use entipa_driver::{update_sql, Connection, ConnectionSource, Value};
use std::sync::Arc;
use tracing::debug;

/// The transaction surface handed to application code.
pub trait EntityTransaction {
    /// Starts the transaction.
    fn begin(&mut self) -> PersistenceResult<()>;

    /// Flushes and commits the transaction.
    fn commit(&mut self) -> PersistenceResult<()>;

    /// Rolls back the transaction.
    fn rollback(&mut self) -> PersistenceResult<()>;

    /// Marks the transaction so that it can only be rolled back.
    fn set_rollback_only(&mut self) -> PersistenceResult<()>;

    /// Returns true if the transaction is marked rollback-only.
    fn rollback_only(&self) -> bool;

    /// Returns true while the transaction is active.
    fn is_active(&self) -> bool;
}

/// A transaction paired with the store of the entities it manages.
///
/// Commit flushes every dirty entity as an UPDATE on the transaction's
/// connection before the physical commit. Rollback discards the store
/// without writing anything.
#[derive(Debug)]
pub struct MonitoredTransaction {
    state: TransactionState,
    store: EntityStore,
}

impl MonitoredTransaction {
    /// Creates an inactive transaction on `source`.
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        ids: Arc<TransactionIdGenerator>,
        mode: TransactionMode,
    ) -> Self {
        Self {
            state: TransactionState::new(source, ids, mode),
            store: EntityStore::new(),
        }
    }

    /// Returns the transaction status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.state.mode()
    }

    /// Returns the ID of the current or last transaction.
    #[must_use]
    pub fn id(&self) -> Option<TransactionId> {
        self.state.id()
    }

    /// Returns the entity store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Returns the entity store for mutation.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    /// Returns the connection and the store together.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no transaction is active.
    pub fn parts(&mut self) -> PersistenceResult<(&mut dyn Connection, &mut EntityStore)> {
        let conn = self.state.connection()?;
        Ok((conn, &mut self.store))
    }

    /// Returns the connection of the active transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no transaction is active.
    pub fn connection(&mut self) -> PersistenceResult<&mut dyn Connection> {
        self.state.connection()
    }

    /// Registers work to run after the next successful commit.
    pub fn register_post_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.state.register_post_commit(hook);
    }

    /// Returns and clears the failures of post-commit work.
    pub fn take_post_commit_failures(&mut self) -> Vec<PostCommitFailure> {
        self.state.take_post_commit_failures()
    }
}

impl EntityTransaction for MonitoredTransaction {
    fn begin(&mut self) -> PersistenceResult<()> {
        self.state.begin()
    }

    fn commit(&mut self) -> PersistenceResult<()> {
        let store = &mut self.store;
        let was_active = self.state.is_active();
        let result = self.state.commit(|conn| flush(store, conn));
        if was_active {
            self.store.release();
        }
        result
    }

    fn rollback(&mut self) -> PersistenceResult<()> {
        let was_active = self.state.is_active();
        let result = self.state.rollback();
        if was_active {
            self.store.release();
        }
        result
    }

    fn set_rollback_only(&mut self) -> PersistenceResult<()> {
        self.state.set_rollback_only()
    }

    fn rollback_only(&self) -> bool {
        self.state.rollback_only()
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Writes every dirty entity of `store` through `conn`.
fn flush(store: &mut EntityStore, conn: &mut dyn Connection) -> PersistenceResult<()> {
    let dirty = store.objects_to_update();
    debug!(count = dirty.len(), "flushing dirty entities");
    for entity in dirty {
        let key_column = entity.key_column_name();
        let (columns, mut params): (Vec<&str>, Vec<Value>) = entity
            .column_values()
            .into_iter()
            .filter(|(column, _)| *column != key_column)
            .unzip();
        params.push(entity.identity().primary_key().to_value());
        let sql = update_sql(entity.kind(), &columns, key_column);
        conn.execute(&sql, &params)
            .map_err(|e| PersistenceError::query(sql.clone(), e))?;
    }
    Ok(())
}

/// A view of a transaction that cannot change its boundaries.
///
/// `begin`, `commit` and `rollback` do nothing; the rollback-only flag and
/// activity still reach the wrapped transaction. Lets a caller veto a
/// commit it does not control.
pub struct SetRollbackTransaction<'t> {
    inner: &'t mut dyn EntityTransaction,
}

impl<'t> SetRollbackTransaction<'t> {
    /// Wraps a transaction.
    pub fn new(inner: &'t mut dyn EntityTransaction) -> Self {
        Self { inner }
    }
}

impl EntityTransaction for SetRollbackTransaction<'_> {
    fn begin(&mut self) -> PersistenceResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> PersistenceResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> PersistenceResult<()> {
        Ok(())
    }

    fn set_rollback_only(&mut self) -> PersistenceResult<()> {
        self.inner.set_rollback_only()
    }

    fn rollback_only(&self) -> bool {
        self.inner.rollback_only()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}
