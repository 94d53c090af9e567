//! Transaction state machine.

use super::guard::ConnectionGuard;
use crate::error::{BoxError, PersistenceError, PersistenceResult, PostCommitFailure};
use crate::types::{TransactionId, TransactionIdGenerator};
use entipa_driver::{Connection, ConnectionSource};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not started, or ended and not restarted.
    Inactive,
    /// Started and usable.
    Active,
    /// Started, but may only be rolled back.
    RollbackOnly,
    /// Ended by a successful commit.
    Committed,
    /// Ended by a rollback.
    RolledBack,
}

/// Who controls the transaction's boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// The engine begins and commits; illegal calls are errors.
    #[default]
    Contained,
    /// The caller begins and commits; illegal calls are ignored.
    User,
}

/// Work run after a successful physical commit.
pub type PostCommitHook = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// The begin / commit / rollback / rollback-only state machine.
///
/// Each `begin` activates a fresh [`ConnectionGuard`]; every way out of
/// the transaction releases it.
pub struct TransactionState {
    source: Arc<dyn ConnectionSource>,
    ids: Arc<TransactionIdGenerator>,
    mode: TransactionMode,
    status: TransactionStatus,
    id: Option<TransactionId>,
    guard: Option<ConnectionGuard>,
    post_commit: Vec<PostCommitHook>,
    post_commit_failures: Vec<PostCommitFailure>,
}

impl TransactionState {
    /// Creates an inactive transaction on `source`.
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        ids: Arc<TransactionIdGenerator>,
        mode: TransactionMode,
    ) -> Self {
        Self {
            source,
            ids,
            mode,
            status: TransactionStatus::Inactive,
            id: None,
            guard: None,
            post_commit: Vec::new(),
            post_commit_failures: Vec::new(),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns the ID of the current or last transaction.
    #[must_use]
    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    /// Returns true while the transaction is active or rollback-only.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Active | TransactionStatus::RollbackOnly
        )
    }

    /// Returns true if the transaction is marked rollback-only.
    #[must_use]
    pub fn rollback_only(&self) -> bool {
        self.status == TransactionStatus::RollbackOnly
    }

    /// Starts a transaction.
    ///
    /// In user mode a `begin` on an active transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` in contained mode if a transaction is
    /// already active, or `Connection` if no connection can be prepared.
    pub fn begin(&mut self) -> PersistenceResult<()> {
        if self.is_active() {
            return self.illegal("begin", "transaction already active");
        }
        let id = self.ids.next_id();
        let guard = ConnectionGuard::activate(Arc::clone(&self.source), id)?;
        self.id = Some(id);
        self.guard = Some(guard);
        self.status = TransactionStatus::Active;
        self.post_commit_failures.clear();
        debug!(transaction = %id, mode = ?self.mode, "transaction begun");
        Ok(())
    }

    /// Registers work to run after the next successful commit.
    pub fn register_post_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.post_commit.push(Box::new(hook));
    }

    /// Commits the transaction.
    ///
    /// `pre_commit` runs first on the transaction's connection; the physical
    /// commit happens only if it succeeds. After the commit the post-commit
    /// hooks run, and their failures are kept apart from the commit result
    /// (see [`take_post_commit_failures`](Self::take_post_commit_failures)).
    ///
    /// # Errors
    ///
    /// Returns `RollbackOnly` if the transaction was marked rollback-only
    /// (it has been rolled back), the pre-commit error, or the commit
    /// error. In every error case the transaction is rolled back.
    pub fn commit<F>(&mut self, pre_commit: F) -> PersistenceResult<()>
    where
        F: FnOnce(&mut dyn Connection) -> PersistenceResult<()>,
    {
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::RollbackOnly => {
                let transaction = self.describe();
                self.finish_rollback();
                return Err(PersistenceError::RollbackOnly { transaction });
            }
            _ => return self.illegal("commit", "no active transaction"),
        }

        let Some(guard) = self.guard.as_mut() else {
            return Err(PersistenceError::invalid_operation("active transaction has no connection"));
        };
        let result = guard
            .connection()
            .and_then(pre_commit)
            .and_then(|()| guard.commit());

        if let Err(e) = result {
            error!(transaction = %self.describe(), error = %e, "commit failed, rolling back");
            self.finish_rollback();
            return Err(e);
        }

        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
        self.status = TransactionStatus::Committed;
        debug!(transaction = %self.describe(), "transaction committed");
        self.run_post_commit();
        Ok(())
    }

    fn run_post_commit(&mut self) {
        for hook in std::mem::take(&mut self.post_commit) {
            if let Err(e) = hook() {
                let failure = PostCommitFailure::new(e);
                warn!(transaction = %self.describe(), error = %failure, "post-commit work failed");
                self.post_commit_failures.push(failure);
            }
        }
    }

    /// Returns and clears the failures of post-commit work.
    pub fn take_post_commit_failures(&mut self) -> Vec<PostCommitFailure> {
        std::mem::take(&mut self.post_commit_failures)
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` in contained mode if no transaction is
    /// active. Driver failures during rollback are logged; the connection is
    /// released either way.
    pub fn rollback(&mut self) -> PersistenceResult<()> {
        if !self.is_active() {
            return self.illegal("rollback", "no active transaction");
        }
        self.finish_rollback();
        debug!(transaction = %self.describe(), "transaction rolled back");
        Ok(())
    }

    fn finish_rollback(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if let Err(e) = guard.rollback() {
                error!(transaction = %self.describe(), error = %e, "rollback failed");
            }
            guard.release();
        }
        self.post_commit.clear();
        self.status = TransactionStatus::RolledBack;
    }

    /// Marks the transaction so that it can only be rolled back.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` in contained mode if the transaction is
    /// not active.
    pub fn set_rollback_only(&mut self) -> PersistenceResult<()> {
        if self.status != TransactionStatus::Active {
            return self.illegal("set_rollback_only", "transaction not active");
        }
        self.status = TransactionStatus::RollbackOnly;
        Ok(())
    }

    /// Returns the connection of the active transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no transaction is active.
    pub fn connection(&mut self) -> PersistenceResult<&mut dyn Connection> {
        match self.guard.as_mut() {
            Some(guard) => guard.connection(),
            None => Err(PersistenceError::invalid_operation("no active transaction")),
        }
    }

    fn illegal(&self, operation: &str, reason: &str) -> PersistenceResult<()> {
        match self.mode {
            TransactionMode::User => {
                debug!(operation, reason, "ignoring call on user transaction");
                Ok(())
            }
            TransactionMode::Contained => Err(PersistenceError::invalid_operation(format!(
                "{operation}: {reason}"
            ))),
        }
    }

    fn describe(&self) -> String {
        self.id
            .map_or_else(|| "unstarted".to_string(), |id| id.to_string())
    }
}

impl Drop for TransactionState {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(transaction = %self.describe(), "transaction dropped while active, rolling back");
            self.finish_rollback();
        }
    }
}

impl fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionState")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
