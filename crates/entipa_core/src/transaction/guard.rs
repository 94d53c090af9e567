//! Scoped ownership of one physical connection for one transaction.

use crate::error::{PersistenceError, PersistenceResult};
use crate::types::TransactionId;
use entipa_driver::{Connection, ConnectionSource, DriverError, DriverResult, Savepoint};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Prefix of the savepoint each transaction creates.
pub const SAVEPOINT_PREFIX: &str = "ENTIPA_SP_";

/// Owns one physical connection for the lifetime of one transaction.
///
/// Activation opens a read/write connection and tries to pin it as the
/// source's special connection. Auto-commit is suspended and a savepoint
/// created when the connection could not be pinned, or when the database
/// emulates nested transactions with savepoints.
///
/// # Invariants
///
/// - A savepoint exists iff auto-commit was excluded at activation
/// - `release` restores the auto-commit state seen at activation, unpins
///   the connection and returns it to the source, exactly once
/// - Dropping the guard releases it, so every exit path is covered
pub struct ConnectionGuard {
    source: Arc<dyn ConnectionSource>,
    connection: Option<Box<dyn Connection>>,
    special_connection_saved: bool,
    nested_savepoints_supported: bool,
    auto_commit_at_start: Option<bool>,
    savepoint: Option<Savepoint>,
    savepoint_name: String,
}

impl ConnectionGuard {
    /// Opens a connection and prepares it for transaction `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the connection cannot be opened, or if
    /// pinning, auto-commit suspension or savepoint creation fails. In the
    /// latter cases the guard has already been released.
    pub fn activate(
        source: Arc<dyn ConnectionSource>,
        transaction_id: TransactionId,
    ) -> PersistenceResult<Self> {
        let connection = source.read_write_connection().map_err(|e| {
            PersistenceError::connection(format!("cannot open connection to {}", source.url()), e)
        })?;

        let mut guard = Self {
            source,
            connection: Some(connection),
            special_connection_saved: false,
            nested_savepoints_supported: false,
            auto_commit_at_start: None,
            savepoint: None,
            savepoint_name: format!("{SAVEPOINT_PREFIX}{}", transaction_id.as_u64()),
        };

        if let Err(e) = guard.prepare() {
            error!(transaction = %transaction_id, error = %e, "transaction activation failed");
            guard.release();
            return Err(PersistenceError::connection(
                format!("cannot begin transaction {transaction_id}"),
                e,
            ));
        }

        debug!(
            transaction = %transaction_id,
            special = guard.special_connection_saved,
            savepoint = guard.savepoint.is_some(),
            "transaction connection activated"
        );
        Ok(guard)
    }

    fn prepare(&mut self) -> DriverResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(DriverError::Closed);
        };

        self.special_connection_saved = self.source.save_special_connection(conn.id())?;
        self.nested_savepoints_supported = self.source.nested_savepoints_supported();
        if self.special_connection_saved && !self.nested_savepoints_supported {
            return Ok(());
        }

        let auto_commit = conn.is_auto_commit()?;
        if auto_commit {
            conn.set_auto_commit(false)?;
        }
        self.auto_commit_at_start = Some(auto_commit);
        self.savepoint = Some(conn.set_savepoint(&self.savepoint_name)?);
        Ok(())
    }

    /// Returns true if auto-commit had to be suspended for this transaction.
    #[must_use]
    pub fn exclude_auto_commit(&self) -> bool {
        !self.special_connection_saved || self.nested_savepoints_supported
    }

    /// Returns true until the guard is released.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns true if the connection was pinned as the special connection.
    #[must_use]
    pub fn special_connection_saved(&self) -> bool {
        self.special_connection_saved
    }

    /// Returns the transaction's savepoint, if one was created.
    #[must_use]
    pub fn savepoint(&self) -> Option<&Savepoint> {
        self.savepoint.as_ref()
    }

    /// Returns the name used for the savepoint.
    #[must_use]
    pub fn savepoint_name(&self) -> &str {
        &self.savepoint_name
    }

    /// Returns the auto-commit state seen at activation, if it was recorded.
    #[must_use]
    pub fn auto_commit_at_start(&self) -> Option<bool> {
        self.auto_commit_at_start
    }

    /// Returns the connection for statement execution.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the guard has been released.
    pub fn connection(&mut self) -> PersistenceResult<&mut dyn Connection> {
        match self.connection.as_mut() {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(released()),
        }
    }

    /// Commits the transaction's work.
    ///
    /// With a savepoint the savepoint is released first. The physical
    /// commit always happens here, so the work is durable once this
    /// returns and restoring auto-commit on release commits nothing.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the driver refuses the commit.
    pub fn commit(&mut self) -> PersistenceResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(released());
        };
        let result = match &self.savepoint {
            Some(savepoint) => conn
                .release_savepoint(savepoint)
                .and_then(|()| conn.commit()),
            None => conn.commit(),
        };
        result.map_err(|e| PersistenceError::connection("commit failed", e))?;
        self.savepoint = None;
        Ok(())
    }

    /// Rolls back the transaction's work.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the driver refuses the rollback.
    pub fn rollback(&mut self) -> PersistenceResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(released());
        };
        let result = match &self.savepoint {
            Some(savepoint) => conn.rollback_to_savepoint(savepoint),
            None => conn.rollback(),
        };
        result.map_err(|e| PersistenceError::connection("rollback failed", e))?;
        self.savepoint = None;
        Ok(())
    }

    /// Restores the connection and returns it to the source.
    ///
    /// Work still guarded by a savepoint is rolled back first, so restoring
    /// auto-commit never commits an unfinished transaction.
    ///
    /// Safe to call more than once; only the first call has an effect.
    /// Failures are logged, never raised, since release runs on error
    /// paths.
    pub fn release(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        let mut discarded = true;
        if let Some(savepoint) = self.savepoint.take() {
            warn!(savepoint = savepoint.name(), "releasing unfinished transaction, rolling back");
            if let Err(e) = conn.rollback_to_savepoint(&savepoint) {
                warn!(connection = %conn.id(), error = %e, "cannot roll back to savepoint");
                if let Err(e) = conn.rollback() {
                    warn!(connection = %conn.id(), error = %e, "cannot roll back transaction");
                    discarded = false;
                }
            }
        }

        // Restoring auto-commit would commit work that could not be rolled
        // back; the source discards it when the connection is returned.
        if let Some(auto_commit) = self.auto_commit_at_start.take() {
            if auto_commit && discarded {
                if let Err(e) = conn.set_auto_commit(true) {
                    warn!(connection = %conn.id(), error = %e, "cannot restore auto-commit");
                }
            }
        }
        if self.special_connection_saved {
            self.source.clear_special_connection(conn.id());
            self.special_connection_saved = false;
        }

        let id = conn.id();
        match self.source.release_connection(conn) {
            Ok(()) => debug!(connection = %id, "transaction connection released"),
            Err(e) => warn!(connection = %id, error = %e, "cannot release connection"),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .field("special_connection_saved", &self.special_connection_saved)
            .field("nested_savepoints_supported", &self.nested_savepoints_supported)
            .field("auto_commit_at_start", &self.auto_commit_at_start)
            .field("savepoint", &self.savepoint)
            .finish()
    }
}

fn released() -> PersistenceError {
    PersistenceError::invalid_operation("transaction connection already released")
}
