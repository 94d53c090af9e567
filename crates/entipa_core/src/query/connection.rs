//! Connections used by queries.

use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::{Connection, ConnectionSource};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A connection borrowed from a source outside any transaction.
///
/// Returned to the source when dropped, so a query result never outlives
/// its connection and callers need no explicit close.
pub struct PooledConnection {
    source: Arc<dyn ConnectionSource>,
    connection: Option<Box<dyn Connection>>,
}

impl PooledConnection {
    /// Borrows a read-only connection.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the source cannot supply one.
    pub fn read_only(source: Arc<dyn ConnectionSource>) -> PersistenceResult<Self> {
        let connection = source.read_only_connection().map_err(|e| {
            PersistenceError::connection(format!("cannot open connection to {}", source.url()), e)
        })?;
        Ok(Self {
            source,
            connection: Some(connection),
        })
    }

    /// Borrows a read/write connection.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the source cannot supply one.
    pub fn read_write(source: Arc<dyn ConnectionSource>) -> PersistenceResult<Self> {
        let connection = source.read_write_connection().map_err(|e| {
            PersistenceError::connection(format!("cannot open connection to {}", source.url()), e)
        })?;
        Ok(Self {
            source,
            connection: Some(connection),
        })
    }

    fn connection(&mut self) -> PersistenceResult<&mut dyn Connection> {
        match self.connection.as_mut() {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(PersistenceError::invalid_operation("connection already returned")),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            let id = conn.id();
            if let Err(e) = self.source.release_connection(conn) {
                warn!(connection = %id, error = %e, "cannot return pooled connection");
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .finish()
    }
}

/// The connection a query runs on.
pub enum QueryConnection<'c> {
    /// The connection of the caller's active transaction.
    Transaction(&'c mut dyn Connection),
    /// A connection borrowed for this query alone.
    Pooled(PooledConnection),
}

impl QueryConnection<'_> {
    /// Returns the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a pooled connection was already
    /// returned.
    pub fn get(&mut self) -> PersistenceResult<&mut dyn Connection> {
        match self {
            QueryConnection::Transaction(conn) => Ok(&mut **conn),
            QueryConnection::Pooled(pooled) => pooled.connection(),
        }
    }
}

impl fmt::Debug for QueryConnection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryConnection::Transaction(conn) => {
                f.debug_tuple("Transaction").field(&conn.id()).finish()
            }
            QueryConnection::Pooled(pooled) => f.debug_tuple("Pooled").field(pooled).finish(),
        }
    }
}

impl From<PooledConnection> for QueryConnection<'_> {
    fn from(pooled: PooledConnection) -> Self {
        QueryConnection::Pooled(pooled)
    }
}
