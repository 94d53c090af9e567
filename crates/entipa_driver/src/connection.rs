//! Connection and connection source traits.

use crate::error::DriverResult;
use crate::statement::{inspect, StatementInfo};
use crate::value::{Row, Value};
use std::fmt;

/// Identifies a physical connection handed out by a [`ConnectionSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a new connection ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// A named savepoint inside a physical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    /// Creates a savepoint handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One physical database connection.
///
/// Connections follow JDBC auto-commit semantics: while auto-commit is on,
/// every statement commits on its own; switching auto-commit back on
/// commits any pending work.
///
/// # Invariants
///
/// - A connection is used by one thread at a time
/// - `release_savepoint` keeps the work done since the savepoint
/// - `rollback_to_savepoint` discards only the work done since the savepoint
pub trait Connection: Send {
    /// Returns the connection's identity within its source.
    fn id(&self) -> ConnectionId;

    /// Returns true if the connection is in auto-commit mode.
    fn is_auto_commit(&self) -> DriverResult<bool>;

    /// Turns auto-commit on or off.
    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()>;

    /// Creates a named savepoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is in auto-commit mode or the
    /// database does not support savepoints.
    fn set_savepoint(&mut self, name: &str) -> DriverResult<Savepoint>;

    /// Releases a savepoint, keeping its work.
    fn release_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()>;

    /// Rolls back to a savepoint.
    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()>;

    /// Commits the physical transaction.
    fn commit(&mut self) -> DriverResult<()>;

    /// Rolls back the physical transaction.
    fn rollback(&mut self) -> DriverResult<()>;

    /// Inspects a statement without running it.
    ///
    /// The default implementation parses `?` and `:name` placeholders.
    fn prepare(&mut self, sql: &str) -> DriverResult<StatementInfo> {
        Ok(inspect(sql))
    }

    /// Runs a data-modifying statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64>;

    /// Runs a query, returning all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>>;
}

/// Hands out physical connections for one database.
///
/// Sources are shared by every transaction of a persistence unit and must
/// be `Send + Sync`.
pub trait ConnectionSource: Send + Sync {
    /// Opens (or borrows from a pool) a read/write connection.
    fn read_write_connection(&self) -> DriverResult<Box<dyn Connection>>;

    /// Opens (or borrows from a pool) a connection used only for reads.
    ///
    /// The default implementation returns a read/write connection.
    fn read_only_connection(&self) -> DriverResult<Box<dyn Connection>> {
        self.read_write_connection()
    }

    /// Returns a connection to the source.
    fn release_connection(&self, connection: Box<dyn Connection>) -> DriverResult<()>;

    /// Pins a connection for exclusive use by one transaction.
    ///
    /// Returns `false` if the source cannot pin connections, or if another
    /// connection is already pinned.
    fn save_special_connection(&self, connection: ConnectionId) -> DriverResult<bool>;

    /// Unpins a previously pinned connection.
    fn clear_special_connection(&self, connection: ConnectionId);

    /// Returns true if the database needs savepoints to emulate nested transactions.
    fn nested_savepoints_supported(&self) -> bool;

    /// Reads a property from the database's key/value property store.
    fn read_property(&self, key: &str) -> DriverResult<Option<String>>;

    /// Writes a property to the database's key/value property store.
    fn write_property(&self, key: &str, value: &str) -> DriverResult<()>;

    /// Returns a short description used in log and error messages.
    fn url(&self) -> String;

    /// Closes the source. Connections handed out later fail with `Closed`.
    fn close(&self) -> DriverResult<()>;

    /// Returns true once `close` has been called.
    fn is_closed(&self) -> bool;
}
