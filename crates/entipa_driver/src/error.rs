//! Error types for driver operations.

use std::io;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur while talking to the database driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database rejected a statement.
    #[error("SQL error: {message}")]
    Sql {
        /// Message reported by the database.
        message: String,
    },

    /// The connection or connection source is closed.
    #[error("connection is closed")]
    Closed,

    /// The driver does not support the requested operation.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the operation.
        operation: String,
    },

    /// A savepoint could not be created, released or rolled back to.
    #[error("savepoint {name} failed: {message}")]
    SavepointFailed {
        /// Savepoint name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

impl DriverError {
    /// Creates an SQL error.
    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates a savepoint failure.
    pub fn savepoint_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SavepointFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}
