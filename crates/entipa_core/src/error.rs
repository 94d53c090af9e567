//! Error types for the persistence engine.

use entipa_driver::DriverError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Boxed error type returned by application callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Driver error not attributed to a connection or query.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No persistence unit is registered under the name.
    #[error("persistence unit not found: {unit}")]
    UnitNotFound {
        /// Requested unit name.
        unit: String,
    },

    /// The persistence unit has been closed.
    #[error("persistence unit closed: {unit}")]
    UnitClosed {
        /// Unit name.
        unit: String,
    },

    /// A named resource could not be located.
    #[error("resource not found: {name}")]
    ResourceNotFound {
        /// Resource name.
        name: String,
    },

    /// A unit configuration value cannot be used.
    #[error("invalid configuration for unit {unit}: {key} = {value:?}")]
    InvalidConfiguration {
        /// Unit name.
        unit: String,
        /// Configuration key.
        key: String,
        /// Rejected value.
        value: String,
    },

    /// A connection could not be opened or prepared for a transaction.
    #[error("connection error: {message}")]
    Connection {
        /// What was being attempted.
        message: String,
        /// Underlying driver failure.
        #[source]
        source: DriverError,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Commit was requested on a transaction marked rollback-only.
    #[error("transaction {transaction} is marked rollback-only and was rolled back")]
    RollbackOnly {
        /// Transaction description.
        transaction: String,
    },

    /// An entity was removed from a store that does not manage it.
    #[error("entity not managed: {key}")]
    EntityNotManaged {
        /// Entity key description.
        key: String,
    },

    /// A row could not be mapped to an entity.
    #[error("cannot map {entity_type} from row: {message}")]
    EntityMapping {
        /// Entity type.
        entity_type: String,
        /// Description of the problem.
        message: String,
    },

    /// A named query was requested for a different entity type.
    #[error("query {query} returns {actual}, not {requested}")]
    EntityTypeMismatch {
        /// Query name.
        query: String,
        /// Entity type the query was registered for.
        actual: String,
        /// Entity type requested by the caller.
        requested: String,
    },

    /// No named query is registered under the name.
    #[error("named query not found: {query}")]
    QueryNotFound {
        /// Requested query name.
        query: String,
    },

    /// A query failed to prepare or execute.
    #[error("query {query} failed: {source}")]
    Query {
        /// Query name or statement text.
        query: String,
        /// Underlying driver failure.
        #[source]
        source: DriverError,
    },

    /// A parameter position or name does not exist in the statement.
    #[error("invalid parameter {parameter} for query {query}")]
    InvalidParameter {
        /// Query name or statement text.
        query: String,
        /// Offending position or name.
        parameter: String,
    },

    /// A single result was requested but none is available.
    #[error("no result for query {query}")]
    NoResult {
        /// Query name or statement text.
        query: String,
        /// Execution failure that led to the missing result, if any.
        #[source]
        cause: Option<Box<PersistenceError>>,
    },

    /// A schema script could not be opened or read.
    #[error("script {file} failed: {source}")]
    Script {
        /// Script file name.
        file: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A unit of work failed on the worker pool.
    #[error("task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },

    /// A unit of work was cancelled before it started.
    #[error("task cancelled before it started")]
    TaskCancelled,

    /// A wait timed out.
    #[error("timed out waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
    },

    /// The worker pool no longer accepts work.
    #[error("executor is shut down")]
    ExecutorShutdown,
}

impl PersistenceError {
    /// Creates a unit not found error.
    pub fn unit_not_found(unit: impl Into<String>) -> Self {
        Self::UnitNotFound { unit: unit.into() }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>, source: DriverError) -> Self {
        Self::Connection {
            message: message.into(),
            source,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an entity mapping error.
    pub fn entity_mapping(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EntityMapping {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(query: impl Into<String>, source: DriverError) -> Self {
        Self::Query {
            query: query.into(),
            source,
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(query: impl Into<String>, parameter: impl ToString) -> Self {
        Self::InvalidParameter {
            query: query.into(),
            parameter: parameter.to_string(),
        }
    }

    /// Creates a no result error.
    pub fn no_result(query: impl Into<String>) -> Self {
        Self::NoResult {
            query: query.into(),
            cause: None,
        }
    }

    /// Creates a task failure.
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Returns true for configuration errors, which are never retried.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnitNotFound { .. }
                | Self::ResourceNotFound { .. }
                | Self::InvalidConfiguration { .. }
                | Self::UnitClosed { .. }
                | Self::QueryNotFound { .. }
        )
    }
}

/// A failure in work registered to run after a successful commit.
///
/// Kept apart from commit errors: the commit it follows has succeeded.
#[derive(Debug)]
pub struct PostCommitFailure {
    /// Human-readable description.
    pub message: String,
    /// The failure raised by the callback.
    pub error: BoxError,
}

impl PostCommitFailure {
    /// Wraps a callback error.
    ///
    /// Engine errors keep their own message; anything else is reported as
    /// an unexpected failure.
    #[must_use]
    pub fn new(error: BoxError) -> Self {
        let message = match error.downcast_ref::<PersistenceError>() {
            Some(e) => e.to_string(),
            None => format!("unexpected failure: {error}"),
        };
        Self { message, error }
    }
}

impl std::fmt::Display for PostCommitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
