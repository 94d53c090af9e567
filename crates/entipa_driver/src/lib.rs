//! # Entipa Driver
//!
//! Connection and statement abstractions consumed by the entipa persistence
//! engine.
//!
//! This crate is the lowest layer of entipa. It knows how to open
//! connections, toggle auto-commit, create savepoints, build raw statements
//! and run them. It knows nothing about managed entities, transactions
//! spanning several statements, or persistence units.
//!
//! ## Design Principles
//!
//! - Connections are exclusively owned by one caller at a time (`Send`, not `Sync`)
//! - Connection sources are shared across threads (`Send + Sync`)
//! - Statement text is built here, never in the engine
//! - Errors are reported as [`DriverError`] and wrapped by the engine
//!
//! ## Available Sources
//!
//! - [`MemoryConnectionSource`] - Recording in-memory driver for tests and
//!   ephemeral units
//!
//! ## Example
//!
//! ```rust
//! use entipa_driver::{Connection, ConnectionSource, MemoryConnectionSource, Value};
//!
//! let source = MemoryConnectionSource::new();
//! let mut conn = source.read_write_connection().unwrap();
//! let affected = conn.execute("DELETE FROM folders WHERE id = ?", &[Value::Integer(7)]).unwrap();
//! assert_eq!(affected, 0);
//! source.release_connection(conn).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod statement;
mod value;

pub use connection::{Connection, ConnectionId, ConnectionSource, Savepoint};
pub use error::{DriverError, DriverResult};
pub use memory::{DriverEvent, MemoryConnection, MemoryConnectionSource, MemoryDriverConfig};
pub use statement::{
    delete_sql, inspect, insert_sql, paged_sql, update_sql, Arg, Paging, Select, StatementInfo,
};
pub use value::{Row, Value};
