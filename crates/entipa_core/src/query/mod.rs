//! Query execution.
//!
//! - [`DaoQuery`]: typed queries from reusable SELECT descriptors, paged
//!   per call
//! - [`NativeQuery`]: single-use raw statements with positional and named
//!   parameters
//! - [`NamedQueryRegistry`]: descriptors registered by name per unit

mod connection;
mod dao;
mod named;
mod native;
mod sql;

pub use connection::{PooledConnection, QueryConnection};
pub use dao::DaoQuery;
pub use named::{NamedQuery, NamedQueryRegistry, QueryFactory, QueryForAllGenerator};
pub use native::{raw_row, NativeQuery, RowMapper};
pub use sql::SqlQuery;
