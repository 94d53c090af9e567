//! Transactions over pooled connections.
//!
//! A transaction owns one physical connection through a
//! [`ConnectionGuard`] from `begin` until it commits, rolls back or is
//! dropped:
//! - **Savepoints**: when the connection cannot be pinned, or the database
//!   nests transactions, work runs under a per-transaction savepoint
//! - **Auto-commit**: suspended for the transaction, restored on release
//! - **Managed entities**: dirty entities are flushed before the commit

mod guard;
mod monitored;
mod state;

pub use guard::{ConnectionGuard, SAVEPOINT_PREFIX};
pub use monitored::{EntityTransaction, MonitoredTransaction, SetRollbackTransaction};
pub use state::{PostCommitHook, TransactionMode, TransactionState, TransactionStatus};
