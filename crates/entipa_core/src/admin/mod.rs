//! Persistence units and the context that holds them.

mod context;
mod unit;

pub use context::{work, PersistenceContext, PersistenceWork, WorkFn, WorkOutcome};
pub use unit::PersistenceAdmin;
