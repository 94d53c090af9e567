//! Managed entities and the per-transaction entity store.

mod key;
mod model;
mod store;

pub use key::{ManagedEntityKey, PrimaryKey};
pub use model::{integer_column, optional_integer_column, text_column, Entity, ManagedEntity};
pub use store::EntityStore;
