//! The entity mapping trait.

use super::key::{ManagedEntityKey, PrimaryKey};
use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::{Row, Value};
use std::any::Any;

/// A persistent record type.
///
/// Implemented once per entity type in place of runtime property
/// introspection: the implementation names the table and its key, and
/// converts between the struct and a row.
///
/// # Example
///
/// ```rust
/// use entipa_core::entity::{integer_column, text_column, Entity, PrimaryKey};
/// use entipa_core::PersistenceResult;
/// use entipa_driver::{Row, Value};
///
/// #[derive(Clone)]
/// struct Folder {
///     id: i64,
///     title: String,
/// }
///
/// impl Entity for Folder {
///     fn entity_type() -> &'static str {
///         "folders"
///     }
///
///     fn primary_key(&self) -> PrimaryKey {
///         PrimaryKey::Integer(self.id)
///     }
///
///     fn to_columns(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("title", self.title.as_str().into())]
///     }
///
///     fn from_row(row: &Row) -> PersistenceResult<Self> {
///         Ok(Self {
///             id: integer_column(row, "folders", "id")?,
///             title: text_column(row, "folders", "title")?,
///         })
///     }
/// }
/// ```
pub trait Entity: Any + Send + Clone {
    /// Returns the entity type, which is also its table name.
    fn entity_type() -> &'static str;

    /// Returns the primary key column.
    fn key_column() -> &'static str {
        "id"
    }

    /// Returns this instance's primary key.
    fn primary_key(&self) -> PrimaryKey;

    /// Returns every column value, the key column included.
    fn to_columns(&self) -> Vec<(&'static str, Value)>;

    /// Builds an instance from a row.
    ///
    /// # Errors
    ///
    /// Returns `EntityMapping` if a required column is missing or has the
    /// wrong type.
    fn from_row(row: &Row) -> PersistenceResult<Self>;

    /// Returns the managed identity of this instance.
    fn managed_key(&self) -> ManagedEntityKey {
        ManagedEntityKey::new(Self::entity_type(), self.primary_key())
    }
}

/// Object-safe view of an [`Entity`], as held by the entity store.
pub trait ManagedEntity: Send {
    /// Returns the entity type.
    fn kind(&self) -> &'static str;

    /// Returns the primary key column.
    fn key_column_name(&self) -> &'static str;

    /// Returns the managed identity.
    fn identity(&self) -> ManagedEntityKey;

    /// Returns every column value.
    fn column_values(&self) -> Vec<(&'static str, Value)>;

    /// Upcasts for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Upcasts for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> ManagedEntity for T {
    fn kind(&self) -> &'static str {
        T::entity_type()
    }

    fn key_column_name(&self) -> &'static str {
        T::key_column()
    }

    fn identity(&self) -> ManagedEntityKey {
        self.managed_key()
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        self.to_columns()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn column<'r>(row: &'r Row, entity_type: &str, name: &str) -> PersistenceResult<&'r Value> {
    row.get_by_name(name)
        .ok_or_else(|| PersistenceError::entity_mapping(entity_type, format!("missing column {name}")))
}

/// Reads a required integer column.
///
/// # Errors
///
/// Returns `EntityMapping` if the column is missing or not an integer.
pub fn integer_column(row: &Row, entity_type: &str, name: &str) -> PersistenceResult<i64> {
    column(row, entity_type, name)?
        .as_integer()
        .ok_or_else(|| PersistenceError::entity_mapping(entity_type, format!("column {name} is not an integer")))
}

/// Reads a nullable integer column. A missing column reads as `None`.
///
/// # Errors
///
/// Returns `EntityMapping` if the column holds a non-integer value.
pub fn optional_integer_column(
    row: &Row,
    entity_type: &str,
    name: &str,
) -> PersistenceResult<Option<i64>> {
    match row.get_by_name(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_integer().map(Some).ok_or_else(|| {
            PersistenceError::entity_mapping(entity_type, format!("column {name} is not an integer"))
        }),
    }
}

/// Reads a required text column.
///
/// # Errors
///
/// Returns `EntityMapping` if the column is missing or not text.
pub fn text_column(row: &Row, entity_type: &str, name: &str) -> PersistenceResult<String> {
    column(row, entity_type, name)?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| PersistenceError::entity_mapping(entity_type, format!("column {name} is not text")))
}
