//! Typed queries built from reusable SELECT descriptors.

use super::connection::QueryConnection;
use crate::entity::Entity;
use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::{Paging, Select, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A query returning entities of type `T`.
///
/// Every call to [`get_result_list`](Self::get_result_list) renders and
/// runs a fresh statement for its row window; nothing is cached between
/// windows. Driver failures are wrapped as `Query` errors naming the
/// query.
pub struct DaoQuery<'c, T> {
    name: String,
    conn: QueryConnection<'c>,
    select: Select,
    bindings: HashMap<String, Value>,
    _entity: PhantomData<fn() -> T>,
}

impl<'c, T: Entity> DaoQuery<'c, T> {
    /// Creates a query named `name` running `select` on `conn`.
    pub fn new(name: impl Into<String>, conn: QueryConnection<'c>, select: Select) -> Self {
        Self {
            name: name.into(),
            conn,
            select,
            bindings: HashMap::new(),
            _entity: PhantomData,
        }
    }

    /// Returns the query name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Select {
        &self.select
    }

    /// Binds a named placeholder of the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the descriptor has no such placeholder.
    pub fn set_parameter(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> PersistenceResult<&mut Self> {
        if !self.select.placeholder_names().any(|n| n == name) {
            return Err(PersistenceError::invalid_parameter(&self.name, name));
        }
        self.bindings.insert(name.to_string(), value.into());
        Ok(self)
    }

    /// Returns the results in the window starting at `start` with at most
    /// `max` rows. `None` leaves the descriptor's own window in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unbound placeholder, `Query` if
    /// the statement fails, or `EntityMapping` if a row cannot be mapped.
    pub fn get_result_list(
        &mut self,
        start: Option<u64>,
        max: Option<u64>,
    ) -> PersistenceResult<Vec<T>> {
        let own = self.select.paging();
        let paging = Paging::new(start.or(own.offset), max.or(own.limit));
        let select = self.select.clone().with_paging(paging);

        let bindings = &self.bindings;
        let params = select
            .parameters(|name| bindings.get(name).cloned())
            .map_err(|unbound| {
                PersistenceError::invalid_parameter(&self.name, format!("{unbound} (unbound)"))
            })?;

        let sql = select.to_sql();
        let rows = self
            .conn
            .get()?
            .query(&sql, &params)
            .map_err(|e| PersistenceError::query(&self.name, e))?;
        rows.iter().map(T::from_row).collect()
    }

    /// Returns every result.
    ///
    /// # Errors
    ///
    /// See [`get_result_list`](Self::get_result_list).
    pub fn get_all(&mut self) -> PersistenceResult<Vec<T>> {
        self.get_result_list(None, None)
    }

    /// Returns the first result of the query limited to one row.
    ///
    /// # Errors
    ///
    /// Returns `NoResult` if the query returns no rows, or any error of
    /// [`get_result_list`](Self::get_result_list).
    pub fn get_single_result(&mut self) -> PersistenceResult<T> {
        self.get_result_list(None, Some(1))?
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::no_result(&self.name))
    }
}

impl<T> fmt::Debug for DaoQuery<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaoQuery")
            .field("name", &self.name)
            .field("select", &self.select)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}
