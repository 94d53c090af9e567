//! Raw statements with positional and named parameter binding.

use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::{paged_sql, Connection, Paging, Row, StatementInfo, Value};

/// A prepared raw statement and its bound parameters.
///
/// Positions are one-based, as in JDBC. Binding an unknown position or
/// name fails immediately, before anything is executed.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    text: String,
    info: StatementInfo,
    params: Vec<Option<Value>>,
}

impl SqlQuery {
    /// Prepares `sql` on `conn`.
    ///
    /// # Errors
    ///
    /// Returns `Query` if the driver rejects the statement.
    pub fn prepare(conn: &mut dyn Connection, sql: &str) -> PersistenceResult<Self> {
        let info = conn
            .prepare(sql)
            .map_err(|e| PersistenceError::query(sql, e))?;
        let params = vec![None; info.parameter_count()];
        Ok(Self {
            text: sql.to_string(),
            info,
            params,
        })
    }

    /// Returns the statement as written.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Binds the parameter at one-based `position`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `position` is 0 or beyond the
    /// statement's parameter count.
    pub fn set_parameter_at(&mut self, position: usize, value: Value) -> PersistenceResult<()> {
        match position.checked_sub(1).and_then(|i| self.params.get_mut(i)) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(PersistenceError::invalid_parameter(&self.text, position)),
        }
    }

    /// Binds every occurrence of the named parameter `:name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the statement has no such name.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> PersistenceResult<()> {
        let positions = self.info.positions_of(name);
        if positions.is_empty() {
            return Err(PersistenceError::invalid_parameter(&self.text, name));
        }
        for i in positions {
            self.params[i] = Some(value.clone());
        }
        Ok(())
    }

    fn bound(&self) -> PersistenceResult<Vec<Value>> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.clone().ok_or_else(|| {
                    let parameter = match &self.info.names[i] {
                        Some(name) => format!(":{name} (unbound)"),
                        None => format!("{} (unbound)", i + 1),
                    };
                    PersistenceError::invalid_parameter(&self.text, parameter)
                })
            })
            .collect()
    }

    /// Runs the statement as a query within a row window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if a parameter is unbound, or `Query` if
    /// execution fails.
    pub fn query(&self, conn: &mut dyn Connection, paging: Paging) -> PersistenceResult<Vec<Row>> {
        let params = self.bound()?;
        let sql = paged_sql(&self.info.sql, paging);
        conn.query(&sql, &params)
            .map_err(|e| PersistenceError::query(&self.text, e))
    }

    /// Runs the statement as an update, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if a parameter is unbound, or `Query` if
    /// execution fails.
    pub fn execute(&self, conn: &mut dyn Connection) -> PersistenceResult<u64> {
        let params = self.bound()?;
        conn.execute(&self.info.sql, &params)
            .map_err(|e| PersistenceError::query(&self.text, e))
    }
}
