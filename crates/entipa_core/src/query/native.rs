//! Single-use raw queries with JPA result semantics.

use super::connection::QueryConnection;
use super::sql::SqlQuery;
use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::{Paging, Row, Value};
use std::fmt;
use tracing::{debug, error};

/// Maps one result row to a result value.
pub type RowMapper<R> = fn(&Row) -> PersistenceResult<R>;

/// A raw statement that runs at most once.
///
/// Once `get_result_list`, `get_single_result` or `execute_update` has run,
/// the query is closed: a later `get_result_list` returns an empty list and
/// a later `get_single_result` fails with `NoResult`. Neither re-executes
/// the statement.
pub struct NativeQuery<'c, R> {
    conn: QueryConnection<'c>,
    sql: SqlQuery,
    paging: Paging,
    mapper: RowMapper<R>,
    closed: bool,
}

impl<'c, R> NativeQuery<'c, R> {
    /// Prepares `sql` on `conn`, mapping rows with `mapper`.
    ///
    /// # Errors
    ///
    /// Returns `Query` if the statement cannot be prepared.
    pub fn new(
        mut conn: QueryConnection<'c>,
        sql: &str,
        mapper: RowMapper<R>,
    ) -> PersistenceResult<Self> {
        let sql = SqlQuery::prepare(conn.get()?, sql)?;
        Ok(Self {
            conn,
            sql,
            paging: Paging::default(),
            mapper,
            closed: false,
        })
    }

    /// Returns true once the query has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.sql.text()
    }

    /// Binds the parameter at one-based `position`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for position 0 or a position beyond the
    /// statement's parameter count.
    pub fn set_parameter_at(
        &mut self,
        position: usize,
        value: impl Into<Value>,
    ) -> PersistenceResult<&mut Self> {
        self.sql.set_parameter_at(position, value.into())?;
        Ok(self)
    }

    /// Binds the named parameter `:name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the statement has no such name.
    pub fn set_parameter(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> PersistenceResult<&mut Self> {
        self.sql.set_parameter(name, value.into())?;
        Ok(self)
    }

    /// Skips the first `first` rows.
    pub fn set_first_result(&mut self, first: u64) -> &mut Self {
        self.paging.offset = Some(first);
        self
    }

    /// Returns at most `max` rows.
    pub fn set_max_results(&mut self, max: u64) -> &mut Self {
        self.paging.limit = Some(max);
        self
    }

    fn run(&mut self) -> PersistenceResult<Vec<R>> {
        self.closed = true;
        let rows = self.sql.query(self.conn.get()?, self.paging)?;
        rows.iter().map(self.mapper).collect()
    }

    /// Runs the query and returns every result.
    ///
    /// Returns an empty list if the query has already run.
    ///
    /// # Errors
    ///
    /// Returns the execution or mapping error.
    pub fn get_result_list(&mut self) -> PersistenceResult<Vec<R>> {
        if self.closed {
            debug!(query = self.text(), "result list requested from closed query");
            return Ok(Vec::new());
        }
        self.run()
    }

    /// Runs the query and returns its first result.
    ///
    /// # Errors
    ///
    /// Returns `NoResult` if the query has already run or returns no rows.
    /// An execution error is logged and carried as the cause.
    pub fn get_single_result(&mut self) -> PersistenceResult<R> {
        if self.closed {
            return Err(PersistenceError::no_result(self.text()));
        }
        match self.run() {
            Ok(results) => results
                .into_iter()
                .next()
                .ok_or_else(|| PersistenceError::no_result(self.text())),
            Err(e) => {
                error!(query = self.text(), error = %e, "single result query failed");
                Err(PersistenceError::NoResult {
                    query: self.text().to_string(),
                    cause: Some(Box::new(e)),
                })
            }
        }
    }

    /// Runs the statement as an update, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the query has already run, or the
    /// execution error.
    pub fn execute_update(&mut self) -> PersistenceResult<u64> {
        if self.closed {
            return Err(PersistenceError::invalid_operation(format!(
                "query already executed: {}",
                self.text()
            )));
        }
        self.closed = true;
        self.sql.execute(self.conn.get()?)
    }
}

impl<R> fmt::Debug for NativeQuery<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeQuery")
            .field("sql", &self.sql.text())
            .field("paging", &self.paging)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Row mapper returning the row itself.
pub fn raw_row(row: &Row) -> PersistenceResult<Row> {
    Ok(row.clone())
}
