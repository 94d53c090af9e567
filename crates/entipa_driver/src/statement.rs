//! Raw statement building.
//!
//! The engine never writes SQL text itself. Statement text for entity
//! reads and writes is produced here from table and column names, and raw
//! statements are inspected here for their parameter layout.

use crate::value::Value;
use std::fmt::Write as _;

/// Row window applied to a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Maximum rows to return.
    pub limit: Option<u64>,
}

impl Paging {
    /// Creates a window.
    #[must_use]
    pub const fn new(offset: Option<u64>, limit: Option<u64>) -> Self {
        Self { offset, limit }
    }

    /// Returns true if the window does not restrict the result.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.offset.is_none() && self.limit.is_none()
    }
}

/// A filter argument: a literal value or a named placeholder bound later.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A value known when the descriptor is built.
    Value(Value),
    /// A placeholder resolved by name before execution.
    Named(String),
}

/// A reusable SELECT descriptor.
///
/// # Example
///
/// ```rust
/// use entipa_driver::{Select, Value};
///
/// let select = Select::new("nodes")
///     .where_eq("parent_id", Value::Integer(1))
///     .order_by("name", true)
///     .limit(10);
/// assert_eq!(
///     select.to_sql(),
///     "SELECT * FROM nodes WHERE parent_id = ? ORDER BY name ASC LIMIT 10"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    filters: Vec<(String, Arg)>,
    order_by: Vec<(String, bool)>,
    paging: Paging,
}

impl Select {
    /// Creates a descriptor selecting every column of `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            paging: Paging::default(),
        }
    }

    /// Adds an equality filter on a literal value.
    #[must_use]
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push((column.into(), Arg::Value(value)));
        self
    }

    /// Adds an equality filter on a named placeholder.
    #[must_use]
    pub fn where_named(mut self, column: impl Into<String>, name: impl Into<String>) -> Self {
        self.filters.push((column.into(), Arg::Named(name.into())));
        self
    }

    /// Adds an ORDER BY term.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.paging.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.paging.offset = Some(offset);
        self
    }

    /// Replaces the row window.
    #[must_use]
    pub const fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the filter terms.
    #[must_use]
    pub fn filters(&self) -> &[(String, Arg)] {
        &self.filters
    }

    /// Returns the names of all placeholders, in filter order.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().filter_map(|(_, arg)| match arg {
            Arg::Named(name) => Some(name.as_str()),
            Arg::Value(_) => None,
        })
    }

    /// Returns the row window.
    #[must_use]
    pub const fn paging(&self) -> Paging {
        self.paging
    }

    /// Renders the statement text.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT * FROM {}", self.table);
        for (i, (column, _)) in self.filters.iter().enumerate() {
            let joiner = if i == 0 { " WHERE" } else { " AND" };
            let _ = write!(sql, "{joiner} {column} = ?");
        }
        for (i, (column, ascending)) in self.order_by.iter().enumerate() {
            let joiner = if i == 0 { " ORDER BY" } else { "," };
            let dir = if *ascending { "ASC" } else { "DESC" };
            let _ = write!(sql, "{joiner} {column} {dir}");
        }
        paged_sql(&sql, self.paging)
    }

    /// Resolves the filter arguments to positional parameters.
    ///
    /// Returns the name of the first placeholder `resolve` cannot bind.
    pub fn parameters<F>(&self, mut resolve: F) -> Result<Vec<Value>, String>
    where
        F: FnMut(&str) -> Option<Value>,
    {
        self.filters
            .iter()
            .map(|(_, arg)| match arg {
                Arg::Value(v) => Ok(v.clone()),
                Arg::Named(name) => resolve(name).ok_or_else(|| name.clone()),
            })
            .collect()
    }
}

/// Appends a LIMIT/OFFSET clause to a statement.
#[must_use]
pub fn paged_sql(sql: &str, paging: Paging) -> String {
    let mut out = sql.to_string();
    match (paging.limit, paging.offset) {
        (Some(limit), Some(offset)) => {
            let _ = write!(out, " LIMIT {limit} OFFSET {offset}");
        }
        (Some(limit), None) => {
            let _ = write!(out, " LIMIT {limit}");
        }
        (None, Some(offset)) => {
            let _ = write!(out, " LIMIT -1 OFFSET {offset}");
        }
        (None, None) => {}
    }
    out
}

/// Renders an INSERT statement for the given columns.
#[must_use]
pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    let marks = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {table} ({}) VALUES ({marks})", columns.join(", "))
}

/// Renders an UPDATE statement setting `columns` on the row matching `key_column`.
///
/// Parameters are the column values in order, followed by the key.
#[must_use]
pub fn update_sql(table: &str, columns: &[&str], key_column: &str) -> String {
    let sets = columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {sets} WHERE {key_column} = ?")
}

/// Renders a DELETE statement for the row matching `key_column`.
#[must_use]
pub fn delete_sql(table: &str, key_column: &str) -> String {
    format!("DELETE FROM {table} WHERE {key_column} = ?")
}

/// Parameter layout of a raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementInfo {
    /// Statement text with every named placeholder rewritten to `?`.
    pub sql: String,
    /// Name of each parameter, in position order; `None` for `?` parameters.
    pub names: Vec<Option<String>>,
}

impl StatementInfo {
    /// Returns the number of parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.names.len()
    }

    /// Returns the zero-based positions bound by a named parameter.
    #[must_use]
    pub fn positions_of(&self, name: &str) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.as_deref() == Some(name))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Parses the parameter layout of a raw statement.
///
/// `?` is a positional parameter and `:name` a named one. Quoted text and
/// `::` casts are left alone.
#[must_use]
pub fn inspect(sql: &str) -> StatementInfo {
    let mut out = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut in_quote = false;
    let mut prev = '\0';

    while let Some(c) = chars.next() {
        if in_quote {
            out.push(c);
            if c == '\'' {
                in_quote = false;
            }
            prev = c;
            continue;
        }
        match c {
            '\'' => {
                in_quote = true;
                out.push(c);
            }
            '?' => {
                names.push(None);
                out.push(c);
            }
            ':' if prev != ':'
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                names.push(Some(name));
                out.push('?');
            }
            _ => out.push(c),
        }
        prev = c;
    }

    StatementInfo { sql: out, names }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_without_filters() {
        assert_eq!(Select::new("folders").to_sql(), "SELECT * FROM folders");
    }

    #[test]
    fn select_with_paging() {
        let sql = Select::new("folders").offset(20).limit(10).to_sql();
        assert_eq!(sql, "SELECT * FROM folders LIMIT 10 OFFSET 20");
    }

    #[test]
    fn select_parameters_resolve_named() {
        let select = Select::new("nodes")
            .where_eq("level", Value::Integer(2))
            .where_named("name", "n");
        let params = select
            .parameters(|name| (name == "n").then(|| Value::from("x")))
            .unwrap();
        assert_eq!(params, vec![Value::Integer(2), Value::from("x")]);
    }

    #[test]
    fn select_parameters_report_unbound() {
        let select = Select::new("nodes").where_named("name", "n");
        assert_eq!(select.parameters(|_| None), Err("n".to_string()));
    }

    #[test]
    fn write_statements() {
        assert_eq!(
            insert_sql("nodes", &["id", "name"]),
            "INSERT INTO nodes (id, name) VALUES (?, ?)"
        );
        assert_eq!(
            update_sql("nodes", &["name", "parent_id"], "id"),
            "UPDATE nodes SET name = ?, parent_id = ? WHERE id = ?"
        );
        assert_eq!(delete_sql("nodes", "id"), "DELETE FROM nodes WHERE id = ?");
    }

    #[test]
    fn inspect_positional() {
        let info = inspect("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(info.parameter_count(), 2);
        assert!(info.names.iter().all(Option::is_none));
    }

    #[test]
    fn inspect_named_rewrites_text() {
        let info = inspect("UPDATE t SET a = :value WHERE id = :id AND tag = ':skip' AND x::int = 1");
        assert_eq!(
            info.sql,
            "UPDATE t SET a = ? WHERE id = ? AND tag = ':skip' AND x::int = 1"
        );
        assert_eq!(info.positions_of("value"), vec![0]);
        assert_eq!(info.positions_of("id"), vec![1]);
        assert_eq!(info.parameter_count(), 2);
    }

    #[test]
    fn inspect_repeated_name() {
        let info = inspect("SELECT * FROM t WHERE a = :v OR b = :v");
        assert_eq!(info.positions_of("v"), vec![0, 1]);
    }
}
