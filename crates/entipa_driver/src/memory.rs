//! Recording in-memory driver.

use crate::connection::{Connection, ConnectionId, ConnectionSource, Savepoint};
use crate::error::{DriverError, DriverResult};
use crate::statement::Paging;
use crate::value::{Row, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Behaviour switches for a [`MemoryConnectionSource`].
#[derive(Debug, Clone)]
pub struct MemoryDriverConfig {
    /// Whether `save_special_connection` succeeds.
    pub pin_special: bool,
    /// Whether the database reports nested savepoint support.
    pub nested_savepoints: bool,
    /// Auto-commit state of freshly opened connections.
    pub initial_auto_commit: bool,
    /// Description returned by `url()`.
    pub url: String,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        Self {
            pin_special: true,
            nested_savepoints: true,
            initial_auto_commit: true,
            url: "memory:".to_string(),
        }
    }
}

impl MemoryDriverConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether connections can be pinned.
    #[must_use]
    pub fn pin_special(mut self, value: bool) -> Self {
        self.pin_special = value;
        self
    }

    /// Sets whether nested savepoints are reported as supported.
    #[must_use]
    pub fn nested_savepoints(mut self, value: bool) -> Self {
        self.nested_savepoints = value;
        self
    }

    /// Sets the auto-commit state of new connections.
    #[must_use]
    pub fn initial_auto_commit(mut self, value: bool) -> Self {
        self.initial_auto_commit = value;
        self
    }

    /// Sets the source description.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Everything a [`MemoryConnectionSource`] observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A connection was handed out.
    Opened {
        /// Connection.
        conn: ConnectionId,
    },
    /// Auto-commit was switched.
    AutoCommit {
        /// Connection.
        conn: ConnectionId,
        /// New value.
        value: bool,
    },
    /// A savepoint was created.
    SavepointSet {
        /// Connection.
        conn: ConnectionId,
        /// Savepoint name.
        name: String,
    },
    /// A savepoint was released.
    SavepointReleased {
        /// Connection.
        conn: ConnectionId,
        /// Savepoint name.
        name: String,
    },
    /// Work was rolled back to a savepoint.
    SavepointRolledBack {
        /// Connection.
        conn: ConnectionId,
        /// Savepoint name.
        name: String,
    },
    /// The physical transaction was committed.
    Committed {
        /// Connection.
        conn: ConnectionId,
    },
    /// The physical transaction was rolled back.
    RolledBack {
        /// Connection.
        conn: ConnectionId,
    },
    /// A data-modifying statement ran.
    Executed {
        /// Connection.
        conn: ConnectionId,
        /// Statement text.
        sql: String,
        /// Bound parameters.
        params: Vec<Value>,
    },
    /// A query ran.
    Queried {
        /// Connection.
        conn: ConnectionId,
        /// Statement text.
        sql: String,
        /// Bound parameters.
        params: Vec<Value>,
    },
    /// A connection was pinned.
    Pinned {
        /// Connection.
        conn: ConnectionId,
    },
    /// A pinned connection was released from its pin.
    Unpinned {
        /// Connection.
        conn: ConnectionId,
    },
    /// A connection was returned to the source.
    Released {
        /// Connection.
        conn: ConnectionId,
        /// Auto-commit state at the moment it was returned.
        auto_commit: bool,
    },
}

#[derive(Debug, Default)]
struct Shared {
    config: MemoryDriverConfig,
    next_id: AtomicU64,
    special: Mutex<Option<ConnectionId>>,
    events: Mutex<Vec<DriverEvent>>,
    committed: Mutex<Vec<String>>,
    responses: RwLock<Vec<(String, Vec<Row>)>>,
    update_counts: RwLock<Vec<(String, u64)>>,
    failures: RwLock<Vec<String>>,
    fail_savepoints: AtomicBool,
    fail_open: AtomicBool,
    fail_rollback: AtomicBool,
    fail_auto_commit: AtomicBool,
    properties: Mutex<HashMap<String, String>>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn record(&self, event: DriverEvent) {
        self.events.lock().push(event);
    }

    fn check_failure(&self, sql: &str) -> DriverResult<()> {
        if let Some(prefix) = self
            .failures
            .read()
            .iter()
            .find(|prefix| sql.starts_with(prefix.as_str()))
        {
            return Err(DriverError::sql(format!("injected failure for '{prefix}'")));
        }
        Ok(())
    }
}

/// An in-memory connection source that records every driver call.
///
/// This source is suitable for:
/// - Unit and integration tests of the engine
/// - Ephemeral units that never need real storage
///
/// Queries answer with rows registered through [`respond`](Self::respond),
/// matched by the longest registered statement prefix. A trailing
/// `LIMIT`/`OFFSET` clause is applied to the registered rows.
///
/// Statements follow auto-commit semantics: with auto-commit on each
/// statement commits at once; otherwise it stays pending until commit,
/// and is discarded by rollback or by returning the connection.
///
/// # Thread Safety
///
/// The source is cheap to clone and all clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionSource {
    shared: Arc<Shared>,
}

impl MemoryConnectionSource {
    /// Creates a source with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryDriverConfig::default())
    }

    /// Creates a source with a custom configuration.
    #[must_use]
    pub fn with_config(config: MemoryDriverConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                next_id: AtomicU64::new(1),
                ..Shared::default()
            }),
        }
    }

    /// Registers the rows returned by queries starting with `prefix`.
    pub fn respond(&self, prefix: impl Into<String>, rows: Vec<Row>) {
        let prefix = prefix.into();
        let mut responses = self.shared.responses.write();
        responses.retain(|(p, _)| *p != prefix);
        responses.push((prefix, rows));
    }

    /// Registers the affected row count of statements starting with `prefix`.
    pub fn set_update_count(&self, prefix: impl Into<String>, count: u64) {
        let prefix = prefix.into();
        let mut counts = self.shared.update_counts.write();
        counts.retain(|(p, _)| *p != prefix);
        counts.push((prefix, count));
    }

    /// Makes every statement starting with `prefix` fail.
    pub fn fail_on(&self, prefix: impl Into<String>) {
        self.shared.failures.write().push(prefix.into());
    }

    /// Makes savepoint creation fail.
    pub fn fail_savepoints(&self, fail: bool) {
        self.shared.fail_savepoints.store(fail, Ordering::SeqCst);
    }

    /// Makes opening connections fail.
    pub fn fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Makes rollbacks, including rollbacks to a savepoint, fail.
    pub fn fail_rollback(&self, fail: bool) {
        self.shared.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Makes changing the auto-commit mode fail.
    pub fn fail_auto_commit(&self, fail: bool) {
        self.shared.fail_auto_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<DriverEvent> {
        self.shared.events.lock().clone()
    }

    /// Clears the event log.
    pub fn clear_events(&self) {
        self.shared.events.lock().clear();
    }

    /// Returns the text of every executed statement, in order.
    #[must_use]
    pub fn executed_sql(&self) -> Vec<String> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DriverEvent::Executed { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the text of every query, in order.
    #[must_use]
    pub fn queried_sql(&self) -> Vec<String> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DriverEvent::Queried { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the statements that reached a durable commit, in order.
    #[must_use]
    pub fn committed_statements(&self) -> Vec<String> {
        self.shared.committed.lock().clone()
    }

    /// Returns the number of connections currently handed out.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Returns the pinned connection, if any.
    #[must_use]
    pub fn special_connection(&self) -> Option<ConnectionId> {
        *self.shared.special.lock()
    }

    /// Returns a property value without going through a connection.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<String> {
        self.shared.properties.lock().get(key).cloned()
    }

    fn open_connection(&self) -> DriverResult<Box<dyn Connection>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(DriverError::sql("injected failure opening connection"));
        }
        let id = ConnectionId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        self.shared.record(DriverEvent::Opened { conn: id });
        Ok(Box::new(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            auto_commit: self.shared.config.initial_auto_commit,
            pending: Vec::new(),
            savepoints: Vec::new(),
        }))
    }
}

impl ConnectionSource for MemoryConnectionSource {
    fn read_write_connection(&self) -> DriverResult<Box<dyn Connection>> {
        self.open_connection()
    }

    fn release_connection(&self, mut connection: Box<dyn Connection>) -> DriverResult<()> {
        let auto_commit = connection.is_auto_commit()?;
        // Closing with work outstanding discards it, even if the rollback fails.
        let discarded = if auto_commit {
            Ok(())
        } else {
            connection.rollback()
        };
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
        self.shared.record(DriverEvent::Released {
            conn: connection.id(),
            auto_commit,
        });
        discarded
    }

    fn save_special_connection(&self, connection: ConnectionId) -> DriverResult<bool> {
        if !self.shared.config.pin_special {
            return Ok(false);
        }
        let mut special = self.shared.special.lock();
        match *special {
            Some(current) if current != connection => Ok(false),
            _ => {
                *special = Some(connection);
                self.shared.record(DriverEvent::Pinned { conn: connection });
                Ok(true)
            }
        }
    }

    fn clear_special_connection(&self, connection: ConnectionId) {
        let mut special = self.shared.special.lock();
        if *special == Some(connection) {
            *special = None;
            self.shared.record(DriverEvent::Unpinned { conn: connection });
        }
    }

    fn nested_savepoints_supported(&self) -> bool {
        self.shared.config.nested_savepoints
    }

    fn read_property(&self, key: &str) -> DriverResult<Option<String>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(self.shared.properties.lock().get(key).cloned())
    }

    fn write_property(&self, key: &str, value: &str) -> DriverResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        self.shared
            .properties
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn url(&self) -> String {
        self.shared.config.url.clone()
    }

    fn close(&self) -> DriverResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// A connection handed out by [`MemoryConnectionSource`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    shared: Arc<Shared>,
    auto_commit: bool,
    pending: Vec<String>,
    savepoints: Vec<(String, usize)>,
}

impl MemoryConnection {
    fn write(&mut self, sql: &str) {
        if self.auto_commit {
            self.shared.committed.lock().push(sql.to_string());
        } else {
            self.pending.push(sql.to_string());
        }
    }

    fn commit_pending(&mut self) {
        self.shared.committed.lock().append(&mut self.pending);
        self.savepoints.clear();
    }

    fn savepoint_index(&self, savepoint: &Savepoint) -> DriverResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(name, _)| name == savepoint.name())
            .ok_or_else(|| DriverError::savepoint_failed(savepoint.name(), "unknown savepoint"))
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_auto_commit(&self) -> DriverResult<bool> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()> {
        if self.shared.fail_auto_commit.load(Ordering::SeqCst) {
            return Err(DriverError::sql("injected auto-commit failure"));
        }
        if auto_commit && !self.auto_commit {
            self.commit_pending();
        }
        self.auto_commit = auto_commit;
        self.shared.record(DriverEvent::AutoCommit {
            conn: self.id,
            value: auto_commit,
        });
        Ok(())
    }

    fn set_savepoint(&mut self, name: &str) -> DriverResult<Savepoint> {
        if self.shared.fail_savepoints.load(Ordering::SeqCst) {
            return Err(DriverError::savepoint_failed(name, "injected failure"));
        }
        if self.auto_commit {
            return Err(DriverError::savepoint_failed(
                name,
                "cannot set a savepoint in auto-commit mode",
            ));
        }
        self.savepoints.push((name.to_string(), self.pending.len()));
        self.shared.record(DriverEvent::SavepointSet {
            conn: self.id,
            name: name.to_string(),
        });
        Ok(Savepoint::new(name))
    }

    fn release_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()> {
        let index = self.savepoint_index(savepoint)?;
        self.savepoints.truncate(index);
        self.shared.record(DriverEvent::SavepointReleased {
            conn: self.id,
            name: savepoint.name().to_string(),
        });
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()> {
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            return Err(DriverError::savepoint_failed(savepoint.name(), "injected failure"));
        }
        let index = self.savepoint_index(savepoint)?;
        let mark = self.savepoints[index].1;
        self.pending.truncate(mark);
        self.savepoints.truncate(index + 1);
        self.shared.record(DriverEvent::SavepointRolledBack {
            conn: self.id,
            name: savepoint.name().to_string(),
        });
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.commit_pending();
        self.shared.record(DriverEvent::Committed { conn: self.id });
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            return Err(DriverError::sql("injected rollback failure"));
        }
        self.pending.clear();
        self.savepoints.clear();
        self.shared.record(DriverEvent::RolledBack { conn: self.id });
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        self.shared.record(DriverEvent::Executed {
            conn: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.shared.check_failure(sql)?;
        self.write(sql);
        let count = self
            .shared
            .update_counts
            .read()
            .iter()
            .filter(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(0, |(_, count)| *count);
        Ok(count)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        self.shared.record(DriverEvent::Queried {
            conn: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.shared.check_failure(sql)?;
        let (base, paging) = split_window(sql);
        let rows = self
            .shared
            .responses
            .read()
            .iter()
            .filter(|(prefix, _)| base.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        let offset = usize::try_from(paging.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = paging
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

/// Splits a trailing `LIMIT n [OFFSET m]` clause from a statement.
fn split_window(sql: &str) -> (&str, Paging) {
    let Some(at) = sql.rfind(" LIMIT ") else {
        return (sql, Paging::default());
    };
    let mut words = sql[at + 7..].split_whitespace();
    let limit = words.next().and_then(|w| w.parse::<i64>().ok());
    let offset = match (words.next(), words.next()) {
        (Some("OFFSET"), Some(w)) => w.parse::<u64>().ok(),
        _ => None,
    };
    let limit = limit.and_then(|l| u64::try_from(l).ok());
    (&sql[..at], Paging::new(offset, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> Row {
        Row::from_pairs([("id", Value::Integer(id))])
    }

    #[test]
    fn auto_commit_statements_commit_immediately() {
        let source = MemoryConnectionSource::new();
        let mut conn = source.read_write_connection().unwrap();
        conn.execute("INSERT INTO t (a) VALUES (?)", &[Value::Integer(1)])
            .unwrap();
        assert_eq!(source.committed_statements().len(), 1);
        source.release_connection(conn).unwrap();
        assert_eq!(source.open_connections(), 0);
    }

    #[test]
    fn rollback_to_savepoint_discards_later_work() {
        let source = MemoryConnectionSource::new();
        let mut conn = source.read_write_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("A", &[]).unwrap();
        let sp = conn.set_savepoint("sp1").unwrap();
        conn.execute("B", &[]).unwrap();
        conn.rollback_to_savepoint(&sp).unwrap();
        conn.set_auto_commit(true).unwrap();
        assert_eq!(source.committed_statements(), vec!["A".to_string()]);
        source.release_connection(conn).unwrap();
    }

    #[test]
    fn savepoint_requires_manual_commit() {
        let source = MemoryConnectionSource::new();
        let mut conn = source.read_write_connection().unwrap();
        assert!(conn.set_savepoint("sp").is_err());
        source.release_connection(conn).unwrap();
    }

    #[test]
    fn release_discards_uncommitted_work() {
        let source = MemoryConnectionSource::new();
        let mut conn = source.read_write_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("A", &[]).unwrap();
        source.release_connection(conn).unwrap();
        assert!(source.committed_statements().is_empty());
    }

    #[test]
    fn only_one_special_connection() {
        let source = MemoryConnectionSource::new();
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        assert!(source.save_special_connection(a).unwrap());
        assert!(!source.save_special_connection(b).unwrap());
        source.clear_special_connection(a);
        assert!(source.save_special_connection(b).unwrap());
    }

    #[test]
    fn query_applies_window_to_registered_rows() {
        let source = MemoryConnectionSource::new();
        source.respond("SELECT * FROM t", (1..=5).map(row).collect());
        let mut conn = source.read_write_connection().unwrap();
        let rows = conn.query("SELECT * FROM t LIMIT 2 OFFSET 1", &[]).unwrap();
        assert_eq!(rows, vec![row(2), row(3)]);
        source.release_connection(conn).unwrap();
    }

    #[test]
    fn longest_prefix_wins() {
        let source = MemoryConnectionSource::new();
        source.respond("SELECT", vec![row(1)]);
        source.respond("SELECT * FROM special", vec![row(2)]);
        let mut conn = source.read_write_connection().unwrap();
        assert_eq!(conn.query("SELECT * FROM special", &[]).unwrap(), vec![row(2)]);
        assert_eq!(conn.query("SELECT * FROM other", &[]).unwrap(), vec![row(1)]);
        source.release_connection(conn).unwrap();
    }

    #[test]
    fn injected_failure() {
        let source = MemoryConnectionSource::new();
        source.fail_on("DROP");
        let mut conn = source.read_write_connection().unwrap();
        assert!(matches!(
            conn.execute("DROP TABLE t", &[]),
            Err(DriverError::Sql { .. })
        ));
        source.release_connection(conn).unwrap();
    }

    #[test]
    fn closed_source_refuses_connections() {
        let source = MemoryConnectionSource::new();
        source.close().unwrap();
        assert!(matches!(
            source.read_write_connection(),
            Err(DriverError::Closed)
        ));
    }

    #[test]
    fn split_window_parses_clause() {
        assert_eq!(
            split_window("SELECT * FROM t LIMIT 3 OFFSET 6"),
            ("SELECT * FROM t", Paging::new(Some(6), Some(3)))
        );
        assert_eq!(
            split_window("SELECT * FROM t LIMIT -1 OFFSET 6"),
            ("SELECT * FROM t", Paging::new(Some(6), None))
        );
        assert_eq!(split_window("SELECT 1"), ("SELECT 1", Paging::default()));
    }
}
