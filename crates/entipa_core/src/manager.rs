//! Entity managers and their factory.

use crate::entity::{Entity, ManagedEntityKey, PrimaryKey};
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::{
    raw_row, DaoQuery, NamedQueryRegistry, NativeQuery, PooledConnection, QueryConnection,
};
use crate::transaction::{EntityTransaction, MonitoredTransaction, TransactionMode};
use crate::types::TransactionIdGenerator;
use entipa_driver::{delete_sql, insert_sql, ConnectionSource, Row, Select, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates application-managed entity managers for one persistence unit.
///
/// Each manager is independent: it owns its own transaction and entity
/// store. The factory is cheap to clone.
#[derive(Clone)]
pub struct EntityManagerFactory {
    unit: String,
    source: Arc<dyn ConnectionSource>,
    registry: Arc<NamedQueryRegistry>,
    ids: Arc<TransactionIdGenerator>,
    mode: TransactionMode,
    closed: Arc<AtomicBool>,
}

impl EntityManagerFactory {
    pub(crate) fn new(
        unit: impl Into<String>,
        source: Arc<dyn ConnectionSource>,
        registry: Arc<NamedQueryRegistry>,
        ids: Arc<TransactionIdGenerator>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            unit: unit.into(),
            source,
            registry,
            ids,
            mode: TransactionMode::Contained,
            closed,
        }
    }

    /// Returns a factory whose managers use `mode` transactions.
    #[must_use]
    pub fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the unit name.
    #[must_use]
    pub fn unit_name(&self) -> &str {
        &self.unit
    }

    /// Returns the transaction mode of created managers.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns false once the unit has been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Creates a new entity manager.
    ///
    /// # Errors
    ///
    /// Returns `UnitClosed` if the unit has been closed.
    pub fn create_entity_manager(&self) -> PersistenceResult<EntityManager> {
        if !self.is_open() {
            return Err(PersistenceError::UnitClosed {
                unit: self.unit.clone(),
            });
        }
        Ok(EntityManager {
            unit: self.unit.clone(),
            source: Arc::clone(&self.source),
            registry: Arc::clone(&self.registry),
            transaction: MonitoredTransaction::new(
                Arc::clone(&self.source),
                Arc::clone(&self.ids),
                self.mode,
            ),
            open: true,
        })
    }
}

impl fmt::Debug for EntityManagerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManagerFactory")
            .field("unit", &self.unit)
            .field("source", &self.source.url())
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Application-facing persistence operations on one unit.
///
/// Writes need an active transaction (see [`transaction`]). Reads outside a
/// transaction borrow a pooled connection for the duration of the query.
///
/// [`transaction`]: EntityManager::transaction
pub struct EntityManager {
    unit: String,
    source: Arc<dyn ConnectionSource>,
    registry: Arc<NamedQueryRegistry>,
    transaction: MonitoredTransaction,
    open: bool,
}

impl EntityManager {
    /// Returns the unit name.
    #[must_use]
    pub fn unit_name(&self) -> &str {
        &self.unit
    }

    /// Returns the manager's transaction.
    pub fn transaction(&mut self) -> &mut MonitoredTransaction {
        &mut self.transaction
    }

    /// Returns true until [`close`](Self::close).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Closes the manager, rolling back any active transaction.
    pub fn close(&mut self) {
        if self.transaction.is_active() {
            debug!(unit = %self.unit, "closing entity manager with active transaction");
            if let Err(e) = self.transaction.rollback() {
                warn!(unit = %self.unit, error = %e, "rollback on close failed");
            }
        }
        self.open = false;
    }

    fn check_open(&self) -> PersistenceResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(PersistenceError::invalid_operation(format!(
                "entity manager for {} is closed",
                self.unit
            )))
        }
    }

    fn require_transaction(&self, operation: &str) -> PersistenceResult<()> {
        self.check_open()?;
        if self.transaction.is_active() {
            Ok(())
        } else {
            Err(PersistenceError::invalid_operation(format!(
                "{operation} requires an active transaction"
            )))
        }
    }

    fn query_connection(&mut self) -> PersistenceResult<QueryConnection<'_>> {
        self.check_open()?;
        if self.transaction.is_active() {
            Ok(QueryConnection::Transaction(self.transaction.connection()?))
        } else {
            Ok(QueryConnection::Pooled(PooledConnection::read_write(
                Arc::clone(&self.source),
            )?))
        }
    }

    fn load<T: Entity>(&mut self, key: &PrimaryKey) -> PersistenceResult<Option<T>> {
        let select = Select::new(T::entity_type()).where_eq(T::key_column(), key.to_value());
        let name = format!("find {}", T::entity_type());
        let mut query = DaoQuery::<T>::new(name, self.query_connection()?, select);
        Ok(query.get_result_list(None, Some(1))?.into_iter().next())
    }

    /// Finds an entity by primary key.
    ///
    /// Inside a transaction the entity becomes managed, and later finds
    /// return the managed instance without a query.
    ///
    /// # Errors
    ///
    /// Returns the query or mapping error.
    pub fn find<T: Entity>(&mut self, key: impl Into<PrimaryKey>) -> PersistenceResult<Option<T>> {
        let key = key.into();
        let managed = ManagedEntityKey::new(T::entity_type(), key.clone());
        if let Some(entity) = self.transaction.store().get_as::<T>(&managed) {
            return Ok(Some(entity.clone()));
        }
        let found = self.load::<T>(&key)?;
        if let Some(entity) = &found {
            if self.transaction.is_active() {
                self.transaction.store_mut().put_entity(entity.clone());
            }
        }
        Ok(found)
    }

    /// Finds an entity for modification; it is flushed at commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` without an active transaction, or the
    /// query or mapping error.
    pub fn find_mut<T: Entity>(
        &mut self,
        key: impl Into<PrimaryKey>,
    ) -> PersistenceResult<Option<&mut T>> {
        self.require_transaction("find_mut")?;
        let key = key.into();
        let managed = ManagedEntityKey::new(T::entity_type(), key.clone());
        if !self.transaction.store().contains(&managed) {
            match self.load::<T>(&key)? {
                Some(entity) => {
                    self.transaction.store_mut().put_entity(entity);
                }
                None => return Ok(None),
            }
        }
        Ok(self.transaction.store_mut().get_mut_as::<T>(&managed))
    }

    /// Inserts a new entity and manages it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` without an active transaction, or the
    /// insert error.
    pub fn persist<T: Entity>(&mut self, entity: T) -> PersistenceResult<ManagedEntityKey> {
        self.require_transaction("persist")?;
        let (columns, params): (Vec<&str>, Vec<Value>) = entity.to_columns().into_iter().unzip();
        let sql = insert_sql(T::entity_type(), &columns);
        let (conn, store) = self.transaction.parts()?;
        conn.execute(&sql, &params)
            .map_err(|e| PersistenceError::query(&sql, e))?;
        Ok(store.put_entity(entity))
    }

    /// Manages `entity`, replacing any managed copy; it is written at commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` without an active transaction.
    pub fn merge<T: Entity>(&mut self, entity: T) -> PersistenceResult<ManagedEntityKey> {
        self.require_transaction("merge")?;
        let store = self.transaction.store_mut();
        let key = store.put_entity(entity);
        store.mark_dirty(&key)?;
        Ok(key)
    }

    /// Deletes a managed entity.
    ///
    /// The entity stays managed if the delete fails.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotManaged` if the entity is not managed by this
    /// manager's transaction, or the delete error.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> PersistenceResult<()> {
        self.require_transaction("remove")?;
        let key = entity.managed_key();
        let (conn, store) = self.transaction.parts()?;
        if !store.contains(&key) {
            return Err(PersistenceError::EntityNotManaged {
                key: key.to_string(),
            });
        }
        let sql = delete_sql(T::entity_type(), T::key_column());
        conn.execute(&sql, &[key.primary_key().to_value()])
            .map_err(|e| PersistenceError::query(&sql, e))?;
        store.remove(&key)?;
        Ok(())
    }

    /// Returns true if the entity is managed.
    #[must_use]
    pub fn contains<T: Entity>(&self, entity: &T) -> bool {
        self.transaction.store().contains(&entity.managed_key())
    }

    /// Creates a query from a registered named query.
    ///
    /// # Errors
    ///
    /// Returns `QueryNotFound`, `EntityTypeMismatch`, or a connection error.
    pub fn create_named_query<T: Entity>(&mut self, name: &str) -> PersistenceResult<DaoQuery<'_, T>> {
        let select = self.registry.descriptor_for::<T>(name)?;
        Ok(DaoQuery::new(name, self.query_connection()?, select))
    }

    /// Creates a query from an ad-hoc descriptor.
    ///
    /// # Errors
    ///
    /// Returns a connection error.
    pub fn create_query<T: Entity>(&mut self, select: Select) -> PersistenceResult<DaoQuery<'_, T>> {
        let name = format!("query {}", select.table());
        Ok(DaoQuery::new(name, self.query_connection()?, select))
    }

    /// Creates a raw query returning rows.
    ///
    /// # Errors
    ///
    /// Returns a connection or preparation error.
    pub fn create_native_query(&mut self, sql: &str) -> PersistenceResult<NativeQuery<'_, Row>> {
        NativeQuery::new(self.query_connection()?, sql, raw_row)
    }

    /// Creates a raw query returning entities of type `T`.
    ///
    /// # Errors
    ///
    /// Returns a connection or preparation error.
    pub fn create_native_query_for<T: Entity>(
        &mut self,
        sql: &str,
    ) -> PersistenceResult<NativeQuery<'_, T>> {
        NativeQuery::new(self.query_connection()?, sql, T::from_row)
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("unit", &self.unit)
            .field("transaction", &self.transaction)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
