//! Per-unit administration.

use crate::config::UnitConfig;
use crate::error::{PersistenceError, PersistenceResult};
use crate::manager::EntityManagerFactory;
use crate::query::{NamedQueryRegistry, QueryFactory};
use crate::resource::ResourceEnvironment;
use crate::schema::{self, BootstrapOutcome, DatabaseAdmin};
use crate::types::{SchemaVersion, TransactionIdGenerator};
use entipa_driver::ConnectionSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns one persistence unit: its configuration, connection source and
/// named queries.
///
/// Every entity manager of the unit comes from a factory handed out here.
/// Closing the admin closes the unit: factories stop creating managers and
/// the connection source is closed.
pub struct PersistenceAdmin {
    config: UnitConfig,
    source: Arc<dyn ConnectionSource>,
    registry: Arc<NamedQueryRegistry>,
    ids: Arc<TransactionIdGenerator>,
    closed: Arc<AtomicBool>,
}

impl PersistenceAdmin {
    /// Creates the admin of a unit backed by `source`.
    pub fn new(config: UnitConfig, source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            config,
            source,
            registry: Arc::new(NamedQueryRegistry::new()),
            ids: Arc::new(TransactionIdGenerator::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the unit name.
    #[must_use]
    pub fn unit_name(&self) -> &str {
        &self.config.name
    }

    /// Returns the unit configuration.
    #[must_use]
    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    /// Returns the unit properties not consumed by the configuration.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.config.properties
    }

    /// Returns the unit's connection source.
    #[must_use]
    pub fn connection_source(&self) -> Arc<dyn ConnectionSource> {
        Arc::clone(&self.source)
    }

    /// Returns the unit's named queries.
    #[must_use]
    pub fn registry(&self) -> &NamedQueryRegistry {
        &self.registry
    }

    /// Returns the factory for the unit's entity managers.
    #[must_use]
    pub fn entity_manager_factory(&self) -> EntityManagerFactory {
        self.entity_manager_factory_for(Arc::clone(&self.source))
    }

    /// Returns a factory whose managers use `source` instead of the unit's
    /// own connection source.
    ///
    /// Used while creating or upgrading the schema, when the database is
    /// reached through a connection the caller controls.
    #[must_use]
    pub fn entity_manager_factory_for(&self, source: Arc<dyn ConnectionSource>) -> EntityManagerFactory {
        EntityManagerFactory::new(
            self.config.name.clone(),
            source,
            Arc::clone(&self.registry),
            Arc::clone(&self.ids),
            Arc::clone(&self.closed),
        )
    }

    /// Registers a named query returning `entity_type`.
    pub fn add_named_query(
        &self,
        entity_type: &'static str,
        name: impl Into<String>,
        factory: Arc<dyn QueryFactory>,
    ) {
        let name = name.into();
        debug!(unit = %self.config.name, query = %name, entity_type, "named query registered");
        self.registry.add_named_query(entity_type, name, factory);
    }

    /// Returns the declared schema version.
    #[must_use]
    pub fn declared_version(&self) -> SchemaVersion {
        self.config.schema_version
    }

    /// Returns the schema version stored with the database.
    ///
    /// # Errors
    ///
    /// Returns `UnitClosed` after [`close`](Self::close), or the read error.
    pub fn schema_version(&self) -> PersistenceResult<SchemaVersion> {
        self.check_open()?;
        schema::read_version(self.source.as_ref())
    }

    /// Stores `version` as the database's schema version.
    ///
    /// # Errors
    ///
    /// Returns `UnitClosed` after [`close`](Self::close), or the write error.
    pub fn set_schema_version(&self, version: SchemaVersion) -> PersistenceResult<()> {
        self.check_open()?;
        schema::write_version(self.source.as_ref(), version)
    }

    /// Creates or upgrades the unit's schema through its own source.
    ///
    /// # Errors
    ///
    /// Returns the first bootstrap failure.
    pub fn bootstrap(&self, resources: &dyn ResourceEnvironment) -> PersistenceResult<BootstrapOutcome> {
        self.bootstrap_on(Arc::clone(&self.source), resources)
    }

    /// Creates or upgrades the schema of the database behind `source`.
    ///
    /// # Errors
    ///
    /// Returns `UnitClosed` after [`close`](Self::close), or the first
    /// bootstrap failure.
    pub fn bootstrap_on(
        &self,
        source: Arc<dyn ConnectionSource>,
        resources: &dyn ResourceEnvironment,
    ) -> PersistenceResult<BootstrapOutcome> {
        self.check_open()?;
        let factory = self.entity_manager_factory_for(Arc::clone(&source));
        DatabaseAdmin::new(&self.config, resources).bootstrap(&factory, source.as_ref())
    }

    /// Returns true once the unit has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the unit. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the driver error from closing the connection source.
    pub fn close(&self) -> PersistenceResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(unit = %self.config.name, "closing persistence unit");
        self.source.close()?;
        Ok(())
    }

    fn check_open(&self) -> PersistenceResult<()> {
        if self.is_closed() {
            Err(PersistenceError::UnitClosed {
                unit: self.config.name.clone(),
            })
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for PersistenceAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceAdmin")
            .field("unit", &self.config.name)
            .field("source", &self.source.url())
            .field("queries", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::EntityTransaction;
    use entipa_driver::{MemoryConnectionSource, Select};

    fn admin() -> (MemoryConnectionSource, PersistenceAdmin) {
        let source = MemoryConnectionSource::new();
        let admin = PersistenceAdmin::new(
            UnitConfig::new("classyfy").property("locale", "en_AU"),
            Arc::new(source.clone()),
        );
        (source, admin)
    }

    #[test]
    fn unstored_version_is_none() {
        let (_source, admin) = admin();
        assert_eq!(admin.schema_version().unwrap(), SchemaVersion::NONE);
        admin.set_schema_version(SchemaVersion::new(3)).unwrap();
        assert_eq!(admin.schema_version().unwrap(), SchemaVersion::new(3));
        assert_eq!(admin.declared_version(), SchemaVersion::new(1));
    }

    #[test]
    fn named_queries_are_shared_with_factories() {
        let (_source, admin) = admin();
        admin.add_named_query("nodes", "all_nodes", Arc::new(|| Select::new("nodes")));
        let factory = admin.entity_manager_factory();
        assert_eq!(factory.unit_name(), "classyfy");
        assert_eq!(admin.registry().names(), vec!["all_nodes".to_string()]);
    }

    #[test]
    fn bound_factory_uses_supplied_source() {
        let (unit_source, admin) = admin();
        let other = MemoryConnectionSource::new();
        let factory = admin.entity_manager_factory_for(Arc::new(other.clone()));
        let mut em = factory.create_entity_manager().unwrap();
        em.transaction().begin().unwrap();
        em.transaction()
            .connection()
            .unwrap()
            .execute("DELETE FROM nodes", &[])
            .unwrap();
        em.transaction().commit().unwrap();
        assert_eq!(other.committed_statements(), vec!["DELETE FROM nodes".to_string()]);
        assert!(unit_source.events().is_empty());
    }

    #[test]
    fn close_stops_factories_and_source() {
        let (source, admin) = admin();
        let factory = admin.entity_manager_factory();
        admin.close().unwrap();
        admin.close().unwrap();
        assert!(admin.is_closed());
        assert!(source.is_closed());
        assert!(matches!(
            factory.create_entity_manager(),
            Err(PersistenceError::UnitClosed { .. })
        ));
        assert!(matches!(
            admin.schema_version(),
            Err(PersistenceError::UnitClosed { .. })
        ));
    }

    #[test]
    fn properties_exclude_consumed_keys() {
        let (_source, admin) = admin();
        assert_eq!(admin.properties().get("locale").map(String::as_str), Some("en_AU"));
    }
}
