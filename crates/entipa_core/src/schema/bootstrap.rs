//! Schema creation and upgrade.

use super::script::NativeScriptRunner;
use crate::config::{upgrade_script_name, UnitConfig, SCHEMA_VERSION_KEY};
use crate::error::{PersistenceError, PersistenceResult};
use crate::manager::EntityManagerFactory;
use crate::resource::ResourceEnvironment;
use crate::transaction::EntityTransaction;
use crate::types::SchemaVersion;
use entipa_driver::{Connection, ConnectionSource};
use std::fmt;
use tracing::{info, warn};

/// What a bootstrap run did to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The stored version already matched.
    Current(SchemaVersion),
    /// The schema was created from scratch.
    Created(SchemaVersion),
    /// An upgrade script ran and the new version was recorded.
    Upgraded {
        /// Version found in the database.
        from: SchemaVersion,
        /// Version now recorded.
        to: SchemaVersion,
    },
    /// No upgrade script did any work, so the stored version was kept.
    UpgradeSkipped {
        /// Version found in the database, still recorded.
        from: SchemaVersion,
        /// Declared version that was not reached.
        to: SchemaVersion,
    },
}

/// Reads the schema version stored with the database.
///
/// A database that has never recorded a version reports
/// [`SchemaVersion::NONE`].
///
/// # Errors
///
/// Returns the driver error, or `InvalidOperation` if the stored value is
/// not a version number.
pub fn read_version(source: &dyn ConnectionSource) -> PersistenceResult<SchemaVersion> {
    match source.read_property(SCHEMA_VERSION_KEY)? {
        None => Ok(SchemaVersion::NONE),
        Some(text) => text.trim().parse::<u32>().map(SchemaVersion::new).map_err(|_| {
            PersistenceError::invalid_operation(format!(
                "stored schema version '{text}' is not a number"
            ))
        }),
    }
}

/// Records `version` as the database's schema version.
///
/// # Errors
///
/// Returns the driver error.
pub fn write_version(source: &dyn ConnectionSource, version: SchemaVersion) -> PersistenceResult<()> {
    source.write_property(SCHEMA_VERSION_KEY, &version.as_u32().to_string())?;
    Ok(())
}

/// Creates and upgrades the schema of one persistence unit.
///
/// Creation runs the unit's drop, create and data scripts in that order,
/// each optional. An upgrade runs `<unit>-upgrade-v<old>-v<new>.sql`.
pub struct DatabaseAdmin<'a> {
    config: &'a UnitConfig,
    resources: &'a dyn ResourceEnvironment,
}

impl<'a> DatabaseAdmin<'a> {
    /// Creates an admin for `config`, reading scripts from `resources`.
    pub fn new(config: &'a UnitConfig, resources: &'a dyn ResourceEnvironment) -> Self {
        Self { config, resources }
    }

    /// Runs the create-time scripts on `conn`.
    ///
    /// Returns true if any script executed a statement.
    ///
    /// # Errors
    ///
    /// Returns the first script error; later scripts do not run.
    pub fn on_create(&self, conn: &mut dyn Connection) -> PersistenceResult<bool> {
        let runner = NativeScriptRunner::new(self.resources);
        let mut did_work = false;
        for script in self.config.create_scripts() {
            did_work |= runner.run(conn, Some(script))?;
        }
        Ok(did_work)
    }

    /// Runs the upgrade script from `old` to `new` on `conn`.
    ///
    /// Returns true if the script executed a statement.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if there is no upgrade script, or the
    /// statement error.
    pub fn on_upgrade(
        &self,
        conn: &mut dyn Connection,
        old: SchemaVersion,
        new: SchemaVersion,
    ) -> PersistenceResult<bool> {
        let script = upgrade_script_name(&self.config.name, old, new);
        NativeScriptRunner::new(self.resources).run(conn, Some(&script))
    }

    /// Brings the database behind `source` to the declared schema version.
    ///
    /// Scripts run in one transaction of a manager from `factory`, which
    /// should be bound to `source`. The version is written after the
    /// transaction commits. A fresh database always records the declared
    /// version; an upgrade records it only if the script did some work.
    ///
    /// # Errors
    ///
    /// Returns the first failure. A failing script rolls its transaction
    /// back and leaves the stored version untouched.
    pub fn bootstrap(
        &self,
        factory: &EntityManagerFactory,
        source: &dyn ConnectionSource,
    ) -> PersistenceResult<BootstrapOutcome> {
        let stored = read_version(source)?;
        let declared = self.config.schema_version;

        if stored == SchemaVersion::NONE {
            info!(unit = %self.config.name, version = %declared, "creating schema");
            in_transaction(factory, |conn| self.on_create(conn))?;
            write_version(source, declared)?;
            return Ok(BootstrapOutcome::Created(declared));
        }
        if stored == declared {
            return Ok(BootstrapOutcome::Current(stored));
        }

        info!(unit = %self.config.name, from = %stored, to = %declared, "upgrading schema");
        if in_transaction(factory, |conn| self.on_upgrade(conn, stored, declared))? {
            write_version(source, declared)?;
            Ok(BootstrapOutcome::Upgraded {
                from: stored,
                to: declared,
            })
        } else {
            warn!(
                unit = %self.config.name,
                from = %stored,
                to = %declared,
                "upgrade script executed nothing, keeping stored version"
            );
            Ok(BootstrapOutcome::UpgradeSkipped {
                from: stored,
                to: declared,
            })
        }
    }
}

impl fmt::Debug for DatabaseAdmin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseAdmin")
            .field("unit", &self.config.name)
            .finish_non_exhaustive()
    }
}

fn in_transaction<F>(factory: &EntityManagerFactory, work: F) -> PersistenceResult<bool>
where
    F: FnOnce(&mut dyn Connection) -> PersistenceResult<bool>,
{
    let mut em = factory.create_entity_manager()?;
    em.transaction().begin()?;
    let did_work = match work(em.transaction().connection()?) {
        Ok(did_work) => did_work,
        Err(e) => {
            em.close();
            return Err(e);
        }
    };
    em.transaction().commit()?;
    em.close();
    Ok(did_work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::PersistenceAdmin;
    use crate::resource::DirectoryResources;
    use entipa_driver::MemoryConnectionSource;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        resources: DirectoryResources,
        source: MemoryConnectionSource,
        admin: PersistenceAdmin,
    }

    fn fixture(config: UnitConfig, files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        for (name, text) in files {
            fs::write(dir.path().join(name), text).unwrap();
        }
        let resources = DirectoryResources::new(dir.path(), dir.path());
        let source = MemoryConnectionSource::new();
        let admin = PersistenceAdmin::new(config, Arc::new(source.clone()));
        Fixture {
            _dir: dir,
            resources,
            source,
            admin,
        }
    }

    fn bootstrap(f: &Fixture) -> PersistenceResult<BootstrapOutcome> {
        DatabaseAdmin::new(f.admin.config(), &f.resources)
            .bootstrap(&f.admin.entity_manager_factory(), &f.source)
    }

    #[test]
    fn create_runs_scripts_in_order() {
        let config = UnitConfig::new("classyfy")
            .data_script("data.sql")
            .create_script("create.sql")
            .drop_script("drop.sql");
        let f = fixture(
            config,
            &[
                ("drop.sql", "DROP TABLE IF EXISTS nodes;\n"),
                ("create.sql", "CREATE TABLE nodes (id INT);\n"),
                ("data.sql", "INSERT INTO nodes VALUES (1);\n"),
            ],
        );
        assert_eq!(
            bootstrap(&f).unwrap(),
            BootstrapOutcome::Created(SchemaVersion::new(1))
        );
        assert_eq!(
            f.source.committed_statements(),
            vec![
                "DROP TABLE IF EXISTS nodes".to_string(),
                "CREATE TABLE nodes (id INT)".to_string(),
                "INSERT INTO nodes VALUES (1)".to_string(),
            ]
        );
        assert_eq!(f.source.property(SCHEMA_VERSION_KEY).as_deref(), Some("1"));
    }

    #[test]
    fn create_without_scripts_still_records_version() {
        let f = fixture(UnitConfig::new("empty").schema_version(4), &[]);
        assert_eq!(
            bootstrap(&f).unwrap(),
            BootstrapOutcome::Created(SchemaVersion::new(4))
        );
        assert!(f.source.executed_sql().is_empty());
        assert_eq!(read_version(&f.source).unwrap(), SchemaVersion::new(4));
    }

    #[test]
    fn matching_version_does_nothing() {
        let f = fixture(UnitConfig::new("classyfy").create_script("create.sql"), &[]);
        write_version(&f.source, SchemaVersion::new(1)).unwrap();
        assert_eq!(
            bootstrap(&f).unwrap(),
            BootstrapOutcome::Current(SchemaVersion::new(1))
        );
        assert!(f.source.executed_sql().is_empty());
    }

    #[test]
    fn upgrade_runs_conventional_script() {
        let f = fixture(
            UnitConfig::new("classyfy").schema_version(2),
            &[("classyfy-upgrade-v1-v2.sql", "ALTER TABLE nodes ADD level INT;\n")],
        );
        write_version(&f.source, SchemaVersion::new(1)).unwrap();
        assert_eq!(
            bootstrap(&f).unwrap(),
            BootstrapOutcome::Upgraded {
                from: SchemaVersion::new(1),
                to: SchemaVersion::new(2),
            }
        );
        assert_eq!(
            f.source.committed_statements(),
            vec!["ALTER TABLE nodes ADD level INT".to_string()]
        );
        assert_eq!(read_version(&f.source).unwrap(), SchemaVersion::new(2));
    }

    #[test]
    fn empty_upgrade_keeps_stored_version() {
        let f = fixture(
            UnitConfig::new("classyfy").schema_version(2),
            &[("classyfy-upgrade-v1-v2.sql", "\n")],
        );
        write_version(&f.source, SchemaVersion::new(1)).unwrap();
        assert!(matches!(
            bootstrap(&f).unwrap(),
            BootstrapOutcome::UpgradeSkipped { .. }
        ));
        assert_eq!(read_version(&f.source).unwrap(), SchemaVersion::new(1));
    }

    #[test]
    fn failing_script_rolls_back_and_keeps_version() {
        let f = fixture(
            UnitConfig::new("classyfy").create_script("create.sql"),
            &[("create.sql", "CREATE TABLE a (id INT);\nBROKEN;\n")],
        );
        f.source.fail_on("BROKEN");
        assert!(bootstrap(&f).is_err());
        assert!(f.source.committed_statements().is_empty());
        assert_eq!(read_version(&f.source).unwrap(), SchemaVersion::NONE);
    }

    #[test]
    fn unreadable_version_is_an_error() {
        let source = MemoryConnectionSource::new();
        source.write_property(SCHEMA_VERSION_KEY, "two").unwrap();
        assert!(read_version(&source).is_err());
    }
}
