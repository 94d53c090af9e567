//! Persistence unit and executor configuration.

use crate::error::{PersistenceError, PersistenceResult};
use crate::types::SchemaVersion;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration key holding the declared schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema.version";
/// Configuration key naming the drop script.
pub const DROP_SCRIPT_KEY: &str = "script.drop";
/// Configuration key naming the create script.
pub const CREATE_SCRIPT_KEY: &str = "script.create";
/// Configuration key naming the data script.
pub const DATA_SCRIPT_KEY: &str = "script.data";

/// Returns the conventional upgrade script name for a unit.
///
/// ```rust
/// use entipa_core::config::upgrade_script_name;
/// use entipa_core::SchemaVersion;
///
/// assert_eq!(
///     upgrade_script_name("classyfy", SchemaVersion::new(1), SchemaVersion::new(2)),
///     "classyfy-upgrade-v1-v2.sql"
/// );
/// ```
#[must_use]
pub fn upgrade_script_name(unit: &str, old: SchemaVersion, new: SchemaVersion) -> String {
    format!("{unit}-upgrade-v{}-v{}.sql", old.as_u32(), new.as_u32())
}

/// Configuration of one persistence unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    /// Unit name.
    pub name: String,
    /// Declared schema version.
    pub schema_version: SchemaVersion,
    /// Script run first on create, usually `DROP TABLE IF EXISTS ...`.
    pub drop_script: Option<String>,
    /// Script creating the schema.
    pub create_script: Option<String>,
    /// Script loading initial data.
    pub data_script: Option<String>,
    /// Remaining unit properties.
    pub properties: HashMap<String, String>,
}

impl UnitConfig {
    /// Creates a configuration for a unit at schema version 1 with no scripts.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_version: SchemaVersion::new(1),
            drop_script: None,
            create_script: None,
            data_script: None,
            properties: HashMap::new(),
        }
    }

    /// Builds a configuration from unit properties.
    ///
    /// Recognised keys are consumed into fields; the rest stay in
    /// `properties`. A missing version means version 1.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `schema.version` is not an
    /// unsigned integer.
    pub fn from_properties(
        name: impl Into<String>,
        mut properties: HashMap<String, String>,
    ) -> PersistenceResult<Self> {
        let name = name.into();
        let version = match properties.remove(SCHEMA_VERSION_KEY) {
            None => 1,
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                PersistenceError::InvalidConfiguration {
                    unit: name.clone(),
                    key: SCHEMA_VERSION_KEY.to_string(),
                    value,
                }
            })?,
        };
        Ok(Self {
            name,
            schema_version: SchemaVersion::new(version),
            drop_script: properties.remove(DROP_SCRIPT_KEY),
            create_script: properties.remove(CREATE_SCRIPT_KEY),
            data_script: properties.remove(DATA_SCRIPT_KEY),
            properties,
        })
    }

    /// Sets the declared schema version.
    #[must_use]
    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = SchemaVersion::new(version);
        self
    }

    /// Sets the drop script.
    #[must_use]
    pub fn drop_script(mut self, file: impl Into<String>) -> Self {
        self.drop_script = Some(file.into());
        self
    }

    /// Sets the create script.
    #[must_use]
    pub fn create_script(mut self, file: impl Into<String>) -> Self {
        self.create_script = Some(file.into());
        self
    }

    /// Sets the data script.
    #[must_use]
    pub fn data_script(mut self, file: impl Into<String>) -> Self {
        self.data_script = Some(file.into());
        self
    }

    /// Adds a unit property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the create-time scripts in execution order: drop, create, data.
    #[must_use]
    pub fn create_scripts(&self) -> Vec<&str> {
        [&self.drop_script, &self.create_script, &self.data_script]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .filter(|s| !s.trim().is_empty())
            .collect()
    }
}

/// Configuration of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker threads, which is also the in-flight work cap.
    pub pool_size: usize,
    /// How long shutdown waits for running work before cancelling queued work.
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            pool_size: parallelism + 2,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool size. Zero is raised to one.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_size_exceeds_parallelism() {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(ExecutorConfig::default().pool_size, parallelism + 2);
    }

    #[test]
    fn builder_pattern() {
        let config = UnitConfig::new("classyfy")
            .schema_version(3)
            .create_script("classyfy-create.sql")
            .property("locale", "en_AU");
        assert_eq!(config.schema_version, SchemaVersion::new(3));
        assert_eq!(config.create_scripts(), vec!["classyfy-create.sql"]);
        assert_eq!(config.properties.get("locale").map(String::as_str), Some("en_AU"));
    }

    #[test]
    fn create_scripts_keep_order() {
        let config = UnitConfig::new("u")
            .data_script("data.sql")
            .drop_script("drop.sql")
            .create_script("create.sql");
        assert_eq!(config.create_scripts(), vec!["drop.sql", "create.sql", "data.sql"]);
    }

    #[test]
    fn from_properties_consumes_known_keys() {
        let mut props = HashMap::new();
        props.insert(SCHEMA_VERSION_KEY.to_string(), "2".to_string());
        props.insert(DATA_SCRIPT_KEY.to_string(), "data.sql".to_string());
        props.insert("other".to_string(), "x".to_string());
        let config = UnitConfig::from_properties("u", props).unwrap();
        assert_eq!(config.schema_version, SchemaVersion::new(2));
        assert_eq!(config.data_script.as_deref(), Some("data.sql"));
        assert!(config.drop_script.is_none());
        assert_eq!(config.properties.len(), 1);
    }

    #[test]
    fn missing_version_defaults_to_one() {
        let config = UnitConfig::from_properties("u", HashMap::new()).unwrap();
        assert_eq!(config.schema_version, SchemaVersion::new(1));
    }

    #[test]
    fn unparsable_version_is_a_configuration_error() {
        for value in ["two", "-1", ""] {
            let mut props = HashMap::new();
            props.insert(SCHEMA_VERSION_KEY.to_string(), value.to_string());
            match UnitConfig::from_properties("classyfy", props) {
                Err(e @ PersistenceError::InvalidConfiguration { .. }) => {
                    assert!(e.is_configuration());
                    assert!(e.to_string().contains("schema.version"));
                }
                other => panic!("expected InvalidConfiguration, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_pool_size_is_raised() {
        assert_eq!(ExecutorConfig::new().pool_size(0).pool_size, 1);
    }
}
