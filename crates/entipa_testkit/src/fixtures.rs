//! Test fixtures and unit helpers.
//!
//! Provides persistence units on the recording in-memory driver, script
//! resources and sample entities.

use entipa_core::entity::{integer_column, optional_integer_column, text_column};
use entipa_core::graph::NodeBean;
use entipa_core::{
    Entity, EntityManager, EntityManagerFactory, PersistenceAdmin, PersistenceError,
    PersistenceResult, PrimaryKey, ResourceEnvironment, UnitConfig,
};
use entipa_driver::{MemoryConnectionSource, MemoryDriverConfig, Row, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A folder: the sample entity of the test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Primary key.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Containing folder, if any.
    pub parent_id: Option<i64>,
}

impl Folder {
    /// Creates a top-level folder.
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            parent_id: None,
        }
    }

    /// Returns the row the folder is stored as.
    #[must_use]
    pub fn to_row(&self) -> Row {
        Row::from_pairs(self.to_columns())
    }
}

impl Entity for Folder {
    fn entity_type() -> &'static str {
        "folders"
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::Integer(self.id)
    }

    fn to_columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("title", self.title.as_str().into()),
            ("parent_id", self.parent_id.into()),
        ]
    }

    fn from_row(row: &Row) -> PersistenceResult<Self> {
        Ok(Self {
            id: integer_column(row, "folders", "id")?,
            title: text_column(row, "folders", "title")?,
            parent_id: optional_integer_column(row, "folders", "parent_id")?,
        })
    }
}

/// Returns the node records of a small classification tree.
///
/// ```text
/// 1 root
/// ├── 2 animals
/// │   ├── 3 cats
/// │   └── 4 dogs
/// └── 5 plants
/// ```
#[must_use]
pub fn classyfy_tree() -> HashMap<i64, NodeBean> {
    [
        NodeBean::root(1, "root").with_children([2, 5]),
        NodeBean::new(2, "animals", Some(1), "category").with_children([3, 4]),
        NodeBean::new(3, "cats", Some(2), "folder"),
        NodeBean::new(4, "dogs", Some(2), "folder"),
        NodeBean::new(5, "plants", Some(1), "category"),
    ]
    .into_iter()
    .map(|bean| (bean.id, bean))
    .collect()
}

/// Script resources held in memory.
///
/// A resource can be marked broken: reading it yields its text and then
/// an I/O error instead of end of file.
#[derive(Debug, Default)]
pub struct MemoryResources {
    scripts: RwLock<HashMap<String, (String, bool)>>,
}

impl MemoryResources {
    /// Creates an empty resource set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a script.
    pub fn add(&self, name: impl Into<String>, text: impl Into<String>) {
        self.scripts.write().insert(name.into(), (text.into(), false));
    }

    /// Adds a script whose read fails after `text`.
    pub fn add_broken(&self, name: impl Into<String>, text: impl Into<String>) {
        self.scripts.write().insert(name.into(), (text.into(), true));
    }

    /// Builder form of [`add`](Self::add).
    #[must_use]
    pub fn with(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(name, text);
        self
    }
}

struct BrokenReader {
    text: Cursor<Vec<u8>>,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.text.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "resource stream broken")),
            n => Ok(n),
        }
    }
}

impl ResourceEnvironment for MemoryResources {
    fn open_resource(&self, name: &str) -> PersistenceResult<Box<dyn Read + Send>> {
        let scripts = self.scripts.read();
        let (text, broken) = scripts
            .get(name)
            .ok_or_else(|| PersistenceError::ResourceNotFound {
                name: name.to_string(),
            })?;
        let text = Cursor::new(text.clone().into_bytes());
        if *broken {
            Ok(Box::new(BrokenReader { text }))
        } else {
            Ok(Box::new(text))
        }
    }

    fn locale(&self) -> String {
        "en_US".to_string()
    }

    fn database_directory(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

/// A persistence unit on the recording in-memory driver.
pub struct TestUnit {
    /// The unit's connection source, shared with the admin.
    pub source: MemoryConnectionSource,
    /// The unit's admin.
    pub admin: PersistenceAdmin,
    /// Script resources for bootstrap.
    pub resources: Arc<MemoryResources>,
}

impl TestUnit {
    /// Creates a unit with the default driver behaviour.
    pub fn new(name: &str) -> Self {
        Self::with_config(UnitConfig::new(name), MemoryDriverConfig::default())
    }

    /// Creates a unit from explicit configurations.
    pub fn with_config(config: UnitConfig, driver: MemoryDriverConfig) -> Self {
        let source = MemoryConnectionSource::with_config(driver);
        let admin = PersistenceAdmin::new(config, Arc::new(source.clone()));
        Self {
            source,
            admin,
            resources: Arc::new(MemoryResources::new()),
        }
    }

    /// Returns the unit's entity manager factory.
    pub fn factory(&self) -> EntityManagerFactory {
        self.admin.entity_manager_factory()
    }

    /// Creates an entity manager.
    pub fn entity_manager(&self) -> EntityManager {
        self.factory()
            .create_entity_manager()
            .expect("Failed to create entity manager")
    }

    /// Makes `find` of folder `folder.id` answer with `folder`.
    pub fn stock_folder(&self, folder: &Folder) {
        self.source
            .respond("SELECT * FROM folders WHERE id = ?", vec![folder.to_row()]);
    }

    /// Makes queries over all folders answer with `folders`.
    pub fn stock_folders(&self, folders: &[Folder]) {
        self.source.respond(
            "SELECT * FROM folders",
            folders.iter().map(Folder::to_row).collect(),
        );
    }
}

/// Runs a test with a fresh unit named `classyfy`.
///
/// # Example
///
/// ```rust,ignore
/// use entipa_testkit::with_unit;
///
/// #[test]
/// fn my_test() {
///     with_unit(|unit| {
///         let mut em = unit.entity_manager();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_unit<F, R>(f: F) -> R
where
    F: FnOnce(&TestUnit) -> R,
{
    let unit = TestUnit::new("classyfy");
    f(&unit)
}

/// Script files in a temporary directory.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Writes a script file.
    pub fn write(&self, name: &str, text: &str) -> &Self {
        std::fs::write(self.dir.path().join(name), text).expect("Failed to write script");
        self
    }

    /// Returns resources reading from the directory.
    pub fn resources(&self) -> entipa_core::DirectoryResources {
        entipa_core::DirectoryResources::new(self.dir.path(), self.dir.path())
    }
}

impl Default for ScriptDir {
    fn default() -> Self {
        Self::new()
    }
}
