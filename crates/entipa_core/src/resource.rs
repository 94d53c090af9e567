//! Resource environment: where scripts and databases live.
//!
//! The engine never opens files by path. It asks a [`ResourceEnvironment`]
//! for a named resource, so containers can serve scripts from a directory,
//! an archive, or memory.

use crate::error::{PersistenceError, PersistenceResult};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Supplies resources, locale and database location to the engine.
pub trait ResourceEnvironment: Send + Sync {
    /// Opens a named resource for reading.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if no resource has the name, or an I/O
    /// error if it exists but cannot be opened.
    fn open_resource(&self, name: &str) -> PersistenceResult<Box<dyn Read + Send>>;

    /// Returns the locale tag, e.g. `en_AU`.
    fn locale(&self) -> String;

    /// Returns the directory databases are created in.
    fn database_directory(&self) -> PathBuf;
}

/// Resources served from a directory on the local file system.
///
/// # Example
///
/// ```rust,ignore
/// use entipa_core::DirectoryResources;
///
/// let resources = DirectoryResources::new("resources/scripts", "db");
/// let script = resources.open_resource("classyfy-create.sql")?;
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
    database_dir: PathBuf,
    locale: String,
}

impl DirectoryResources {
    /// Creates an environment reading resources below `root`.
    pub fn new(root: impl Into<PathBuf>, database_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            database_dir: database_dir.into(),
            locale: "en_US".to_string(),
        }
    }

    /// Sets the locale tag.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Returns the resource root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceEnvironment for DirectoryResources {
    fn open_resource(&self, name: &str) -> PersistenceResult<Box<dyn Read + Send>> {
        let path = self.root.join(name);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(PersistenceError::ResourceNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(PersistenceError::Script {
                file: path.display().to_string(),
                source: e,
            }),
        }
    }

    fn locale(&self) -> String {
        self.locale.clone()
    }

    fn database_directory(&self) -> PathBuf {
        self.database_dir.clone()
    }
}
