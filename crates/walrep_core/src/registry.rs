//! VFS instances and the registry that names them.
//!
//! Registration is an explicit, host-owned object rather than process
//! state: independent registries give fully isolated "clusters" of VFS
//! instances, and dropping a registry tears everything down.

use crate::error::{VfsError, VfsResult};
use crate::vfs::handle::{FileHandle, FileKind};
use crate::vfs::Database;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Suffix the engine appends to a database name to open its WAL file.
const WAL_SUFFIX: &str = "-wal";

/// A host-owned registry of named VFS instances.
#[derive(Debug, Default)]
pub struct Registry {
    instances: RwLock<HashMap<String, Arc<Vfs>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a VFS instance under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::AlreadyRegistered`] if the name is taken.
    pub fn create(&self, name: &str) -> VfsResult<Arc<Vfs>> {
        let mut instances = self.instances.write();
        if instances.contains_key(name) {
            return Err(VfsError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        let vfs = Arc::new(Vfs::new(name));
        instances.insert(name.to_string(), Arc::clone(&vfs));
        Ok(vfs)
    }

    /// Looks up a registered instance by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Vfs>> {
        self.instances.read().get(name).cloned()
    }

    /// Unregisters an instance. Existing handles stay valid; the
    /// instance's memory is freed when the last reference drops.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NotRegistered`] for an unknown name.
    pub fn remove(&self, name: &str) -> VfsResult<()> {
        self.instances
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VfsError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// Returns the registered instance names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }
}

/// One replicated-storage VFS instance: a namespace of in-memory
/// databases sharing nothing with other instances.
#[derive(Debug)]
pub struct Vfs {
    name: String,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl Vfs {
    /// Creates an instance with the given name, outside any registry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a file, creating the underlying database on first open.
    ///
    /// A name ending in `-wal` opens the write-ahead log of the base
    /// database, mirroring how the engine derives the WAL file name.
    pub fn open(&self, filename: &str) -> VfsResult<FileHandle> {
        let (base, kind) = Self::parse_name(filename);
        let database = {
            let mut databases = self.databases.write();
            Arc::clone(
                databases
                    .entry(base.to_string())
                    .or_insert_with(|| Arc::new(Database::new())),
            )
        };
        Ok(FileHandle::new(database, kind))
    }

    /// Returns whether a file exists: a database once opened, or a WAL
    /// that has a header.
    #[must_use]
    pub fn exists(&self, filename: &str) -> bool {
        let (base, kind) = Self::parse_name(filename);
        let databases = self.databases.read();
        match (databases.get(base), kind) {
            (None, _) => false,
            (Some(_), FileKind::MainDb) => true,
            (Some(db), FileKind::Wal) => db.inner.lock().wal.size() > 0,
        }
    }

    /// Deletes a file: dropping a WAL empties it, deleting a database
    /// removes it from the instance.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::DatabaseNotFound`] for an unknown name, and
    /// [`VfsError::Busy`] when a pinned reader blocks dropping the WAL.
    pub fn delete(&self, filename: &str) -> VfsResult<()> {
        let (base, kind) = Self::parse_name(filename);
        match kind {
            FileKind::Wal => {
                let database = self.database(base)?;
                let mut inner = database.inner.lock();
                inner.truncate(FileKind::Wal, 0)
            }
            FileKind::MainDb => self
                .databases
                .write()
                .remove(base)
                .map(|_| ())
                .ok_or_else(|| VfsError::DatabaseNotFound {
                    name: base.to_string(),
                }),
        }
    }

    /// Looks up a database by its main file name.
    pub(crate) fn database(&self, filename: &str) -> VfsResult<Arc<Database>> {
        self.databases
            .read()
            .get(filename)
            .cloned()
            .ok_or_else(|| VfsError::DatabaseNotFound {
                name: filename.to_string(),
            })
    }

    fn parse_name(filename: &str) -> (&str, FileKind) {
        match filename.strip_suffix(WAL_SUFFIX) {
            Some(base) => (base, FileKind::Wal),
            None => (filename, FileKind::MainDb),
        }
    }
}
