//! Per-open-file objects exposed to the engine.

use crate::error::{VfsError, VfsResult};
use crate::vfs::lock::LockLevel;
use crate::vfs::Database;
use std::sync::Arc;

/// Which file of a database a handle is open on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The main database file.
    MainDb,
    /// The write-ahead log file.
    Wal,
}

/// Kind of shared-memory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmLockKind {
    /// Many-reader lock.
    Shared,
    /// Single-holder lock.
    Exclusive,
}

/// An open file of a database: the object through which the engine issues
/// reads, writes, locks and shared-memory operations.
///
/// Dropping a handle releases every lock it still holds.
#[derive(Debug)]
pub struct FileHandle {
    database: Arc<Database>,
    kind: FileKind,
    id: u64,
    lock: LockLevel,
    shm_shared: u8,
    shm_exclusive: u8,
}

impl FileHandle {
    pub(crate) fn new(database: Arc<Database>, kind: FileKind) -> Self {
        let id = database.next_handle_id();
        Self {
            database,
            kind,
            id,
            lock: LockLevel::None,
            shm_shared: 0,
            shm_exclusive: 0,
        }
    }

    /// Returns which file this handle is open on.
    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::ShortRead`] past the end of the file; the
    /// engine treats the missing bytes as zero.
    pub fn read_at(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        self.database.inner.lock().read(self.kind, offset, len)
    }

    /// Writes `data` at `offset`, allocating as needed.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<()> {
        self.database.inner.lock().write(self.kind, offset, data)
    }

    /// Truncates the file to `size` bytes.
    pub fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.database.inner.lock().truncate(self.kind, size)
    }

    /// Synchronizes the file.
    ///
    /// A no-op: buffered state is the point of truth, and durability to
    /// physical media is the replication layer's responsibility.
    pub fn sync(&mut self) -> VfsResult<()> {
        Ok(())
    }

    /// Returns the current file size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.database.inner.lock().size(self.kind)
    }

    /// Upgrades this handle's lock on the main database file to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Busy`] immediately on conflict; the VFS never
    /// blocks waiting for a lock.
    pub fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        if self.kind != FileKind::MainDb {
            return Err(VfsError::invalid_operation(
                "file locks apply to the main database file",
            ));
        }
        if level <= self.lock {
            return Ok(());
        }
        self.database.inner.lock().main_locks.acquire(self.lock, level)?;
        self.lock = level;
        Ok(())
    }

    /// Downgrades this handle's lock on the main database file to `level`
    /// (`Shared` or `None`).
    pub fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        if self.kind != FileKind::MainDb {
            return Err(VfsError::invalid_operation(
                "file locks apply to the main database file",
            ));
        }
        if level >= self.lock {
            return Ok(());
        }
        self.database.inner.lock().main_locks.release(self.lock, level);
        self.lock = level;
        Ok(())
    }

    /// Maps shared-memory region `region`, allocating it when `extend` is
    /// set. Returns whether the region exists afterwards.
    pub fn shm_map(&mut self, region: usize, extend: bool) -> VfsResult<bool> {
        self.main_db_only()?;
        self.database.inner.lock().shm.map_region(region, extend)
    }

    /// Reads from a mapped shared-memory region.
    pub fn shm_read(&self, region: usize, offset: usize, len: usize) -> VfsResult<Vec<u8>> {
        self.main_db_only()?;
        self.database.inner.lock().shm.read(region, offset, len)
    }

    /// Writes into a shared-memory region.
    pub fn shm_write(&mut self, region: usize, offset: usize, data: &[u8]) -> VfsResult<()> {
        self.main_db_only()?;
        self.database.inner.lock().shm.write(region, offset, data)
    }

    /// Acquires `n` shared-memory locks starting at slot `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Busy`] immediately on conflict. In particular,
    /// the write lock (slot 0) stays busy while a transaction is pending
    /// replication, so a second writer fails fast.
    pub fn shm_lock(&mut self, offset: usize, n: usize, kind: ShmLockKind) -> VfsResult<()> {
        self.main_db_only()?;
        let mut inner = self.database.inner.lock();
        match kind {
            ShmLockKind::Shared => inner.shm.lock_shared(offset, n)?,
            ShmLockKind::Exclusive => inner.shm.lock_exclusive(offset, n, self.id)?,
        }
        for slot in offset..offset + n {
            match kind {
                ShmLockKind::Shared => self.shm_shared |= 1 << slot,
                ShmLockKind::Exclusive => self.shm_exclusive |= 1 << slot,
            }
        }
        Ok(())
    }

    /// Releases `n` shared-memory locks starting at slot `offset`.
    pub fn shm_unlock(&mut self, offset: usize, n: usize, kind: ShmLockKind) -> VfsResult<()> {
        self.main_db_only()?;
        let mut inner = self.database.inner.lock();
        match kind {
            ShmLockKind::Shared => inner.shm.unlock_shared(offset, n)?,
            ShmLockKind::Exclusive => inner.shm_unlock_exclusive(self.id, offset, n)?,
        }
        for slot in offset..offset + n {
            match kind {
                ShmLockKind::Shared => self.shm_shared &= !(1 << slot),
                ShmLockKind::Exclusive => self.shm_exclusive &= !(1 << slot),
            }
        }
        Ok(())
    }

    /// Memory barrier between shared-memory accesses. All state is behind
    /// one mutex, so this is a no-op.
    pub fn shm_barrier(&self) {}

    fn main_db_only(&self) -> VfsResult<()> {
        if self.kind != FileKind::MainDb {
            return Err(VfsError::invalid_operation(
                "shared memory is accessed through the main file handle",
            ));
        }
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.database.inner.lock().release_handle(
            self.id,
            self.lock,
            self.shm_shared,
            self.shm_exclusive,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    #[test]
    fn drop_releases_shm_locks() {
        let registry = Registry::new();
        let vfs = registry.create("test").unwrap();

        let mut h1 = vfs.open("db").unwrap();
        h1.shm_lock(3, 1, ShmLockKind::Shared).unwrap();
        drop(h1);

        let mut h2 = vfs.open("db").unwrap();
        h2.shm_lock(3, 1, ShmLockKind::Exclusive).unwrap();
    }

    #[test]
    fn drop_releases_main_lock() {
        let registry = Registry::new();
        let vfs = registry.create("test").unwrap();

        let mut h1 = vfs.open("db").unwrap();
        h1.lock(LockLevel::Shared).unwrap();
        h1.lock(LockLevel::Reserved).unwrap();
        drop(h1);

        let mut h2 = vfs.open("db").unwrap();
        h2.lock(LockLevel::Shared).unwrap();
        h2.lock(LockLevel::Exclusive).unwrap();
    }

    #[test]
    fn wal_handle_rejects_shm_operations() {
        let registry = Registry::new();
        let vfs = registry.create("test").unwrap();

        let mut wal = vfs.open("db-wal").unwrap();
        assert!(wal.shm_map(0, true).is_err());
        assert!(wal.lock(LockLevel::Shared).is_err());
    }

    #[test]
    fn sync_is_a_noop() {
        let registry = Registry::new();
        let vfs = registry.create("test").unwrap();
        let mut db = vfs.open("db").unwrap();
        db.sync().unwrap();
    }
}
