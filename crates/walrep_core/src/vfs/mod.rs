//! Per-database state and the coordination between its three files.
//!
//! A [`Database`] bundles the main file, the WAL file and the
//! shared-memory file of one database, mutated under a single lock so the
//! WAL and the WAL-index header can never be observed out of step.

pub(crate) mod database;
pub(crate) mod handle;
pub(crate) mod lock;
pub(crate) mod shm;
pub(crate) mod wal;

use crate::error::{VfsError, VfsResult};
use database::DatabaseFile;
use handle::FileKind;
use lock::MainLockState;
use parking_lot::Mutex;
use shm::{LockOwner, ShmFile};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use wal::WalFile;
use walrep_format::{rewrite_wal_index_header, WAL_HEADER_SIZE};

/// Mutable state of one database, guarded by [`Database::inner`].
#[derive(Debug, Default)]
pub(crate) struct DatabaseInner {
    pub(crate) db: DatabaseFile,
    pub(crate) wal: WalFile,
    pub(crate) shm: ShmFile,
    pub(crate) main_locks: MainLockState,
}

impl DatabaseInner {
    pub(crate) fn read(&self, kind: FileKind, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        match kind {
            FileKind::MainDb => self.db.read_at(offset, len),
            FileKind::Wal => self.wal.read_at(offset, len),
        }
    }

    pub(crate) fn write(&mut self, kind: FileKind, offset: u64, data: &[u8]) -> VfsResult<()> {
        match kind {
            FileKind::MainDb => self.db.write_at(offset, data),
            FileKind::Wal => {
                // A header rewrite that starts a new generation discards
                // the committed frames; a pinned reader blocks it.
                if offset == 0
                    && data.len() == WAL_HEADER_SIZE
                    && self.wal.would_reset(data)?
                    && self.shm.readers_pinned()
                {
                    return Err(VfsError::Busy);
                }
                self.wal.write_at(offset, data)
            }
        }
    }

    pub(crate) fn truncate(&mut self, kind: FileKind, size: u64) -> VfsResult<()> {
        match kind {
            FileKind::MainDb => self.db.truncate(size),
            FileKind::Wal => {
                if self.wal.n_frames() > 0 && self.shm.readers_pinned() {
                    return Err(VfsError::Busy);
                }
                self.wal.truncate(size)
            }
        }
    }

    pub(crate) fn size(&self, kind: FileKind) -> u64 {
        match kind {
            FileKind::MainDb => self.db.size(),
            FileKind::Wal => self.wal.size(),
        }
    }

    /// Rewrites the WAL-index header (both copies) to the given tail,
    /// refreshing the salt copy from the WAL header. A no-op when shared
    /// memory has not been mapped: there is no index for readers to
    /// observe yet.
    pub(crate) fn write_index_tail(
        &mut self,
        mx_frame: u32,
        n_pages: u32,
        checksum: (u32, u32),
    ) -> VfsResult<()> {
        let salts = self.wal.salt_bytes();
        if let Some(region) = self.shm.region_mut(0) {
            if let Some(salts) = salts {
                region[32..40].copy_from_slice(&salts);
            }
            rewrite_wal_index_header(region, mx_frame, n_pages, checksum)?;
        }
        Ok(())
    }

    /// Rewrites the WAL-index header (both copies) to the committed WAL
    /// tail.
    pub(crate) fn restore_index_header(&mut self) -> VfsResult<()> {
        let (mx_frame, n_pages, checksum) = self.wal.committed_state(self.db.n_pages())?;
        self.write_index_tail(mx_frame, n_pages, checksum)
    }

    /// Releases a handle's exclusive shm locks, intercepting the write
    /// lock: when the engine lets go of it with frames still buffered,
    /// the transaction has ended locally but is not replicated. The index
    /// header is rolled back so readers cannot see the frames, and the
    /// lock is retained on behalf of the pending transaction.
    pub(crate) fn shm_unlock_exclusive(
        &mut self,
        handle: u64,
        offset: usize,
        n: usize,
    ) -> VfsResult<()> {
        let covers_write_lock = offset == shm::WRITE_LOCK
            && self.shm.write_lock_owner() == Some(LockOwner::Handle(handle));

        self.shm.unlock_exclusive(offset, n, handle)?;

        if covers_write_lock && self.wal.has_pending() {
            self.restore_index_header()?;
            self.shm.hold_write_lock_for_pending();
            debug!("write lock retained for pending transaction");
        }
        Ok(())
    }

    /// Releases everything a closing handle still holds.
    pub(crate) fn release_handle(
        &mut self,
        handle: u64,
        level: lock::LockLevel,
        shm_shared: u8,
        shm_exclusive: u8,
    ) {
        self.main_locks.release(level, lock::LockLevel::None);
        for slot in 0..walrep_format::WAL_SHM_NLOCK {
            if shm_shared & (1 << slot) != 0 {
                let _ = self.shm.unlock_shared(slot, 1);
            }
            if shm_exclusive & (1 << slot) != 0 {
                let _ = self.shm_unlock_exclusive(handle, slot, 1);
            }
        }
    }
}

/// One named database within a VFS instance.
#[derive(Debug, Default)]
pub(crate) struct Database {
    pub(crate) inner: Mutex<DatabaseInner>,
    next_handle: AtomicU64,
}

impl Database {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_handle_id(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}
