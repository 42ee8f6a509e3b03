//! The shared-memory file: WAL-index regions and the advisory lock slots.
//!
//! The engine coordinates WAL readers and the single writer through 8
//! lock slots carried by the shared-memory file: slot 0 is the WAL write
//! lock and slots `3 + i` pin reader-mark `i`. Shared locks are
//! many-reader; exclusive locks fail fast when contended.

use crate::error::{VfsError, VfsResult};
use walrep_format::{wal_read_lock, WAL_INDEX_REGION_SIZE, WAL_NREADER, WAL_SHM_NLOCK};
use walrep_storage::PageStore;

/// The WAL write lock slot.
pub(crate) const WRITE_LOCK: usize = 0;

/// Holder of an exclusive lock slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockOwner {
    /// A file handle, identified by its handle id.
    Handle(u64),
    /// The pending transaction: the write lock is retained after the
    /// engine released it, until the transaction is committed or
    /// reverted.
    PendingTransaction,
}

/// In-memory contents of one shared-memory file.
#[derive(Debug)]
pub(crate) struct ShmFile {
    regions: PageStore,
    shared: [u32; WAL_SHM_NLOCK],
    exclusive: [Option<LockOwner>; WAL_SHM_NLOCK],
}

impl Default for ShmFile {
    fn default() -> Self {
        Self {
            regions: PageStore::new(WAL_INDEX_REGION_SIZE),
            shared: [0; WAL_SHM_NLOCK],
            exclusive: [None; WAL_SHM_NLOCK],
        }
    }
}

impl ShmFile {
    /// Maps region `region`, allocating zeroed regions up to it when
    /// `extend` is set. Returns whether the region exists afterwards.
    pub(crate) fn map_region(&mut self, region: usize, extend: bool) -> VfsResult<bool> {
        if (region as u64) < self.regions.n_pages() {
            return Ok(true);
        }
        if !extend {
            return Ok(false);
        }
        self.regions.grow_to(region as u64 + 1)?;
        Ok(true)
    }

    /// Returns a mutable view of a mapped region.
    pub(crate) fn region_mut(&mut self, region: usize) -> Option<&mut [u8]> {
        self.regions.page_mut(region as u64)
    }

    /// Reads from a mapped region.
    pub(crate) fn read(&self, region: usize, offset: usize, len: usize) -> VfsResult<Vec<u8>> {
        Ok(self.regions.read(region as u64, offset, len)?.to_vec())
    }

    /// Writes into a region, mapping it if needed.
    pub(crate) fn write(&mut self, region: usize, offset: usize, data: &[u8]) -> VfsResult<()> {
        self.regions.write(region as u64, offset, data)?;
        Ok(())
    }

    /// Acquires shared locks on `n` slots starting at `offset`.
    ///
    /// All-or-nothing: on conflict nothing is acquired and
    /// [`VfsError::Busy`] is returned.
    pub(crate) fn lock_shared(&mut self, offset: usize, n: usize) -> VfsResult<()> {
        let range = Self::slot_range(offset, n)?;
        if range.clone().any(|slot| self.exclusive[slot].is_some()) {
            return Err(VfsError::Busy);
        }
        for slot in range {
            self.shared[slot] += 1;
        }
        Ok(())
    }

    /// Releases shared locks on `n` slots starting at `offset`.
    pub(crate) fn unlock_shared(&mut self, offset: usize, n: usize) -> VfsResult<()> {
        for slot in Self::slot_range(offset, n)? {
            self.shared[slot] = self.shared[slot].saturating_sub(1);
        }
        Ok(())
    }

    /// Acquires exclusive locks on `n` slots starting at `offset` for the
    /// given handle. All-or-nothing, fail-fast.
    pub(crate) fn lock_exclusive(&mut self, offset: usize, n: usize, handle: u64) -> VfsResult<()> {
        let range = Self::slot_range(offset, n)?;
        if range
            .clone()
            .any(|slot| self.shared[slot] > 0 || self.exclusive[slot].is_some())
        {
            return Err(VfsError::Busy);
        }
        for slot in range {
            self.exclusive[slot] = Some(LockOwner::Handle(handle));
        }
        Ok(())
    }

    /// Releases the exclusive locks the given handle holds on `n` slots
    /// starting at `offset`. Slots held by another owner are untouched.
    pub(crate) fn unlock_exclusive(&mut self, offset: usize, n: usize, handle: u64) -> VfsResult<()> {
        for slot in Self::slot_range(offset, n)? {
            if self.exclusive[slot] == Some(LockOwner::Handle(handle)) {
                self.exclusive[slot] = None;
            }
        }
        Ok(())
    }

    /// Returns the current owner of the write lock slot.
    pub(crate) fn write_lock_owner(&self) -> Option<LockOwner> {
        self.exclusive[WRITE_LOCK]
    }

    /// Marks the write lock as retained by the pending transaction.
    pub(crate) fn hold_write_lock_for_pending(&mut self) {
        self.exclusive[WRITE_LOCK] = Some(LockOwner::PendingTransaction);
    }

    /// Releases the write lock regardless of owner.
    pub(crate) fn release_write_lock(&mut self) {
        self.exclusive[WRITE_LOCK] = None;
    }

    /// True if any reader-mark slot is locked, pinning a WAL snapshot.
    pub(crate) fn readers_pinned(&self) -> bool {
        (0..WAL_NREADER).any(|i| {
            let slot = wal_read_lock(i);
            self.shared[slot] > 0 || self.exclusive[slot].is_some()
        })
    }

    fn slot_range(offset: usize, n: usize) -> VfsResult<std::ops::Range<usize>> {
        if n == 0 || offset + n > WAL_SHM_NLOCK {
            return Err(VfsError::invalid_argument(format!(
                "lock range {offset}..{} out of bounds",
                offset + n
            )));
        }
        Ok(offset..offset + n)
    }
}
