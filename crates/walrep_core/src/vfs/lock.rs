//! Advisory locking for the main database file.
//!
//! Emulates the byte-range locking protocol the engine expects from a
//! POSIX file system, for coordinating multiple connections within one
//! process. Conflicts fail fast with a busy condition; the VFS never
//! queues waiters.

use crate::error::{VfsError, VfsResult};

/// Lock levels on the main database file, from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// No lock held.
    None,
    /// Shared read lock; any number of connections may hold it.
    Shared,
    /// Intent-to-write lock; at most one, coexists with shared locks.
    Reserved,
    /// Transitional lock barring new shared locks while a writer waits
    /// for readers to drain.
    Pending,
    /// Exclusive lock; no other lock of any kind may coexist.
    Exclusive,
}

/// Aggregate lock state of one main database file.
#[derive(Debug, Default)]
pub(crate) struct MainLockState {
    n_shared: u32,
    reserved: bool,
    pending: bool,
    exclusive: bool,
}

impl MainLockState {
    /// Moves one connection from `from` to the stronger level `to`.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Busy`] when another connection's lock
    /// conflicts. The caller's state is unchanged on error.
    pub(crate) fn acquire(&mut self, from: LockLevel, to: LockLevel) -> VfsResult<()> {
        debug_assert!(from < to);

        match to {
            LockLevel::None => {}
            LockLevel::Shared => {
                if self.pending || self.exclusive {
                    return Err(VfsError::Busy);
                }
                self.n_shared += 1;
            }
            LockLevel::Reserved => {
                if self.reserved || self.pending || self.exclusive {
                    return Err(VfsError::Busy);
                }
                self.reserved = true;
            }
            LockLevel::Pending | LockLevel::Exclusive => {
                // A writer reaches Exclusive through Pending; holding
                // Pending keeps new readers out while existing ones drain.
                if self.exclusive || (self.pending && from < LockLevel::Pending) {
                    return Err(VfsError::Busy);
                }
                // The writer's own shared lock is the only one allowed.
                if to == LockLevel::Exclusive && self.n_shared > 1 {
                    return Err(VfsError::Busy);
                }
                self.pending = true;
                if to == LockLevel::Exclusive {
                    self.exclusive = true;
                }
                if from == LockLevel::Reserved {
                    self.reserved = false;
                }
            }
        }
        Ok(())
    }

    /// Moves one connection from `from` down to `to` (`Shared` or `None`).
    pub(crate) fn release(&mut self, from: LockLevel, to: LockLevel) {
        debug_assert!(to <= LockLevel::Shared);

        match from {
            LockLevel::None => return,
            LockLevel::Shared => {}
            LockLevel::Reserved => self.reserved = false,
            LockLevel::Pending => self.pending = false,
            LockLevel::Exclusive => {
                self.exclusive = false;
                self.pending = false;
            }
        }
        if to == LockLevel::None && from >= LockLevel::Shared {
            self.n_shared = self.n_shared.saturating_sub(1);
        }
    }

    /// Reports whether any write-intent lock (reserved, pending, or
    /// exclusive) is currently held.
    pub(crate) fn is_write_locked(&self) -> bool {
        self.reserved || self.pending || self.exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_readers_share() {
        let mut state = MainLockState::default();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        assert_eq!(state.n_shared, 3);
    }

    #[test]
    fn single_reserved() {
        let mut state = MainLockState::default();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::Shared, LockLevel::Reserved).unwrap();

        // A second writer cannot reserve, but readers still enter.
        assert!(matches!(
            state.acquire(LockLevel::Shared, LockLevel::Reserved),
            Err(VfsError::Busy)
        ));
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
    }

    #[test]
    fn pending_blocks_new_readers() {
        let mut state = MainLockState::default();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::Shared, LockLevel::Reserved).unwrap();
        state.acquire(LockLevel::Reserved, LockLevel::Pending).unwrap();

        // Another reader still holds Shared, so Exclusive is refused...
        assert!(matches!(
            state.acquire(LockLevel::Pending, LockLevel::Exclusive),
            Err(VfsError::Busy)
        ));
        // ...and Pending bars new readers from entering meanwhile.
        assert!(matches!(
            state.acquire(LockLevel::None, LockLevel::Shared),
            Err(VfsError::Busy)
        ));
    }

    #[test]
    fn exclusive_after_readers_drain() {
        let mut state = MainLockState::default();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::Shared, LockLevel::Reserved).unwrap();
        state
            .acquire(LockLevel::Reserved, LockLevel::Exclusive)
            .unwrap();
        assert!(state.exclusive);

        state.release(LockLevel::Exclusive, LockLevel::None);
        assert!(!state.is_write_locked());
        assert_eq!(state.n_shared, 0);
    }

    #[test]
    fn release_to_shared_keeps_read_lock() {
        let mut state = MainLockState::default();
        state.acquire(LockLevel::None, LockLevel::Shared).unwrap();
        state.acquire(LockLevel::Shared, LockLevel::Reserved).unwrap();
        state.release(LockLevel::Reserved, LockLevel::Shared);

        assert!(!state.is_write_locked());
        assert_eq!(state.n_shared, 1);
    }
}
