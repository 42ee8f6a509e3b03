//! The replication-facing protocol: poll, commit and revert.
//!
//! An external replication layer drives these three operations, one
//! control thread per VFS instance:
//!
//! - [`Vfs::poll`] harvests the frames of a locally completed but
//!   unreplicated write transaction;
//! - [`Vfs::commit`] applies frames accepted by the replication layer
//!   (this node's own polled frames, or frames originating from another
//!   node) and makes them visible to readers;
//! - [`Vfs::revert`] abandons a transaction that will not reach quorum.
//!
//! Per database the states move `Idle -> Pending -> Polled -> Idle`
//! (via commit) or back to `Idle` via revert; the write lock is held from
//! the moment the engine starts the transaction until commit or revert,
//! so a second writer always fails fast with a busy condition.

use crate::error::{VfsError, VfsResult};
use crate::registry::Vfs;
use crate::vfs::shm::LockOwner;
use tracing::debug;

/// One WAL frame as exchanged with the replication layer: the page it
/// replaces and the page contents. Frame headers are not exchanged; each
/// node encodes its own, with its own salts and checksum chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The 1-based database page this frame writes.
    pub page_number: u32,
    /// The page payload; its length is the database page size.
    pub data: Vec<u8>,
}

impl Vfs {
    /// Returns the pending transaction's frames in write order and clears
    /// the buffer, or an empty list when no transaction is pending.
    ///
    /// Polling does not advance mxFrame and does not release the write
    /// lock: the transaction is durable locally but not yet externally
    /// committed, so a concurrent writer must still be refused. The lock
    /// is released by [`Vfs::commit`] or [`Vfs::revert`].
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Busy`] if the engine is still inside the write
    /// transaction, and [`VfsError::DatabaseNotFound`] for an unknown
    /// file name.
    pub fn poll(&self, filename: &str) -> VfsResult<Vec<Frame>> {
        let database = self.database(filename)?;
        let mut inner = database.inner.lock();

        if !inner.wal.has_pending() {
            return Ok(Vec::new());
        }
        if let Some(LockOwner::Handle(_)) = inner.shm.write_lock_owner() {
            return Err(VfsError::Busy);
        }

        let frames = inner.wal.take_pending()?;
        inner.shm.hold_write_lock_for_pending();
        debug!(db = filename, frames = frames.len(), "polled pending transaction");
        Ok(frames)
    }

    /// Appends externally accepted frames to the WAL, advances the
    /// WAL-index header to make them visible, and releases the write
    /// lock.
    ///
    /// The frames may be this node's own polled frames or frames
    /// replicated from another node; either way each frame header is
    /// encoded locally, chaining from the WAL's committed tail. On a node
    /// with no WAL yet, a fresh generation is started first.
    ///
    /// Safe to call once per accepted batch; it is not designed to be
    /// called twice for the same batch.
    ///
    /// # Errors
    ///
    /// Rejects an empty batch or mis-sized frame payloads as
    /// [`VfsError::InvalidArgument`] and a batch arriving while local
    /// frames are still unpolled as [`VfsError::InvalidOperation`],
    /// leaving all state unchanged.
    pub fn commit(&self, filename: &str, frames: &[Frame]) -> VfsResult<()> {
        if frames.is_empty() {
            return Err(VfsError::invalid_argument("empty frame batch"));
        }
        let database = self.database(filename)?;
        let mut inner = database.inner.lock();

        if let Some(LockOwner::Handle(_)) = inner.shm.write_lock_owner() {
            return Err(VfsError::Busy);
        }
        if inner.wal.has_pending() {
            return Err(VfsError::invalid_operation(
                "pending frames must be polled or reverted before commit",
            ));
        }

        let db_pages = inner.db.n_pages();
        let (mx_frame, n_pages, checksum) = inner.wal.append_committed(frames, db_pages)?;
        inner.write_index_tail(mx_frame, n_pages, checksum)?;
        inner.shm.release_write_lock();

        debug!(
            db = filename,
            frames = frames.len(),
            mx_frame,
            "committed replicated frames"
        );
        Ok(())
    }

    /// Discards the pending transaction and restores the WAL-index header
    /// (both copies) to its pre-transaction state, releasing the write
    /// lock.
    ///
    /// Used when a locally buffered transaction will not reach quorum:
    /// its effects become invisible to subsequent readers and its frame
    /// numbers are reused by the next transaction.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::InvalidOperation`] when no transaction is
    /// pending, and [`VfsError::Busy`] while the engine is still inside
    /// the write transaction.
    pub fn revert(&self, filename: &str) -> VfsResult<()> {
        let database = self.database(filename)?;
        let mut inner = database.inner.lock();

        match inner.shm.write_lock_owner() {
            Some(LockOwner::Handle(_)) => return Err(VfsError::Busy),
            Some(LockOwner::PendingTransaction) => {}
            None => {
                if !inner.wal.has_pending() {
                    return Err(VfsError::invalid_operation("no pending transaction"));
                }
            }
        }

        inner.wal.clear_pending();
        inner.restore_index_header()?;
        inner.shm.release_write_lock();

        debug!(db = filename, "reverted pending transaction");
        Ok(())
    }
}
