//! # walrep Core
//!
//! Turns a single-writer, WAL-based embedded SQL engine into a replicated
//! storage node. The engine's file I/O is intercepted into in-memory page
//! stores; writes are captured in a transaction frame buffer instead of
//! being persisted, and an external replication layer drives a
//! poll/commit/revert protocol to propagate committed frames to other
//! nodes before they become visible to readers.
//!
//! ## Architecture
//!
//! - [`Registry`] / [`Vfs`] - explicit, host-owned instances; the engine
//!   looks a VFS up by name and opens files through it.
//! - [`FileHandle`] - per-open-file objects implementing the read, write,
//!   lock and shared-memory operations the engine expects.
//! - [`Vfs::poll`] / [`Vfs::commit`] / [`Vfs::revert`] - the
//!   replication-facing protocol over [`Frame`] lists.
//!
//! ## Key Invariants
//!
//! - Readers never observe a partial transaction: buffered frames are
//!   invisible until commit advances mxFrame.
//! - Writers are serialized: at most one pending transaction per
//!   database, and lock conflicts fail fast with a busy condition.
//! - The two copies of the WAL-index critical prefix are byte-identical
//!   after every successful operation.
//! - Durability to physical media is explicitly not this layer's job;
//!   `sync` is a no-op and the replication layer owns durability.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod registry;
mod replication;
mod vfs;

pub use error::{VfsError, VfsResult};
pub use registry::{Registry, Vfs};
pub use replication::Frame;
pub use vfs::handle::{FileHandle, FileKind, ShmLockKind};
pub use vfs::lock::LockLevel;
