//! Error types for VFS operations.

use thiserror::Error;

/// Result type for VFS operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors that can occur in VFS operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A lock is held by another connection or by a pending transaction.
    ///
    /// Always recoverable: the caller may retry or abort. The VFS never
    /// queues waiters.
    #[error("resource busy: conflicting lock held")]
    Busy,

    /// A read ran past the end of the file.
    ///
    /// Carries how many of the requested bytes exist; the engine treats a
    /// short read as zero-filled.
    #[error("short read: requested {requested} bytes, {available} available")]
    ShortRead {
        /// Bytes requested.
        requested: usize,
        /// Bytes actually available at the requested offset.
        available: usize,
    },

    /// A file access did not match the fixed access pattern of the file
    /// (page-aligned database pages, header/frame-aligned WAL writes).
    #[error("unaligned access: offset {offset}, len {len}")]
    UnalignedAccess {
        /// Byte offset of the access.
        offset: u64,
        /// Length of the access.
        len: usize,
    },

    /// A header carried an invalid page size encoding.
    #[error("invalid page size: {value}")]
    InvalidPageSize {
        /// The decoded (sentinel 0) or raw value.
        value: u32,
    },

    /// No database with the given file name exists in this VFS instance.
    #[error("no such database: {name}")]
    DatabaseNotFound {
        /// The file name looked up.
        name: String,
    },

    /// A VFS instance with the given name is already registered.
    #[error("vfs already registered: {name}")]
    AlreadyRegistered {
        /// The instance name.
        name: String,
    },

    /// No VFS instance with the given name is registered.
    #[error("vfs not registered: {name}")]
    NotRegistered {
        /// The instance name.
        name: String,
    },

    /// An argument violated the operation's contract.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the violation.
        message: String,
    },

    /// The operation is not valid in the file's current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A binary structure could not be decoded or encoded.
    #[error("format error: {0}")]
    Format(#[from] walrep_format::FormatError),

    /// A page store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] walrep_storage::StorageError),
}

impl VfsError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
