//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// An access touched a page that is not allocated, or ran past a page
    /// boundary.
    #[error("access out of bounds: page {page}, offset {offset}, len {len}, store has {n_pages} pages of {page_size} bytes")]
    OutOfBounds {
        /// The page index accessed.
        page: u64,
        /// The offset within the page.
        offset: usize,
        /// The length of the access.
        len: usize,
        /// Number of allocated pages.
        n_pages: u64,
        /// The store's page size.
        page_size: usize,
    },

    /// Growing the store failed because memory could not be reserved.
    #[error("out of memory growing store to {requested} pages")]
    OutOfMemory {
        /// The requested number of pages.
        requested: u64,
    },
}
