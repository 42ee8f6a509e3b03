//! # walrep Storage
//!
//! In-memory, page-addressable byte containers.
//!
//! A [`PageStore`] represents the contents of one logical file: the main
//! database file (one page per database page), the WAL file (one page per
//! frame) or the shared-memory file (one page per index region). Stores
//! are **opaque containers** - they do not interpret the bytes they hold;
//! all format knowledge lives in the layers above.
//!
//! ## Design Principles
//!
//! - Stores are simple page containers (read, write, truncate)
//! - No knowledge of headers, frames or the WAL index
//! - Writes past the end allocate zeroed pages on demand
//! - Allocation failure is an error, never an abort
//!
//! ## Example
//!
//! ```rust
//! use walrep_storage::PageStore;
//!
//! let mut store = PageStore::new(512);
//! store.write(0, 0, b"hello").unwrap();
//! assert_eq!(store.read(0, 0, 5).unwrap(), b"hello");
//! assert_eq!(store.n_pages(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod page_store;

pub use error::{StorageError, StorageResult};
pub use page_store::PageStore;
