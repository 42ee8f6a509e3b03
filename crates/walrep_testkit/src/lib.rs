//! # walrep Testkit
//!
//! Test utilities for walrep.
//!
//! This crate provides:
//! - Cluster fixtures: registries with several named VFS instances
//! - An engine harness reproducing the SQL engine's WAL-mode file I/O
//!   (header probes, shared-memory mapping, index recovery, read-mark
//!   pinned reads and write transactions), so the VFS can be exercised
//!   end to end without the engine itself
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use walrep_testkit::prelude::*;
//!
//! let cluster = Cluster::new(1);
//! let vfs = cluster.vfs(0);
//! let mut conn = Connection::open(&vfs, TEST_DB, EngineOptions::new()).unwrap();
//! conn.write_transaction(&[(1, vec![0xAB; 512]), (2, vec![0xCD; 512])])
//!     .unwrap();
//! let frames = vfs.poll(TEST_DB).unwrap();
//! assert_eq!(frames.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{Connection, EngineOptions};
    pub use crate::fixtures::{Cluster, TEST_DB};
    pub use crate::generators::*;
}

pub use engine::{Connection, EngineOptions};
pub use fixtures::{Cluster, TEST_DB};
