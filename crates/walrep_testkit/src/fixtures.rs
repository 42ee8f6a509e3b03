//! Cluster fixtures.
//!
//! A cluster is a registry holding several VFS instances named "0", "1",
//! ... - one per simulated node. Instances share nothing; frames move
//! between them only through poll and commit, the way the replication
//! layer would move them.

use std::sync::Arc;
use walrep_core::{Registry, Vfs};

/// Database file name used throughout the tests.
pub const TEST_DB: &str = "test.db";

/// A registry with `n` VFS instances registered under "0".."n".
pub struct Cluster {
    registry: Registry,
    n: usize,
}

impl Cluster {
    /// Creates a cluster of `n` instances.
    pub fn new(n: usize) -> Self {
        let registry = Registry::new();
        for i in 0..n {
            registry
                .create(&i.to_string())
                .expect("fresh registry rejects no names");
        }
        Self { registry, n }
    }

    /// Returns instance `i`.
    pub fn vfs(&self, i: usize) -> Arc<Vfs> {
        assert!(i < self.n, "cluster has {} instances", self.n);
        self.registry
            .get(&i.to_string())
            .expect("instance was registered in new()")
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.n
    }

    /// True if the cluster has no instances.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_instances_are_registered() {
        let cluster = Cluster::new(3);
        assert_eq!(cluster.len(), 3);
        for i in 0..3 {
            assert_eq!(cluster.vfs(i).name(), i.to_string());
        }
    }
}
