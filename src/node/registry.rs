//! Replica Registry
//!
//! The Primary's set of currently registered replica addresses, consulted
//! when building failover candidate lists. Not persisted: a Primary
//! restart starts from an empty registry, and replicas stay invisible
//! until they re-register.

use std::collections::BTreeSet;

use tokio::sync::Mutex;

/// Set of registered replica addresses (`host:port`).
///
/// Mutations are serialized behind one lock so concurrent register and
/// unregister calls cannot lose updates.
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    addresses: Mutex<BTreeSet<String>>,
}

impl ReplicaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address. Idempotent; returns whether it was new.
    pub async fn register(&self, address: &str) -> bool {
        let added = self.addresses.lock().await.insert(address.to_string());
        if added {
            tracing::info!("Replica registered: {}", address);
        }
        added
    }

    /// Unregister an address. Idempotent; returns whether it was present.
    pub async fn unregister(&self, address: &str) -> bool {
        let removed = self.addresses.lock().await.remove(address);
        if removed {
            tracing::info!("Replica unregistered: {}", address);
        }
        removed
    }

    /// Snapshot of the current address set. Callers must not assume an
    /// order, and the set may change between calls.
    pub async fn snapshot(&self) -> Vec<String> {
        self.addresses.lock().await.iter().cloned().collect()
    }

    /// Number of registered replicas
    pub async fn len(&self) -> usize {
        self.addresses.lock().await.len()
    }

    /// Whether no replicas are registered
    pub async fn is_empty(&self) -> bool {
        self.addresses.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_unregister_idempotent() {
        let registry = ReplicaRegistry::new();

        assert!(registry.register("127.0.0.1:8001").await);
        assert!(!registry.register("127.0.0.1:8001").await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.unregister("127.0.0.1:8001").await);
        assert!(!registry.unregister("127.0.0.1:8001").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_contains_each_address_once() {
        let registry = ReplicaRegistry::new();
        registry.register("127.0.0.1:8002").await;
        registry.register("127.0.0.1:8001").await;
        registry.register("127.0.0.1:8002").await;

        let mut snapshot = registry.snapshot().await;
        snapshot.sort();
        assert_eq!(snapshot, vec!["127.0.0.1:8001", "127.0.0.1:8002"]);
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_not_lost() {
        use std::sync::Arc;

        let registry = Arc::new(ReplicaRegistry::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(&format!("127.0.0.1:{}", 9000 + i)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len().await, 20);
    }
}
