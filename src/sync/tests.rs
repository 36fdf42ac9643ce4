//! Anti-Entropy Module Tests
//!
//! Exercises Merkle-driven pairwise repair, the full-sync fallback when a
//! tree cannot be fetched, and convergence of the preference list after a
//! quorum write plus one pass.

#[cfg(test)]
mod tests {
    use crate::cluster::Cluster;
    use crate::config::ClusterConfig;
    use crate::membership::types::NodeId;
    use crate::storage::merkle::MerkleTree;
    use crate::storage::protocol::{now_ms, ReplicaClient, ReplicaError, Versioned};
    use crate::storage::replica::{FailMode, LocalReplicaClient, ReplicaRegistry, ReplicaStore};
    use crate::storage::ring::Ring;
    use crate::storage::version::VectorClock;
    use crate::sync::synchronizer::Synchronizer;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn node(name: &str) -> NodeId {
        NodeId::new(name)
    }

    fn clock_of(name: &str) -> VectorClock {
        VectorClock::new().update(&node(name))
    }

    fn pair_setup() -> (Arc<LocalReplicaClient>, Ring) {
        let registry = Arc::new(ReplicaRegistry::new());
        registry.register(ReplicaStore::spawn(node("n1")));
        registry.register(ReplicaStore::spawn(node("n2")));
        let client = Arc::new(LocalReplicaClient::new(registry, FailMode::AlwaysSucceed));
        let ring = Ring::build(&[node("n1"), node("n2")], 4);
        (client, ring)
    }

    // ============================================================
    // MERKLE-DRIVEN REPAIR
    // ============================================================

    #[tokio::test]
    async fn test_divergent_replicas_are_repaired_from_the_source() {
        let (client, ring) = pair_setup();

        client
            .put(
                &node("n1"),
                "test_key",
                Versioned::new(b"original_value".to_vec(), clock_of("n1"), now_ms()),
            )
            .await
            .unwrap();
        client
            .put(
                &node("n2"),
                "test_key",
                Versioned::new(b"outdated_value".to_vec(), clock_of("n2"), now_ms()),
            )
            .await
            .unwrap();

        let source_tree = client.get_merkle(&node("n1")).await.unwrap();
        let target_tree = client.get_merkle(&node("n2")).await.unwrap();
        let divergent = source_tree.diff(&target_tree);
        assert!(
            divergent.iter().any(|(key, _)| key == "test_key"),
            "the divergent key must show up in the diff"
        );

        let synchronizer =
            Synchronizer::new(client.clone(), ring, ClusterConfig::default());
        synchronizer.synchronize_node(&node("n1")).await;

        let repaired = client
            .get(&node("n2"), "test_key")
            .await
            .unwrap()
            .expect("the key must exist on the target after repair");
        assert_eq!(repaired.value, b"original_value");
        assert_eq!(repaired.clock, clock_of("n1"), "the triple is copied verbatim");
    }

    #[tokio::test]
    async fn test_missing_key_is_copied_to_the_partner() {
        let (client, ring) = pair_setup();

        client
            .put(
                &node("n1"),
                "lonely",
                Versioned::new(b"copy_me".to_vec(), clock_of("n1"), now_ms()),
            )
            .await
            .unwrap();

        let synchronizer =
            Synchronizer::new(client.clone(), ring, ClusterConfig::default());
        synchronizer.sync().await;

        let copied = client.get(&node("n2"), "lonely").await.unwrap();
        assert_eq!(copied.map(|record| record.value), Some(b"copy_me".to_vec()));
    }

    #[tokio::test]
    async fn test_a_pass_is_idempotent() {
        let (client, ring) = pair_setup();

        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            client
                .put(
                    &node("n1"),
                    key,
                    Versioned::new(value.as_bytes().to_vec(), clock_of("n1"), now_ms()),
                )
                .await
                .unwrap();
        }

        let synchronizer =
            Synchronizer::new(client.clone(), ring, ClusterConfig::default());
        synchronizer.sync().await;

        let first_n1 = client.get_all(&node("n1")).await.unwrap();
        let first_n2 = client.get_all(&node("n2")).await.unwrap();
        assert_eq!(first_n1, first_n2, "one pass should converge the pair");

        synchronizer.sync().await;
        assert_eq!(client.get_all(&node("n1")).await.unwrap(), first_n1);
        assert_eq!(client.get_all(&node("n2")).await.unwrap(), first_n2);
    }

    // ============================================================
    // CONVERGENCE AFTER A QUORUM WRITE
    // ============================================================

    #[tokio::test]
    async fn test_preference_list_converges_after_write_and_pass() {
        let nodes: Vec<NodeId> = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(|name| node(name))
            .collect();
        let config = ClusterConfig::default();
        let ring = Ring::build(&nodes, config.tokens_per_node);
        let cluster = Cluster::initialize(nodes, config.clone());

        let context = clock_of("alpha");
        cluster
            .coordinator
            .put(&ring, "settled", b"settled_value", Some(context.clone()))
            .await
            .unwrap();

        let synchronizer =
            Synchronizer::new(cluster.client.clone(), ring.clone(), config.clone());
        synchronizer.sync().await;

        let targets = ring.preference_list("settled", config.replication_factor);
        let mut triples = Vec::new();
        for target in &targets {
            let record = cluster
                .client
                .get(target, "settled")
                .await
                .unwrap()
                .expect("every preference-list replica should hold the key");
            assert_eq!(record.value, b"settled_value");
            assert_eq!(record.clock, context);
            triples.push(record);
        }
        assert!(
            triples.windows(2).all(|pair| pair[0] == pair[1]),
            "all replicas should hold the identical (value, clock, timestamp)"
        );
    }

    // ============================================================
    // FULL-SYNC FALLBACK
    // ============================================================

    /// Client whose Merkle endpoint is down, forcing the fallback path.
    struct NoMerkleClient {
        inner: LocalReplicaClient,
    }

    #[async_trait]
    impl ReplicaClient for NoMerkleClient {
        async fn get(&self, n: &NodeId, key: &str) -> Result<Option<Versioned>, ReplicaError> {
            self.inner.get(n, key).await
        }

        async fn put(&self, n: &NodeId, key: &str, record: Versioned) -> Result<(), ReplicaError> {
            self.inner.put(n, key, record).await
        }

        async fn get_all(&self, n: &NodeId) -> Result<BTreeMap<String, Versioned>, ReplicaError> {
            self.inner.get_all(n).await
        }

        async fn get_merkle(&self, n: &NodeId) -> Result<MerkleTree, ReplicaError> {
            Err(ReplicaError::Unreachable(n.clone()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_merkle_falls_back_to_full_sync() {
        let registry = Arc::new(ReplicaRegistry::new());
        registry.register(ReplicaStore::spawn(node("n1")));
        registry.register(ReplicaStore::spawn(node("n2")));
        let client = Arc::new(NoMerkleClient {
            inner: LocalReplicaClient::new(registry, FailMode::AlwaysSucceed),
        });

        for (key, value) in [("x", "10"), ("y", "20")] {
            client
                .put(
                    &node("n1"),
                    key,
                    Versioned::new(value.as_bytes().to_vec(), clock_of("n1"), now_ms()),
                )
                .await
                .unwrap();
        }

        let ring = Ring::build(&[node("n1"), node("n2")], 4);
        let synchronizer =
            Synchronizer::new(client.clone(), ring, ClusterConfig::default());
        synchronizer.synchronize_node(&node("n1")).await;

        let copied = client.get_all(&node("n2")).await.unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(copied["x"].value, b"10");
        assert_eq!(copied["y"].value, b"20");
    }
}
