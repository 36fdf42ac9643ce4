//! Coordinator Module Tests
//!
//! Drives the quorum write path and the reconciling read path against
//! in-process clusters, including the injected failure scenarios.

#[cfg(test)]
mod tests {
    use crate::cluster::Cluster;
    use crate::config::ClusterConfig;
    use crate::coordinator::service::{Coordinator, GetError, PutError};
    use crate::handoff::store::HintTable;
    use crate::membership::types::NodeId;
    use crate::storage::merkle::MerkleTree;
    use crate::storage::protocol::{now_ms, ReplicaClient, ReplicaError, Versioned};
    use crate::storage::replica::{FailMode, LocalReplicaClient, ReplicaRegistry, ReplicaStore};
    use crate::storage::ring::Ring;
    use crate::storage::version::VectorClock;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    fn node(name: &str) -> NodeId {
        NodeId::new(name)
    }

    fn numbered_nodes(count: usize) -> Vec<NodeId> {
        (1..=count).map(|i| node(&format!("node{}", i))).collect()
    }

    fn cluster_with(fail_mode: FailMode) -> (Cluster, Ring) {
        let config = ClusterConfig {
            fail_mode,
            ..ClusterConfig::default()
        };
        let nodes = numbered_nodes(10);
        let ring = Ring::build(&nodes, config.tokens_per_node);
        (Cluster::initialize(nodes, config), ring)
    }

    /// Client that fails writes for an explicit node set, leaving everything
    /// else to the healthy in-process replicas.
    struct PartitionedClient {
        inner: LocalReplicaClient,
        failing: HashSet<NodeId>,
    }

    #[async_trait]
    impl ReplicaClient for PartitionedClient {
        async fn get(&self, n: &NodeId, key: &str) -> Result<Option<Versioned>, ReplicaError> {
            self.inner.get(n, key).await
        }

        async fn put(&self, n: &NodeId, key: &str, record: Versioned) -> Result<(), ReplicaError> {
            if self.failing.contains(n) {
                return Err(ReplicaError::PutFailed(n.clone()));
            }
            self.inner.put(n, key, record).await
        }

        async fn get_all(&self, n: &NodeId) -> Result<BTreeMap<String, Versioned>, ReplicaError> {
            self.inner.get_all(n).await
        }

        async fn get_merkle(&self, n: &NodeId) -> Result<MerkleTree, ReplicaError> {
            self.inner.get_merkle(n).await
        }
    }

    fn partitioned_setup(
        names: &[&str],
        failing: &[&str],
    ) -> (Coordinator<PartitionedClient>, Arc<HintTable>, Ring) {
        let registry = Arc::new(ReplicaRegistry::new());
        for name in names {
            registry.register(ReplicaStore::spawn(node(name)));
        }
        let client = PartitionedClient {
            inner: LocalReplicaClient::new(registry, FailMode::AlwaysSucceed),
            failing: failing.iter().map(|name| node(name)).collect(),
        };
        let hints = Arc::new(HintTable::new());
        let config = ClusterConfig::default();
        let nodes: Vec<NodeId> = names.iter().map(|name| node(name)).collect();
        let ring = Ring::build(&nodes, config.tokens_per_node);
        (
            Coordinator::new(Arc::new(client), hints.clone(), config),
            hints,
            ring,
        )
    }

    // ============================================================
    // HEALTHY-PATH SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);

        cluster
            .coordinator
            .put(&ring, "test_key", b"test_value", None)
            .await
            .expect("quorum write should succeed with healthy replicas");

        let value = cluster.coordinator.get(&ring, "test_key").await.unwrap();
        assert_eq!(value, b"test_value");
    }

    #[tokio::test]
    async fn test_get_of_unknown_key_reports_no_responses() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);

        let result = cluster.coordinator.get(&ring, "never_written").await;
        assert_eq!(result, Err(GetError::NoResponses));
    }

    // ============================================================
    // FAILURE SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn test_all_replicas_failing_hints_every_target() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysFail);

        let result = cluster
            .coordinator
            .put(&ring, "key_fail", b"value_fail", None)
            .await;
        assert_eq!(
            result,
            Err(PutError::QuorumNotReached { needed: 2, got: 0 })
        );

        let targets = ring.preference_list("key_fail", cluster.config.replication_factor);
        assert_eq!(cluster.hints.len(), 3);
        for target in &targets {
            let hint = cluster
                .hints
                .get(target, "key_fail")
                .expect("each preference-list replica should hold a hint");
            assert_eq!(hint.value, b"value_fail");
        }

        let read = cluster.coordinator.get(&ring, "key_fail").await;
        assert_eq!(read, Err(GetError::NoResponses));
    }

    #[tokio::test]
    async fn test_parked_writes_drain_once_replicas_recover() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysFail);

        cluster
            .coordinator
            .put(&ring, "test_key", b"test_value", None)
            .await
            .expect_err("no replica accepts writes yet");
        assert_eq!(cluster.hints.len(), 3);

        cluster.client.set_fail_mode(FailMode::AlwaysSucceed).await;
        cluster.hints.retry_all(cluster.client.as_ref()).await;

        let value = cluster.coordinator.get(&ring, "test_key").await.unwrap();
        assert_eq!(value, b"test_value");

        let targets = ring.preference_list("test_key", cluster.config.replication_factor);
        for target in &targets {
            assert!(
                cluster.hints.get(target, "test_key").is_none(),
                "drained hints must leave no row behind"
            );
        }
    }

    #[tokio::test]
    async fn test_partial_failures_follow_the_preference_list() {
        let (cluster, ring) = cluster_with(FailMode::Partial);
        let failing: HashSet<NodeId> = ["node1", "node2", "node4", "node5"]
            .iter()
            .map(|name| node(name))
            .collect();

        let targets = ring.preference_list("key_partial", cluster.config.replication_factor);
        let healthy = targets.iter().filter(|n| !failing.contains(n)).count();

        let result = cluster
            .coordinator
            .put(&ring, "key_partial", b"value_partial", None)
            .await;

        if healthy >= cluster.config.write_quorum {
            result.expect("enough healthy replicas for the quorum");
            let value = cluster.coordinator.get(&ring, "key_partial").await.unwrap();
            assert_eq!(value, b"value_partial");
        } else {
            assert!(result.is_err(), "quorum cannot be met with {} healthy", healthy);
        }
    }

    #[tokio::test]
    async fn test_quorum_met_with_one_failure_leaves_no_hints() {
        let (coordinator, hints, ring) =
            partitioned_setup(&["alpha", "beta", "gamma"], &["gamma"]);

        coordinator
            .put(&ring, "k", b"v", None)
            .await
            .expect("two of three acks meet the quorum");
        assert!(hints.is_empty(), "a met quorum parks nothing");
    }

    #[tokio::test]
    async fn test_quorum_missed_hints_exactly_the_failed_replicas() {
        let (coordinator, hints, ring) =
            partitioned_setup(&["alpha", "beta", "gamma"], &["beta", "gamma"]);

        let result = coordinator.put(&ring, "k", b"v", None).await;
        assert_eq!(
            result,
            Err(PutError::QuorumNotReached { needed: 2, got: 1 })
        );

        assert_eq!(hints.len(), 2);
        for name in ["beta", "gamma"] {
            let hint = hints.get(&node(name), "k").expect("failed replica should be hinted");
            assert_eq!(hint.value, b"v");
        }
        assert!(hints.get(&node("alpha"), "k").is_none(), "acked replica must not be hinted");
    }

    #[tokio::test]
    async fn test_empty_ring_misses_quorum_without_hints() {
        let (coordinator, hints, _) = partitioned_setup(&["alpha"], &[]);
        let empty = Ring::build(&[], 10);

        let result = coordinator.put(&empty, "k", b"v", None).await;
        assert_eq!(
            result,
            Err(PutError::QuorumNotReached { needed: 2, got: 0 })
        );
        assert!(hints.is_empty());
        assert_eq!(coordinator.get(&empty, "k").await, Err(GetError::NoResponses));
    }

    // ============================================================
    // RECONCILIATION
    // ============================================================

    /// Write one record straight onto a single replica, bypassing quorum.
    async fn seed_replica(
        cluster: &Cluster,
        target: &NodeId,
        key: &str,
        value: &[u8],
        clock: VectorClock,
        timestamp_ms: u64,
    ) {
        cluster
            .client
            .put(target, key, Versioned::new(value.to_vec(), clock, timestamp_ms))
            .await
            .expect("direct replica write");
    }

    #[tokio::test]
    async fn test_single_answer_is_returned_verbatim() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);
        let targets = ring.preference_list("solo", 3);

        seed_replica(
            &cluster,
            &targets[0],
            "solo",
            b"only_copy",
            VectorClock::new().update(&targets[0]),
            now_ms(),
        )
        .await;

        let value = cluster.coordinator.get(&ring, "solo").await.unwrap();
        assert_eq!(value, b"only_copy");
    }

    #[tokio::test]
    async fn test_causal_winner_beats_newer_timestamp() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);
        let targets = ring.preference_list("causal", 3);
        let base = VectorClock::new().update(&targets[0]);
        let later = base.update(&targets[0]);

        // The causally-later version carries the OLDER wall clock; causal
        // order must win regardless.
        seed_replica(&cluster, &targets[0], "causal", b"newer", later, 100).await;
        seed_replica(&cluster, &targets[1], "causal", b"older", base, 900).await;

        let value = cluster.coordinator.get(&ring, "causal").await.unwrap();
        assert_eq!(value, b"newer");
    }

    #[tokio::test]
    async fn test_concurrent_versions_fall_back_to_last_writer_wins() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);
        let targets = ring.preference_list("conc", 3);

        seed_replica(
            &cluster,
            &targets[0],
            "conc",
            b"first",
            VectorClock::new().update(&targets[0]),
            1_000,
        )
        .await;
        seed_replica(
            &cluster,
            &targets[1],
            "conc",
            b"second",
            VectorClock::new().update(&targets[1]),
            2_000,
        )
        .await;

        let value = cluster.coordinator.get(&ring, "conc").await.unwrap();
        assert_eq!(value, b"second", "the larger timestamp breaks the tie");

        // The detached repair write converges every replica on the winner
        // under the merged clock.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let merged = VectorClock::new()
            .update(&targets[0])
            .merge(&VectorClock::new().update(&targets[1]));
        for target in &targets {
            let record = cluster
                .client
                .get(target, "conc")
                .await
                .unwrap()
                .expect("repair should have reached every replica");
            assert_eq!(record.value, b"second");
            assert_eq!(record.clock, merged);
        }
    }

    #[tokio::test]
    async fn test_two_blind_writes_settle_deterministically() {
        let (cluster, ring) = cluster_with(FailMode::AlwaysSucceed);

        cluster
            .coordinator
            .put(&ring, "user2", b"Bob", None)
            .await
            .unwrap();
        cluster
            .coordinator
            .put(&ring, "user2", b"Charlie", None)
            .await
            .unwrap();

        let first = cluster.coordinator.get(&ring, "user2").await.unwrap();
        assert!(
            first == b"Bob".to_vec() || first == b"Charlie".to_vec(),
            "read must surface one of the written values"
        );

        let synchronizer = crate::sync::synchronizer::Synchronizer::new(
            cluster.client.clone(),
            ring.clone(),
            cluster.config.clone(),
        );
        synchronizer.sync().await;

        let second = cluster.coordinator.get(&ring, "user2").await.unwrap();
        assert_eq!(first, second, "a repaired read must be stable");
    }
}
