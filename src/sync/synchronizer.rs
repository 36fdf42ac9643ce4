use crate::config::ClusterConfig;
use crate::membership::types::NodeId;
use crate::storage::protocol::ReplicaClient;
use crate::storage::ring::Ring;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Background anti-entropy: periodically walks the ring and reconciles each
/// node with the replicas that share key ranges with it, using Merkle diffs
/// to touch only divergent keys.
///
/// Repair copies the source's `(value, clock, timestamp)` triple verbatim and
/// the replica-level put is unconditional, so a pass can move a replica
/// sideways in causal terms; the coordinator's read path resolves whatever
/// divergence that leaves behind. A key equal on both sides produces no diff
/// and no write, which makes the pass idempotent.
pub struct Synchronizer<C: ReplicaClient> {
    replicas: Arc<C>,
    ring: Ring,
    config: ClusterConfig,
}

impl<C: ReplicaClient> Synchronizer<C> {
    pub fn new(replicas: Arc<C>, ring: Ring, config: ClusterConfig) -> Arc<Self> {
        Arc::new(Self {
            replicas,
            ring,
            config,
        })
    }

    /// Detach the periodic loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "anti-entropy loop started (every {:?})",
                self.config.sync_interval
            );
            let mut ticker = tokio::time::interval(self.config.sync_interval);
            loop {
                ticker.tick().await;
                self.sync().await;
            }
        })
    }

    /// One full pass over every node in the ring. Also the manual entry
    /// point for operational tooling and tests.
    pub async fn sync(&self) {
        for node in self.ring.nodes() {
            self.synchronize_node(&node).await;
        }
    }

    /// Reconcile `node` with every replica sharing a key range with it.
    pub async fn synchronize_node(&self, node: &NodeId) {
        for partner in self.partners(node) {
            self.reconcile_pair(node, &partner).await;
        }
    }

    /// Distinct nodes other than `node` appearing in the preference lists
    /// walked from each token `node` owns.
    fn partners(&self, node: &NodeId) -> Vec<NodeId> {
        let mut partners = Vec::new();
        for hash in self.ring.owned_token_hashes(node) {
            for candidate in self
                .ring
                .preference_list_at(hash, self.config.replication_factor)
            {
                if candidate != *node && !partners.contains(&candidate) {
                    partners.push(candidate);
                }
            }
        }
        partners
    }

    async fn reconcile_pair(&self, source: &NodeId, target: &NodeId) {
        // Both fetches run under one shared deadline, so a stalled partner
        // costs the pair at most `merkle_timeout`.
        let (source_tree, target_tree) = tokio::join!(
            tokio::time::timeout(self.config.merkle_timeout, self.replicas.get_merkle(source)),
            tokio::time::timeout(self.config.merkle_timeout, self.replicas.get_merkle(target)),
        );

        match (source_tree, target_tree) {
            (Ok(Ok(source_tree)), Ok(Ok(target_tree))) => {
                let divergent = source_tree.diff(&target_tree);
                if divergent.is_empty() {
                    return;
                }
                tracing::debug!(
                    "{} -> {}: repairing {} divergent key(s)",
                    source,
                    target,
                    divergent.len()
                );
                for (key, _) in divergent {
                    match self.replicas.get(source, &key).await {
                        Ok(Some(record)) => {
                            if let Err(error) = self.replicas.put(target, &key, record).await {
                                tracing::warn!(
                                    "repair of key {} on {} failed: {}",
                                    key,
                                    target,
                                    error
                                );
                            }
                        }
                        // Key only present on the target; nothing to copy.
                        Ok(None) => {}
                        Err(error) => {
                            tracing::warn!("cannot read key {} from {}: {}", key, source, error);
                        }
                    }
                }
            }
            _ => self.full_sync(source, target).await,
        }
    }

    /// Fallback when a Merkle tree cannot be fetched in time: stream the
    /// whole source map into the target.
    async fn full_sync(&self, source: &NodeId, target: &NodeId) {
        tracing::info!("merkle unavailable, full sync {} -> {}", source, target);
        let entries = match self.replicas.get_all(source).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("full sync aborted, cannot read {}: {}", source, error);
                return;
            }
        };
        for (key, record) in entries {
            if let Err(error) = self.replicas.put(target, &key, record).await {
                tracing::warn!("full sync write of key {} to {} failed: {}", key, target, error);
            }
        }
    }
}
