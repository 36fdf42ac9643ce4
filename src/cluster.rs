//! Cluster bootstrap: starts one replica actor and one gossip task per node
//! and wires them to a shared hint table and coordinator. The supervisor (or
//! a test) builds the ring separately and hands it to each request, so
//! topology changes are just a new ring value.

use crate::config::ClusterConfig;
use crate::coordinator::service::Coordinator;
use crate::handoff::store::HintTable;
use crate::membership::service::{GossipRegistry, GossipService};
use crate::membership::types::{MemberRecord, MembershipView, NodeId};
use crate::storage::protocol::now_ms;
use crate::storage::replica::{LocalReplicaClient, ReplicaRegistry, ReplicaStore};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running in-process cluster: replica actors, gossip tasks, hint table,
/// and the coordinator serving requests against them.
pub struct Cluster {
    pub config: ClusterConfig,
    pub replicas: Arc<ReplicaRegistry>,
    pub client: Arc<LocalReplicaClient>,
    pub hints: Arc<HintTable>,
    pub gossip: Arc<GossipRegistry>,
    pub coordinator: Coordinator<LocalReplicaClient>,
    gossip_tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Start one replica store and one gossip task per node. Every gossip
    /// view is seeded with all nodes alive as of now.
    pub fn initialize(nodes: Vec<NodeId>, config: ClusterConfig) -> Cluster {
        let replicas = Arc::new(ReplicaRegistry::new());
        for node in &nodes {
            replicas.register(ReplicaStore::spawn(node.clone()));
        }

        let client = Arc::new(LocalReplicaClient::new(replicas.clone(), config.fail_mode));
        let hints = Arc::new(HintTable::new());
        let gossip = Arc::new(GossipRegistry::new());

        let seed: MembershipView = nodes
            .iter()
            .map(|node| (node.clone(), MemberRecord::alive(now_ms())))
            .collect();

        let gossip_tasks = nodes
            .iter()
            .map(|node| {
                GossipService::spawn(
                    node.clone(),
                    seed.clone(),
                    gossip.clone(),
                    hints.clone(),
                    client.clone(),
                    config.clone(),
                )
            })
            .collect();

        let coordinator = Coordinator::new(client.clone(), hints.clone(), config.clone());

        tracing::info!("cluster initialized with {} node(s)", nodes.len());

        Cluster {
            config,
            replicas,
            client,
            hints,
            gossip,
            coordinator,
            gossip_tasks,
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.replicas.nodes()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for task in &self.gossip_tasks {
            task.abort();
        }
    }
}
