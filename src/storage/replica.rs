//! Replica Store
//!
//! Each replica is a single-writer actor owning its key-value map and the
//! Merkle tree derived from it. All access is serialized through the actor's
//! mailbox, so there is no shared mutable state and writes apply strictly in
//! arrival order. The tree is rebuilt to reflect a write before the write is
//! acknowledged, keeping `merkle == build(entries)` as an invariant observable
//! from outside.

use super::merkle::MerkleTree;
use super::protocol::{ReplicaClient, ReplicaError, Versioned};
use crate::membership::types::NodeId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

const MAILBOX_CAPACITY: usize = 64;
/// How long a handle waits for the actor's reply before giving up.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

enum ReplicaRequest {
    Get {
        key: String,
        reply: oneshot::Sender<Option<Versioned>>,
    },
    Put {
        key: String,
        record: Versioned,
        reply: oneshot::Sender<()>,
    },
    GetAll {
        reply: oneshot::Sender<BTreeMap<String, Versioned>>,
    },
    GetMerkle {
        reply: oneshot::Sender<MerkleTree>,
    },
}

/// The actor task. Constructed and detached via [`ReplicaStore::spawn`]; the
/// returned handle is the only way to reach it.
pub struct ReplicaStore {
    node: NodeId,
    entries: BTreeMap<String, Versioned>,
    merkle: MerkleTree,
    mailbox: mpsc::Receiver<ReplicaRequest>,
}

impl ReplicaStore {
    pub fn spawn(node: NodeId) -> ReplicaHandle {
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let store = ReplicaStore {
            node: node.clone(),
            entries: BTreeMap::new(),
            merkle: MerkleTree::empty(),
            mailbox,
        };
        tokio::spawn(store.run());
        ReplicaHandle { node, sender }
    }

    async fn run(mut self) {
        while let Some(request) = self.mailbox.recv().await {
            self.handle(request);
        }
        tracing::debug!("replica {} mailbox closed, stopping", self.node);
    }

    fn handle(&mut self, request: ReplicaRequest) {
        match request {
            ReplicaRequest::Get { key, reply } => {
                let _ = reply.send(self.entries.get(&key).cloned());
            }
            ReplicaRequest::Put { key, record, reply } => {
                self.entries.insert(key, record);
                // The tree must reflect the write before it is acknowledged.
                self.merkle =
                    MerkleTree::build(self.entries.iter().map(|(key, record)| (key, &record.value)));
                let _ = reply.send(());
            }
            ReplicaRequest::GetAll { reply } => {
                let _ = reply.send(self.entries.clone());
            }
            ReplicaRequest::GetMerkle { reply } => {
                let _ = reply.send(self.merkle.clone());
            }
        }
    }
}

/// Cheap-to-clone handle to one replica actor's mailbox.
#[derive(Clone)]
pub struct ReplicaHandle {
    node: NodeId,
    sender: mpsc::Sender<ReplicaRequest>,
}

impl ReplicaHandle {
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub async fn get(&self, key: &str) -> Result<Option<Versioned>, ReplicaError> {
        let (reply, response) = oneshot::channel();
        self.send(ReplicaRequest::Get {
            key: key.to_string(),
            reply,
        })
        .await?;
        self.await_reply(response).await
    }

    pub async fn put(&self, key: &str, record: Versioned) -> Result<(), ReplicaError> {
        let (reply, response) = oneshot::channel();
        self.send(ReplicaRequest::Put {
            key: key.to_string(),
            record,
            reply,
        })
        .await?;
        self.await_reply(response).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, Versioned>, ReplicaError> {
        let (reply, response) = oneshot::channel();
        self.send(ReplicaRequest::GetAll { reply }).await?;
        self.await_reply(response).await
    }

    pub async fn get_merkle(&self) -> Result<MerkleTree, ReplicaError> {
        let (reply, response) = oneshot::channel();
        self.send(ReplicaRequest::GetMerkle { reply }).await?;
        self.await_reply(response).await
    }

    async fn send(&self, request: ReplicaRequest) -> Result<(), ReplicaError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| ReplicaError::Unreachable(self.node.clone()))
    }

    /// Race the actor's reply against the request deadline. A dropped reply
    /// channel means the actor is gone; an expired deadline means it is
    /// stalled, which the caller sees as a timeout.
    async fn await_reply<T>(&self, response: oneshot::Receiver<T>) -> Result<T, ReplicaError> {
        match tokio::time::timeout(REQUEST_TIMEOUT, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ReplicaError::Unreachable(self.node.clone())),
            Err(_) => Err(ReplicaError::Timeout(self.node.clone())),
        }
    }
}

/// Lookup table from node id to replica handle. The explicit registry keeps
/// dispatch free of any name-based reflection.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<NodeId, ReplicaHandle>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ReplicaHandle) {
        self.replicas.insert(handle.node().clone(), handle);
    }

    pub fn handle(&self, node: &NodeId) -> Option<ReplicaHandle> {
        self.replicas.get(node).map(|entry| entry.value().clone())
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .replicas
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        nodes.sort();
        nodes
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

/// Failure-injection switch consulted when a write reaches a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    #[default]
    AlwaysSucceed,
    AlwaysFail,
    /// Fail writes on a fixed subset of nodes, leaving the rest healthy.
    Partial,
}

/// Node names rejected by [`FailMode::Partial`].
const PARTIAL_FAILING_NODES: &[&str] = &["node1", "node2", "node4", "node5"];

/// In-process [`ReplicaClient`] over the registry, carrying the injection
/// switch so failure scenarios can be exercised without the coordinator
/// knowing anything about them.
pub struct LocalReplicaClient {
    registry: Arc<ReplicaRegistry>,
    fail_mode: RwLock<FailMode>,
}

impl LocalReplicaClient {
    pub fn new(registry: Arc<ReplicaRegistry>, fail_mode: FailMode) -> Self {
        Self {
            registry,
            fail_mode: RwLock::new(fail_mode),
        }
    }

    pub async fn fail_mode(&self) -> FailMode {
        *self.fail_mode.read().await
    }

    pub async fn set_fail_mode(&self, mode: FailMode) {
        *self.fail_mode.write().await = mode;
    }

    async fn rejects_put(&self, node: &NodeId) -> bool {
        match self.fail_mode().await {
            FailMode::AlwaysSucceed => false,
            FailMode::AlwaysFail => true,
            FailMode::Partial => PARTIAL_FAILING_NODES.iter().any(|name| node.0 == *name),
        }
    }

    fn lookup(&self, node: &NodeId) -> Result<ReplicaHandle, ReplicaError> {
        self.registry
            .handle(node)
            .ok_or_else(|| ReplicaError::Unknown(node.clone()))
    }
}

#[async_trait]
impl ReplicaClient for LocalReplicaClient {
    async fn get(&self, node: &NodeId, key: &str) -> Result<Option<Versioned>, ReplicaError> {
        self.lookup(node)?.get(key).await
    }

    async fn put(&self, node: &NodeId, key: &str, record: Versioned) -> Result<(), ReplicaError> {
        if self.rejects_put(node).await {
            return Err(ReplicaError::PutFailed(node.clone()));
        }
        self.lookup(node)?.put(key, record).await
    }

    async fn get_all(&self, node: &NodeId) -> Result<BTreeMap<String, Versioned>, ReplicaError> {
        self.lookup(node)?.get_all().await
    }

    async fn get_merkle(&self, node: &NodeId) -> Result<MerkleTree, ReplicaError> {
        self.lookup(node)?.get_merkle().await
    }
}
