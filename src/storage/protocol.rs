//! Replica Boundary Contract
//!
//! Defines the versioned record shape, the error space of replica
//! operations, and the `ReplicaClient` capability through which the
//! coordinator and the synchronizer reach replicas. The capability is a
//! trait so that the request path never knows whether it is talking to an
//! in-process actor or a remote transport.

use super::merkle::MerkleTree;
use super::version::VectorClock;
use crate::membership::types::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// The stored shape of a value: payload bytes, the causal clock, and the
/// coordinator timestamp of the write that produced it. The timestamp is a
/// tie-breaker for mutually concurrent versions, never a safety guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub clock: VectorClock,
    pub timestamp_ms: u64,
}

impl Versioned {
    pub fn new(value: Vec<u8>, clock: VectorClock, timestamp_ms: u64) -> Self {
        Self {
            value,
            clock,
            timestamp_ms,
        }
    }
}

/// Everything that can go wrong at the replica boundary. Closed so the
/// coordinator can reason exhaustively about failure handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    #[error("node {0} has no registered replica")]
    Unknown(NodeId),
    #[error("replica {0} dropped the request")]
    Unreachable(NodeId),
    #[error("replica {0} did not answer before the deadline")]
    Timeout(NodeId),
    #[error("replica {0} rejected the write")]
    PutFailed(NodeId),
}

/// Capability interface over a replica set.
///
/// `get` distinguishes "key absent" (`Ok(None)`) from transport failure; the
/// coordinator filters both differently. `put` is unconditional at the
/// replica level: version reconciliation is the coordinator's job.
#[async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    async fn get(&self, node: &NodeId, key: &str) -> Result<Option<Versioned>, ReplicaError>;

    async fn put(&self, node: &NodeId, key: &str, record: Versioned) -> Result<(), ReplicaError>;

    async fn get_all(&self, node: &NodeId) -> Result<BTreeMap<String, Versioned>, ReplicaError>;

    async fn get_merkle(&self, node: &NodeId) -> Result<MerkleTree, ReplicaError>;
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
