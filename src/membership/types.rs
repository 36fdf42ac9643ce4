use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Unique identifier for a node in the cluster.
/// Wrapper around the stable name the operator assigned to the replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Health of a peer from the perspective of the local failure detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    /// The node has been heard from within the failure threshold.
    Alive,
    /// The node has been silent past the failure threshold. It transitions
    /// back to `Alive` as soon as a fresher record arrives via gossip.
    Failed,
}

/// One row of a membership view.
///
/// `last_heard` is a wall-clock millisecond timestamp. View merges keep the
/// row with the larger value, which makes the merge commutative, associative,
/// and idempotent under message reordering and duplication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRecord {
    pub status: MemberStatus,
    pub last_heard: u64,
}

impl MemberRecord {
    /// A freshly-heard alive record.
    pub fn alive(now: u64) -> Self {
        Self {
            status: MemberStatus::Alive,
            last_heard: now,
        }
    }
}

/// The full per-node picture of cluster liveness.
pub type MembershipView = HashMap<NodeId, MemberRecord>;

/// Messages accepted by a gossip task's mailbox.
#[derive(Debug)]
pub enum GossipMessage {
    /// A peer's current view, to be merged into ours.
    View(MembershipView),
    /// Request/reply access to the current view for callers outside the task.
    GetView(oneshot::Sender<MembershipView>),
}
