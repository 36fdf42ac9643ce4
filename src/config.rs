//! Cluster configuration: replication and quorum sizing, task cadences, and
//! the failure-injection switch. Defaults match the deployment the tests
//! assume; the environment can override the common knobs the same way the
//! node binary is tuned in scripts.

use crate::storage::replica::FailMode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Replicas per key (the preference-list length).
    pub replication_factor: usize,
    /// Acknowledgments required before a write is reported successful.
    pub write_quorum: usize,
    /// Virtual nodes per physical node on the ring.
    pub tokens_per_node: usize,
    /// Deadline for a single replica dispatch on the request path.
    pub dispatch_timeout: Duration,
    /// Cadence of the anti-entropy pass.
    pub sync_interval: Duration,
    /// Deadline for fetching one replica's Merkle tree.
    pub merkle_timeout: Duration,
    /// Cadence of a gossip round.
    pub gossip_interval: Duration,
    /// How long each gossip round accepts incoming messages.
    pub gossip_receive_window: Duration,
    /// Silence span after which a peer is marked failed.
    pub failure_threshold: Duration,
    /// Write-failure injection applied by the local replica client.
    pub fail_mode: FailMode,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            write_quorum: 2,
            tokens_per_node: 10,
            dispatch_timeout: Duration::from_secs(5),
            sync_interval: Duration::from_secs(60),
            merkle_timeout: Duration::from_secs(5),
            gossip_interval: Duration::from_secs(1),
            gossip_receive_window: Duration::from_millis(100),
            failure_threshold: Duration::from_secs(3),
            fail_mode: FailMode::AlwaysSucceed,
        }
    }
}

impl ClusterConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_usize("REPLICATION_FACTOR") {
            config.replication_factor = value;
        }
        if let Some(value) = env_usize("WRITE_QUORUM") {
            config.write_quorum = value;
        }
        if let Some(value) = env_usize("TOKENS_PER_NODE") {
            config.tokens_per_node = value;
        }
        if let Some(value) = env_millis("SYNC_INTERVAL_MS") {
            config.sync_interval = value;
        }
        if let Some(value) = env_millis("GOSSIP_INTERVAL_MS") {
            config.gossip_interval = value;
        }
        if let Some(value) = env_millis("FAILURE_THRESHOLD_MS") {
            config.failure_threshold = value;
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
}
