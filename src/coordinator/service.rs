use crate::config::ClusterConfig;
use crate::handoff::store::HintTable;
use crate::membership::types::NodeId;
use crate::storage::protocol::{now_ms, ReplicaClient, Versioned};
use crate::storage::ring::Ring;
use crate::storage::version::VectorClock;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PutError {
    #[error("write quorum not reached: needed {needed}, got {got}")]
    QuorumNotReached { needed: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetError {
    #[error("no replica answered for the key")]
    NoResponses,
}

/// Executes client reads and writes against a replica set.
///
/// Generic over `C: ReplicaClient` so the same request path runs against the
/// in-process replicas here or a remote transport in deployment. The
/// coordinator owns no data; it fans out, counts acknowledgments, reconciles
/// versions, and parks undeliverable writes as hints.
pub struct Coordinator<C: ReplicaClient> {
    replicas: Arc<C>,
    hints: Arc<HintTable>,
    config: ClusterConfig,
    /// Detached read-repair tasks. Dropping the coordinator aborts them.
    repairs: Mutex<JoinSet<()>>,
}

impl<C: ReplicaClient> Coordinator<C> {
    pub fn new(replicas: Arc<C>, hints: Arc<HintTable>, config: ClusterConfig) -> Self {
        Self {
            replicas,
            hints,
            config,
            repairs: Mutex::new(JoinSet::new()),
        }
    }

    /// Write `value` under `key` to the key's preference list, reporting
    /// success once the write quorum has acknowledged.
    ///
    /// Without a caller-supplied clock, each replica's current clock is read
    /// and bumped for that replica; a caller that read first passes the
    /// clock it saw to extend that causal chain. On a quorum miss every
    /// failed or silent replica gets a hint and the write reports an error.
    pub async fn put(
        &self,
        ring: &Ring,
        key: &str,
        value: &[u8],
        clock: Option<VectorClock>,
    ) -> Result<(), PutError> {
        execute_put(
            self.replicas.clone(),
            self.hints.clone(),
            &self.config,
            ring,
            key,
            value,
            clock,
        )
        .await
    }

    /// Read `key` from the preference list, reconciling divergent versions.
    ///
    /// Replies that error or report the key absent are dropped. A single
    /// surviving response is returned as-is; several are reconciled causally,
    /// falling back to last-writer-wins plus an asynchronous repair write
    /// when they are mutually concurrent.
    pub async fn get(&self, ring: &Ring, key: &str) -> Result<Vec<u8>, GetError> {
        let targets = ring.preference_list(key, self.config.replication_factor);
        let deadline = tokio::time::Instant::now() + self.config.dispatch_timeout;

        let mut fetches = FuturesUnordered::new();
        for node in &targets {
            let replicas = self.replicas.clone();
            let node = node.clone();
            let key = key.to_string();
            fetches.push(tokio::spawn(async move { replicas.get(&node, &key).await }));
        }

        let mut responses: Vec<Versioned> = Vec::new();
        while let Some(joined) = tokio::time::timeout_at(deadline, fetches.next())
            .await
            .ok()
            .flatten()
        {
            if let Ok(Ok(Some(record))) = joined {
                responses.push(record);
            }
        }

        match responses.len() {
            0 => Err(GetError::NoResponses),
            1 => Ok(responses.swap_remove(0).value),
            _ => Ok(self.reconcile(ring, key, responses).await),
        }
    }

    /// Pick the causal winner if one response dominates every other;
    /// otherwise the versions are mutually concurrent and the newest
    /// timestamp wins, with a detached write healing the replicas under the
    /// merged clock.
    async fn reconcile(&self, ring: &Ring, key: &str, responses: Vec<Versioned>) -> Vec<u8> {
        if let Some(winner) = responses
            .iter()
            .find(|candidate| responses.iter().all(|other| candidate.clock.dominates(&other.clock)))
        {
            return winner.value.clone();
        }

        let winner = responses
            .iter()
            .skip(1)
            .fold(&responses[0], |best, candidate| {
                if candidate.timestamp_ms > best.timestamp_ms {
                    candidate
                } else {
                    best
                }
            });
        let merged = responses
            .iter()
            .fold(VectorClock::new(), |acc, response| acc.merge(&response.clock));

        tracing::debug!(
            "concurrent versions for key {}, healing via last-writer-wins",
            key
        );

        let replicas = self.replicas.clone();
        let hints = self.hints.clone();
        let config = self.config.clone();
        let ring = ring.clone();
        let key = key.to_string();
        let value = winner.value.clone();

        let mut repairs = self.repairs.lock().await;
        while repairs.try_join_next().is_some() {}
        repairs.spawn(async move {
            if let Err(error) =
                execute_put(replicas, hints, &config, &ring, &key, &value, Some(merged)).await
            {
                tracing::debug!("read repair for key {} fell short of quorum: {}", key, error);
            }
        });

        winner.value.clone()
    }
}

/// The shared write path behind `put` and detached read-repair tasks.
async fn execute_put<C: ReplicaClient>(
    replicas: Arc<C>,
    hints: Arc<HintTable>,
    config: &ClusterConfig,
    ring: &Ring,
    key: &str,
    value: &[u8],
    clock: Option<VectorClock>,
) -> Result<(), PutError> {
    let targets = ring.preference_list(key, config.replication_factor);
    let timestamp = now_ms();
    let deadline = tokio::time::Instant::now() + config.dispatch_timeout;

    let mut writes = FuturesUnordered::new();
    for node in &targets {
        let replicas = replicas.clone();
        let node = node.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let clock = clock.clone();
        writes.push(tokio::spawn(async move {
            let clock_used = match clock {
                Some(clock) => clock,
                // No caller context: bump this replica's current clock.
                None => {
                    let existing = replicas
                        .get(&node, &key)
                        .await
                        .ok()
                        .flatten()
                        .map(|record| record.clock)
                        .unwrap_or_default();
                    existing.update(&node)
                }
            };
            let outcome = replicas
                .put(&node, &key, Versioned::new(value, clock_used.clone(), timestamp))
                .await;
            (node, clock_used, outcome)
        }));
    }

    let mut acks = 0usize;
    let mut answered: HashSet<NodeId> = HashSet::new();
    let mut failed: Vec<(NodeId, VectorClock)> = Vec::new();

    while let Some(joined) = tokio::time::timeout_at(deadline, writes.next())
        .await
        .ok()
        .flatten()
    {
        if let Ok((node, clock_used, outcome)) = joined {
            answered.insert(node.clone());
            match outcome {
                Ok(()) => acks += 1,
                Err(error) => {
                    tracing::debug!("write of key {} to {} failed: {}", key, node, error);
                    failed.push((node, clock_used));
                }
            }
        }
    }

    if acks >= config.write_quorum {
        return Ok(());
    }

    // Quorum miss: park a hint for every replica that failed or never
    // answered before the deadline.
    for node in &targets {
        if !answered.contains(node) {
            let clock_used = match &clock {
                Some(clock) => clock.clone(),
                None => VectorClock::new().update(node),
            };
            failed.push((node.clone(), clock_used));
        }
    }
    for (node, clock_used) in failed {
        hints.store(node, key.to_string(), value.to_vec(), clock_used);
    }

    Err(PutError::QuorumNotReached {
        needed: config.write_quorum,
        got: acks,
    })
}
