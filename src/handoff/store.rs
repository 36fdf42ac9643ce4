use crate::membership::types::NodeId;
use crate::storage::protocol::{now_ms, ReplicaClient, Versioned};
use crate::storage::version::VectorClock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A hint is abandoned once it has failed this many replays.
pub const RETRY_LIMIT: u32 = 5;

/// A write that could not be delivered to its target replica, parked until
/// the target is reachable again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub target: NodeId,
    pub key: String,
    pub value: Vec<u8>,
    pub clock: VectorClock,
    pub retry_count: u32,
}

/// Process-wide hint table keyed by `(target, key)`.
///
/// `store` is an upsert: a newer failed write for the same target and key
/// replaces the older hint and resets its retry budget. Rows are replaced
/// atomically, so concurrent inserters and the retry loop never observe a
/// half-updated hint.
#[derive(Default)]
pub struct HintTable {
    rows: DashMap<(NodeId, String), Hint>,
}

impl HintTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, target: NodeId, key: String, value: Vec<u8>, clock: VectorClock) {
        tracing::debug!("parking write for {} (key {})", target, key);
        self.rows.insert(
            (target.clone(), key.clone()),
            Hint {
                target,
                key,
                value,
                clock,
                retry_count: 0,
            },
        );
    }

    pub fn get(&self, target: &NodeId, key: &str) -> Option<Hint> {
        self.rows
            .get(&(target.clone(), key.to_string()))
            .map(|row| row.value().clone())
    }

    pub fn remove(&self, target: &NodeId, key: &str) -> Option<Hint> {
        self.rows
            .remove(&(target.clone(), key.to_string()))
            .map(|(_, hint)| hint)
    }

    /// Hints parked for one target node.
    pub fn hints_for(&self, target: &NodeId) -> Vec<Hint> {
        self.rows
            .iter()
            .filter(|row| row.value().target == *target)
            .map(|row| row.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replay every eligible hint once.
    ///
    /// Works from a snapshot so no table lock is held across replica calls.
    /// A delivered hint is removed only if the row still matches the
    /// snapshot, so an upsert that raced the replay is kept. Failed replays
    /// are re-inserted with an incremented retry count; rows at the limit
    /// stay in the table but are no longer touched.
    pub async fn retry_all<C: ReplicaClient>(&self, replicas: &C) {
        let snapshot: Vec<Hint> = self.rows.iter().map(|row| row.value().clone()).collect();

        for hint in snapshot {
            if hint.retry_count >= RETRY_LIMIT {
                continue;
            }

            let record = Versioned::new(hint.value.clone(), hint.clock.clone(), now_ms());
            let outcome = replicas.put(&hint.target, &hint.key, record).await;
            match outcome {
                Ok(()) => {
                    self.rows
                        .remove_if(&(hint.target.clone(), hint.key.clone()), |_, current| {
                            *current == hint
                        });
                    tracing::info!("hint for {} (key {}) delivered", hint.target, hint.key);
                }
                Err(error) => {
                    let mut updated = hint;
                    updated.retry_count += 1;
                    if updated.retry_count >= RETRY_LIMIT {
                        tracing::warn!(
                            "hint for {} (key {}) abandoned after {} attempts: {}",
                            updated.target,
                            updated.key,
                            updated.retry_count,
                            error
                        );
                    } else {
                        tracing::debug!(
                            "hint for {} (key {}) still undeliverable (attempt {}): {}",
                            updated.target,
                            updated.key,
                            updated.retry_count,
                            error
                        );
                    }
                    self.rows
                        .insert((updated.target.clone(), updated.key.clone()), updated);
                }
            }
        }
    }
}
