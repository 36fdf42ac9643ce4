//! Vector Clock Algebra
//!
//! A vector clock maps node identifiers to event counters and establishes
//! causal order between versions of a value. Counters only ever grow: a write
//! bumps the coordinator-chosen replica's counter, and merging two clocks
//! takes the pointwise maximum.

use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relationship between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    /// Identical counters for every node.
    Equal,
    /// The left clock is causally later than the right one.
    Descendant,
    /// The left clock is causally earlier than the right one.
    Ancestor,
    /// Neither dominates the other.
    Concurrent,
}

/// Finite mapping from node id to event counter; absent means zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter recorded for `node`, zero if absent.
    pub fn counter(&self, node: &NodeId) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// A copy of this clock with `node`'s counter incremented by one.
    pub fn update(&self, node: &NodeId) -> VectorClock {
        let mut counters = self.counters.clone();
        *counters.entry(node.clone()).or_insert(0) += 1;
        VectorClock { counters }
    }

    /// Pointwise maximum over the union of both clocks' nodes.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut counters = self.counters.clone();
        for (node, &counter) in &other.counters {
            let entry = counters.entry(node.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
        VectorClock { counters }
    }

    /// Compare over the union of nodes, with missing counters read as zero.
    pub fn compare(&self, other: &VectorClock) -> Causality {
        let mut left_ahead = false;
        let mut right_ahead = false;

        for node in self.counters.keys().chain(other.counters.keys()) {
            let left = self.counter(node);
            let right = other.counter(node);
            if left > right {
                left_ahead = true;
            } else if left < right {
                right_ahead = true;
            }
        }

        match (left_ahead, right_ahead) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Descendant,
            (false, true) => Causality::Ancestor,
            (true, true) => Causality::Concurrent,
        }
    }

    /// Whether this clock is equal to or causally later than `other`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            Causality::Equal | Causality::Descendant
        )
    }
}

impl FromIterator<(NodeId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (NodeId, u64)>>(entries: I) -> Self {
        VectorClock {
            counters: entries.into_iter().collect(),
        }
    }
}
