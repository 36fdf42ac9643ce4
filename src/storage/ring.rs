//! Consistent-Hashing Ring
//!
//! Responsible for mapping keys to the ordered set of replicas that own them.
//!
//! ## Mechanism
//! - **Hashing**: SHA-1 digests are folded big-endian into a 32-bit ring
//!   position so that every node derives the identical placement
//!   independently (the digest, not the platform hasher, is the contract).
//! - **Virtual nodes**: each physical node contributes `tokens_per_node`
//!   points on the ring, which smooths the key distribution.
//! - **Placement**: a key belongs to the first token at or past its hash;
//!   replicas are collected by walking clockwise until enough distinct nodes
//!   are found, wrapping past the largest token.

use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Ring positions live in `[0, RING_MODULUS)`.
pub const RING_MODULUS: u64 = u32::MAX as u64;

/// A single point on the ring, owned by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub hash: u32,
    pub node: NodeId,
}

/// Immutable partition map. Topology changes build a new ring; in-flight
/// requests keep operating on the value they were handed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    tokens: Vec<Token>,
}

impl Ring {
    /// Place `tokens_per_node` tokens per node, sorted ascending by hash.
    pub fn build(nodes: &[NodeId], tokens_per_node: usize) -> Ring {
        let mut tokens = Vec::with_capacity(nodes.len() * tokens_per_node);
        for node in nodes {
            for index in 0..tokens_per_node {
                let hash = ring_hash(format!("{}-{}", node.0, index).as_bytes());
                tokens.push(Token {
                    hash,
                    node: node.clone(),
                });
            }
        }
        tokens.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.node.cmp(&b.node)));
        Ring { tokens }
    }

    /// The ordered list of up to `replicas` distinct nodes owning `key`.
    pub fn preference_list(&self, key: &str, replicas: usize) -> Vec<NodeId> {
        self.preference_list_at(ring_hash(key.as_bytes()), replicas)
    }

    /// Preference list walked from a raw ring position instead of a key.
    /// Used by anti-entropy to find the peers of a node's own tokens.
    pub fn preference_list_at(&self, position: u32, replicas: usize) -> Vec<NodeId> {
        if self.tokens.is_empty() || replicas == 0 {
            return Vec::new();
        }

        // First token with hash >= position, wrapping to the start of the
        // ring when the position lies past the last token.
        let start = self.tokens.partition_point(|token| token.hash < position) % self.tokens.len();

        let mut owners: Vec<NodeId> = Vec::with_capacity(replicas);
        for offset in 0..self.tokens.len() {
            let token = &self.tokens[(start + offset) % self.tokens.len()];
            if !owners.contains(&token.node) {
                owners.push(token.node.clone());
                if owners.len() == replicas {
                    break;
                }
            }
        }
        owners
    }

    /// The token hashes owned by `node`.
    pub fn owned_token_hashes(&self, node: &NodeId) -> Vec<u32> {
        self.tokens
            .iter()
            .filter(|token| token.node == *node)
            .map(|token| token.hash)
            .collect()
    }

    /// The distinct nodes present on the ring, in id order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.tokens.iter().map(|token| token.node.clone()).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// SHA-1 digest folded into the 32-bit ring space with a big-endian
/// accumulator: `acc = (acc * 256 + byte) mod RING_MODULUS`.
pub fn ring_hash(data: &[u8]) -> u32 {
    let digest = Sha1::digest(data);
    let folded = digest
        .iter()
        .fold(0u64, |acc, &byte| (acc * 256 + u64::from(byte)) % RING_MODULUS);
    folded as u32
}
