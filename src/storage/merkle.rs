//! Merkle Index
//!
//! A deterministic hash tree over a key-value map. Two replicas holding the
//! same map produce the same root hash, so a single comparison detects
//! divergence and a recursive diff narrows it down to the affected keys
//! without shipping the whole dataset.
//!
//! Leaves hash a canonical `(key, value)` encoding with SHA-256; inner nodes
//! hash the concatenation of their children's hashes. The platform `Hash`
//! trait is deliberately not used anywhere here, since its output is not
//! stable across architectures or compiler versions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::HashSet;

pub type NodeHash = [u8; 32];

/// A node of the tree: the empty sentinel, a leaf carrying one entry, or an
/// inner node covering the key range of its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerkleNode {
    Empty,
    Leaf {
        hash: NodeHash,
        key: String,
        value: Vec<u8>,
    },
    Inner {
        hash: NodeHash,
        range: (String, String),
        left: Box<MerkleNode>,
        right: Box<MerkleNode>,
    },
}

impl MerkleNode {
    pub fn hash(&self) -> NodeHash {
        match self {
            MerkleNode::Empty => empty_hash(),
            MerkleNode::Leaf { hash, .. } | MerkleNode::Inner { hash, .. } => *hash,
        }
    }

    /// The key range covered by this subtree, `None` for the sentinel.
    fn range(&self) -> Option<(&String, &String)> {
        match self {
            MerkleNode::Empty => None,
            MerkleNode::Leaf { key, .. } => Some((key, key)),
            MerkleNode::Inner { range, .. } => Some((&range.0, &range.1)),
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a String, &'a Vec<u8>, NodeHash)>) {
        match self {
            MerkleNode::Empty => {}
            MerkleNode::Leaf { hash, key, value } => out.push((key, value, *hash)),
            MerkleNode::Inner { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    root: MerkleNode,
}

impl MerkleTree {
    /// The tree of the empty map: a sentinel hashing `"empty"`.
    pub fn empty() -> Self {
        Self {
            root: MerkleNode::Empty,
        }
    }

    /// Build the tree bottom-up from entries ordered ascending by key.
    ///
    /// Leaves are combined pairwise per level; an odd level duplicates its
    /// last node so the combiner always sees a pair.
    pub fn build<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<u8>)>,
    {
        let mut level: Vec<MerkleNode> = entries
            .into_iter()
            .map(|(key, value)| MerkleNode::Leaf {
                hash: leaf_hash(key, value),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        if level.is_empty() {
            return Self::empty();
        }

        while level.len() > 1 {
            if level.len() % 2 == 1 {
                let last = level[level.len() - 1].clone();
                level.push(last);
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                next.push(combine(left, right));
            }
            level = next;
        }

        Self {
            root: level
                .into_iter()
                .next()
                .unwrap_or(MerkleNode::Empty),
        }
    }

    pub fn root_hash(&self) -> NodeHash {
        self.root.hash()
    }

    pub fn root(&self) -> &MerkleNode {
        &self.root
    }

    /// Every `(key, value, leaf hash)` of the tree, in tree order.
    pub fn leaves(&self) -> Vec<(&String, &Vec<u8>, NodeHash)> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// The entries the target (`other`) needs from this tree, plus entries
    /// present only on the target, so the caller learns about every
    /// disagreeing key. Equal trees yield an empty diff.
    pub fn diff(&self, other: &MerkleTree) -> Vec<(String, Vec<u8>)> {
        if self.root_hash() == other.root_hash() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        diff_nodes(&self.root, &other.root, &mut candidates);

        // Structural pairing can surface keys both maps in fact agree on
        // (duplicated odd leaves, subtrees shifted by an insertion). Keep
        // only the keys whose leaf hashes genuinely differ between the maps.
        let source: BTreeMap<&String, NodeHash> = self
            .leaves()
            .into_iter()
            .map(|(key, _, hash)| (key, hash))
            .collect();
        let target: BTreeMap<&String, NodeHash> = other
            .leaves()
            .into_iter()
            .map(|(key, _, hash)| (key, hash))
            .collect();

        let mut seen = HashSet::new();
        candidates.retain(|(key, _)| {
            seen.insert(key.clone()) && source.get(key) != target.get(key)
        });
        candidates
    }
}

fn diff_nodes(source: &MerkleNode, target: &MerkleNode, out: &mut Vec<(String, Vec<u8>)>) {
    if source.hash() == target.hash() {
        return;
    }

    match (source, target) {
        (
            MerkleNode::Leaf {
                key: source_key,
                value: source_value,
                ..
            },
            MerkleNode::Leaf {
                key: target_key,
                value: target_value,
                ..
            },
        ) => {
            out.push((source_key.clone(), source_value.clone()));
            if source_key != target_key {
                out.push((target_key.clone(), target_value.clone()));
            }
        }
        (
            MerkleNode::Inner {
                left: source_left,
                right: source_right,
                ..
            },
            MerkleNode::Inner {
                left: target_left,
                right: target_right,
                ..
            },
        ) => {
            diff_nodes(source_left, target_left, out);
            diff_nodes(source_right, target_right, out);
        }
        // Shapes disagree (a subtree is missing on one side, or one side is
        // the empty sentinel): every leaf under the other side is a
        // candidate difference.
        _ => {
            let mut leaves = Vec::new();
            source.collect_leaves(&mut leaves);
            target.collect_leaves(&mut leaves);
            for (key, value, _) in leaves {
                out.push((key.clone(), value.clone()));
            }
        }
    }
}

fn combine(left: MerkleNode, right: MerkleNode) -> MerkleNode {
    let mut hasher = Sha256::new();
    hasher.update(left.hash());
    hasher.update(right.hash());

    let min_key = left
        .range()
        .or_else(|| right.range())
        .map(|(min, _)| min.clone())
        .unwrap_or_default();
    let max_key = right
        .range()
        .or_else(|| left.range())
        .map(|(_, max)| max.clone())
        .unwrap_or_default();

    MerkleNode::Inner {
        hash: hasher.finalize().into(),
        range: (min_key, max_key),
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// SHA-256 over the canonical binary encoding of `(key, value)`.
pub fn leaf_hash(key: &str, value: &[u8]) -> NodeHash {
    let canonical = bincode::serialize(&(key, value)).unwrap_or_default();
    Sha256::digest(&canonical).into()
}

fn empty_hash() -> NodeHash {
    Sha256::digest(b"empty").into()
}
