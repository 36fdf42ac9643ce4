//! Distributed Storage Module
//!
//! Implements the data plane of the store: versioning, placement, indexing,
//! and the per-node replica actors.
//!
//! ## Core Concepts
//! - **Versioning**: every stored value carries a vector clock and a write
//!   timestamp; causal order decides which version wins.
//! - **Placement**: the consistent-hashing `Ring` maps each key to its
//!   ordered preference list of replica nodes.
//! - **Indexing**: each replica maintains a Merkle tree over its map so that
//!   anti-entropy can locate divergent keys cheaply.
//! - **Access**: replicas are single-writer actors reached through the
//!   `ReplicaClient` capability; nothing shares their state directly.

pub mod merkle;
pub mod protocol;
pub mod replica;
pub mod ring;
pub mod version;
