//! Membership & Liveness Module
//!
//! Implements a gossip-based membership layer. Each node runs its own gossip
//! task that owns that node's view of the cluster and spreads it epidemically
//! to random peers.
//!
//! ## Core Mechanisms
//! - **Gossip rounds**: every interval a node refreshes its own record,
//!   pushes its view to one random peer, and merges whatever arrived during a
//!   bounded receive window.
//! - **Failure detection**: a peer silent past the failure threshold is
//!   marked failed. A fresher record arriving later flips it back to alive.
//! - **Recovery hook**: a failed-to-alive transition observed in a round
//!   triggers replay of hinted writes, so a returning node catches up on what
//!   it missed.

pub mod service;
pub mod types;
