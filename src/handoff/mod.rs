//! Hinted Handoff Module
//!
//! When a write cannot reach one of its replicas, the coordinator parks it
//! here as a hint. Hints are replayed with a bounded retry budget, either by
//! operational tooling or automatically when gossip observes the target node
//! coming back to life.

pub mod store;
