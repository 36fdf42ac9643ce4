//! Coordinator Module
//!
//! The request path of the store. A coordinator resolves a key's preference
//! list from the ring, fans the operation out to every replica in parallel
//! under a hard deadline, and applies the quorum policy: writes succeed on
//! enough acknowledgments, reads succeed on any answer. Divergent read
//! responses are reconciled causally, with last-writer-wins as the tie-break
//! for truly concurrent versions.

pub mod service;

#[cfg(test)]
mod tests;
