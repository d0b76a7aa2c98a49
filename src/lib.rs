//! ambit: a minimal permissioned blockchain whose consensus is
//! Proof-of-Interaction — block producers walk a pseudo-random signature
//! tour across a deterministic subset of peers instead of hashing.
//!
//! The crate is a library: hosts construct a [`consensus::Blockchain`],
//! wire up [`net::LocalTransport`]s and a [`net::NodeRegistry`], and run a
//! [`net::Node`] event loop per participant.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod ledger;
pub mod mempool;
pub mod net;
pub mod random;
pub mod types;
