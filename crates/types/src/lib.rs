//! Core types for the Provena two-tier ledger.
//!
//! The L2 tier owns the mutable workflow entities in [`session`]; the L1 tier
//! owns the immutable commit record in [`commit`]. Both tiers share the shard
//! registry types in [`shard`] and the error taxonomy in [`error`].

pub mod commit;
/// Core error types and the stable wire-code mapping.
pub mod error;
/// Identifier minting for sessions, QC records, labels, and tracking numbers.
pub mod ids;
pub mod session;
pub mod shard;
