#![forbid(unsafe_code)]

//! The HTTP-facing side of an L1 ledger replica.
//!
//! [`Repository`] drives the commit pipeline: admission latch in the
//! relational index, blocking consensus broadcast, and rollback or
//! confirmation of the index rows. [`http`] mounts the `/l1/**` routes and
//! applies the uniform response envelope.

pub mod http;
mod metrics;
mod repository;

pub use repository::{CommitOutcome, Repository};
