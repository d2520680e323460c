//! Append-only keyed storage for finalized shard commits.
//!
//! A single redb table holds every ledger key. One [`BlockWriter`] write
//! transaction spans an entire block: it is opened when the block is
//! finalized, accumulates the block's keys plus the head metadata, and is
//! committed atomically afterwards. Dropping an uncommitted writer discards
//! the block's writes and the store falls back to the prior head. Readers
//! always observe a consistent committed snapshot.

mod store;

pub use store::{keys, BlockWriter, LedgerError, LedgerStore};
