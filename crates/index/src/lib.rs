//! The queryable metadata side of the L1 ledger.
//!
//! [`IndexStore`] is the seam between the commit pipeline and the relational
//! backend: session index rows, confirmed transaction rows, and the shard
//! registry. The Postgres implementation lives in [`pg`]; tests run against
//! the in-memory implementation from `provena-test-utils`.
//!
//! The index is accessed under its own transactions and is never mixed into
//! the ledger store's block write transaction.

pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provena_types::shard::Shard;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the relational index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A session with the same id has already been admitted.
    #[error("duplicate session id: {0}")]
    DuplicateSession(String),
    /// The requested row does not exist.
    #[error("row not found")]
    NotFound,
    /// A generic error originating from the database backend.
    #[error("index backend error: {0}")]
    Backend(String),
}

/// One admitted session, with the session record frozen at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexRow {
    pub session_id: String,
    pub shard_id: String,
    pub client_group: String,
    pub operator_id: String,
    pub status: String,
    pub is_committed: bool,
    pub tx_hash: Option<String>,
    pub session_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One finalized transaction, keyed by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub session_id: String,
    pub tx_hash: String,
    pub shard_id: String,
    pub client_group: String,
    pub block_height: i64,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

/// A session index row preloaded with its shard and transaction relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionIndexRow,
    pub shard: Option<Shard>,
    pub transaction: Option<TransactionRow>,
}

/// The relational index store behind the L1 query surface and the commit
/// pipeline's admission latch.
///
/// `insert_session` is the at-most-once latch: the unique constraint on
/// `session_id` serializes admission ledger-wide, so for any session id at
/// most one consensus submission can be in flight.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Pre-inserts the admission row. [`IndexError::DuplicateSession`] when
    /// the session id was already admitted.
    async fn insert_session(&self, row: &SessionIndexRow) -> Result<(), IndexError>;

    async fn set_session_tx_hash(&self, session_id: &str, tx_hash: &str)
        -> Result<(), IndexError>;

    /// Rolls back an admission after a consensus failure.
    async fn delete_session(&self, session_id: &str) -> Result<(), IndexError>;

    async fn insert_transaction(&self, row: &TransactionRow) -> Result<(), IndexError>;

    async fn sessions_by_group(&self, client_group: &str)
        -> Result<Vec<SessionRecord>, IndexError>;

    async fn sessions_by_shard(&self, shard_id: &str) -> Result<Vec<SessionRecord>, IndexError>;

    async fn transaction_by_hash(&self, tx_hash: &str)
        -> Result<Option<TransactionRow>, IndexError>;

    async fn list_shards(&self) -> Result<Vec<Shard>, IndexError>;

    async fn shard_by_id(&self, shard_id: &str) -> Result<Option<Shard>, IndexError>;

    /// Registers or updates a shard. Administrative reseed surface.
    async fn upsert_shard(&self, shard: &Shard) -> Result<(), IndexError>;
}
