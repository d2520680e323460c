//! Core error types for the Provena pipeline.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised by the L2 session state machine.
///
/// Every operation is a single database transaction; when one of these is
/// returned the transaction has been rolled back and no state changed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The referenced session, package, or courier does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation conflicts with an already-recorded result.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The entity is not in the state the operation requires.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// An error originating from the session database.
    #[error("database error: {0}")]
    Database(String),
}

impl ErrorCode for SessionError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Errors raised by the L1 commit pipeline.
#[derive(Debug, Error)]
pub enum CommitError {
    /// A required identity field of the commit request was empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// The submitting shard is not present in the registry.
    #[error("shard not found: {0}")]
    ShardNotFound(String),
    /// The session id has already been admitted to the ledger.
    #[error("session already exists: {0}")]
    SessionExists(String),
    /// Consensus rejected or dropped the transaction.
    #[error("consensus error: {0}")]
    Consensus(String),
    /// Consensus did not finalize the transaction within the deadline.
    #[error("consensus did not finalize within the deadline")]
    ConsensusTimeout,
    /// An error originating from the index store.
    #[error("database error: {0}")]
    Database(String),
}

impl ErrorCode for CommitError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "BAD_REQUEST",
            Self::ShardNotFound(_) => "SHARD_NOT_FOUND",
            Self::SessionExists(_) => "SESSION_EXISTS",
            Self::Consensus(_) => "CONSENSUS_ERROR",
            Self::ConsensusTimeout => "CONSENSUS_TIMEOUT",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Errors raised when talking to the L1 or to a peer shard.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    BadResponse { status: u16, body: String },
    /// The upstream could not be reached or the response was unreadable.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
}

impl ErrorCode for UpstreamError {
    fn code(&self) -> &'static str {
        "UPSTREAM_ERROR"
    }
}
