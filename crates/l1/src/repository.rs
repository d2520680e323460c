use chrono::Utc;
use provena_consensus::{EngineError, EngineHandle};
use provena_index::{IndexError, IndexStore, SessionIndexRow, SessionRecord, TransactionRow};
use provena_types::commit::CommitRequest;
use provena_types::error::CommitError;
use provena_types::shard::{Shard, ShardRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The finalized result of a shard commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub tx_hash: String,
    pub block_height: i64,
}

/// Orchestrates the commit pipeline and the cross-shard queries for one
/// replica.
///
/// Admission policy: the session index row is pre-inserted *before* the
/// consensus broadcast and deleted if consensus fails. The unique constraint
/// on `session_id` is the at-most-once latch, so concurrent duplicates spend
/// no consensus capacity.
pub struct Repository {
    index: Arc<dyn IndexStore>,
    registry: ShardRegistry,
    engine: EngineHandle,
    broadcast_timeout: Duration,
}

impl Repository {
    pub fn new(
        index: Arc<dyn IndexStore>,
        registry: ShardRegistry,
        engine: EngineHandle,
        broadcast_timeout: Duration,
    ) -> Self {
        Self {
            index,
            registry,
            engine,
            broadcast_timeout,
        }
    }

    /// Loads the shard registry cache from the index store.
    pub async fn prime_registry(&self) -> Result<usize, CommitError> {
        let shards = self
            .index
            .list_shards()
            .await
            .map_err(|e| CommitError::Database(e.to_string()))?;
        let count = shards.len();
        self.registry.replace_all(shards);
        info!(target: "l1-http", shards = count, "shard registry primed");
        Ok(count)
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    /// Runs one commit request through admission, consensus, and index
    /// confirmation.
    pub async fn submit_commit(&self, request: &CommitRequest) -> Result<CommitOutcome, CommitError> {
        request.validate()?;
        let shard = self.resolve_shard(&request.shard_id).await?;

        let row = SessionIndexRow {
            session_id: request.session_id.clone(),
            shard_id: shard.shard_id.clone(),
            client_group: request.client_group.clone(),
            operator_id: request.operator_id.clone(),
            status: "committed".to_string(),
            is_committed: true,
            tx_hash: None,
            session_data: serde_json::to_value(&request.session_data)
                .map_err(|e| CommitError::Database(e.to_string()))?,
            created_at: Utc::now(),
        };
        match self.index.insert_session(&row).await {
            Ok(()) => {}
            Err(IndexError::DuplicateSession(id)) => return Err(CommitError::SessionExists(id)),
            Err(e) => return Err(CommitError::Database(e.to_string())),
        }

        let bytes = serde_json::to_vec(request)
            .map_err(|e| CommitError::Database(e.to_string()))?;

        let outcome = match self
            .engine
            .broadcast_commit(bytes, self.broadcast_timeout)
            .await
        {
            Ok(outcome) if outcome.check_tx_code == 0 => outcome,
            Ok(outcome) => {
                self.rollback_admission(&request.session_id).await;
                return Err(CommitError::Consensus(outcome.log));
            }
            // Deadline expiry, engine shutdown, and dropped broadcasts all
            // surface as a timeout: the transaction never finalized and the
            // admission row is released for a retry.
            Err(EngineError::Timeout | EngineError::Closed | EngineError::Aborted(_)) => {
                self.rollback_admission(&request.session_id).await;
                return Err(CommitError::ConsensusTimeout);
            }
        };

        self.index
            .set_session_tx_hash(&request.session_id, &outcome.hash)
            .await
            .map_err(|e| CommitError::Database(e.to_string()))?;
        self.index
            .insert_transaction(&TransactionRow {
                session_id: request.session_id.clone(),
                tx_hash: outcome.hash.clone(),
                shard_id: shard.shard_id.clone(),
                client_group: request.client_group.clone(),
                block_height: outcome.height as i64,
                timestamp: Utc::now(),
                status: "confirmed".to_string(),
            })
            .await
            .map_err(|e| CommitError::Database(e.to_string()))?;

        info!(
            target: "l1-http",
            session_id = %request.session_id,
            shard_id = %shard.shard_id,
            tx_hash = %outcome.hash,
            height = outcome.height,
            "shard commit finalized"
        );
        Ok(CommitOutcome {
            tx_hash: outcome.hash,
            block_height: outcome.height as i64,
        })
    }

    async fn resolve_shard(&self, shard_id: &str) -> Result<Shard, CommitError> {
        if let Some(shard) = self.registry.by_shard_id(shard_id) {
            return Ok(shard);
        }
        // The cache is primed at startup; fall through to the store so a
        // freshly registered shard is not bounced.
        match self
            .index
            .shard_by_id(shard_id)
            .await
            .map_err(|e| CommitError::Database(e.to_string()))?
        {
            Some(shard) => {
                self.registry.insert(shard.clone());
                Ok(shard)
            }
            None => Err(CommitError::ShardNotFound(shard_id.to_string())),
        }
    }

    async fn rollback_admission(&self, session_id: &str) {
        warn!(target: "l1-http", session_id, "rolling back admission row after consensus failure");
        if let Err(e) = self.index.delete_session(session_id).await {
            // The row survives until an operator removes it; subsequent
            // commits for this session will see SESSION_EXISTS.
            error!(target: "l1-http", session_id, error = %e, "admission rollback failed");
        }
    }

    pub async fn sessions_by_group(
        &self,
        client_group: &str,
    ) -> Result<Vec<SessionRecord>, CommitError> {
        self.index
            .sessions_by_group(client_group)
            .await
            .map_err(|e| CommitError::Database(e.to_string()))
    }

    pub async fn sessions_by_shard(
        &self,
        shard_id: &str,
    ) -> Result<Vec<SessionRecord>, CommitError> {
        self.index
            .sessions_by_shard(shard_id)
            .await
            .map_err(|e| CommitError::Database(e.to_string()))
    }

    pub async fn transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionRow>, CommitError> {
        self.index
            .transaction_by_hash(tx_hash)
            .await
            .map_err(|e| CommitError::Database(e.to_string()))
    }

    pub async fn shards(&self) -> Result<Vec<Shard>, CommitError> {
        self.index
            .list_shards()
            .await
            .map_err(|e| CommitError::Database(e.to_string()))
    }
}
