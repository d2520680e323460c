//! The L1 ledger application.
//!
//! [`CommitApp`] implements the ABCI-shaped [`Application`] contract over the
//! keyed ledger store. Execution is deterministic by construction: a
//! transaction's identity is `SHA-256(session_id ∥ shard_id)`, the block app
//! hash is `SHA-256` over the concatenated per-transaction execution data,
//! and event attributes are emitted in a fixed order, so every replica that
//! finalizes the same block reaches the same app hash.

use provena_consensus::{
    AppError, AppInfo, Application, Event, EventAttribute, ExecTxResult, FinalizedBlock, TxCheck,
};
use provena_ledger::{keys, BlockWriter, LedgerStore};
use provena_types::commit::{tx_id_digest, CommitRequest};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Status value recorded for every finalized transaction.
const STATUS_ACCEPTED: &[u8] = b"accepted";

/// The event kind emitted for each finalized shard commit.
const EVENT_SHARD_COMMIT: &str = "shard_commit";

/// A block finalized but not yet committed. The write transaction inside the
/// writer holds every key of the block.
struct PendingBlock {
    writer: BlockWriter,
    height: u64,
}

pub struct CommitApp {
    ledger: LedgerStore,
    block: Option<PendingBlock>,
}

impl CommitApp {
    pub fn new(ledger: LedgerStore) -> Self {
        Self {
            ledger,
            block: None,
        }
    }

    fn parse(tx: &[u8]) -> Result<CommitRequest, String> {
        let request: CommitRequest =
            serde_json::from_slice(tx).map_err(|e| format!("malformed commit request: {}", e))?;
        request.validate().map_err(|e| e.to_string())?;
        Ok(request)
    }
}

impl Application for CommitApp {
    fn info(&self) -> Result<AppInfo, AppError> {
        let last_block_height = self
            .ledger
            .last_block_height()
            .map_err(|e| AppError::Store(e.to_string()))?;
        let last_block_app_hash = self
            .ledger
            .last_block_app_hash()
            .map_err(|e| AppError::Store(e.to_string()))?;
        Ok(AppInfo {
            last_block_height,
            last_block_app_hash,
        })
    }

    fn check_tx(&self, tx: &[u8]) -> TxCheck {
        match Self::parse(tx) {
            Ok(_) => TxCheck::ok(),
            Err(log) => TxCheck::reject(1, log),
        }
    }

    fn process_proposal(&self, txs: &[Vec<u8>]) -> bool {
        for tx in txs {
            if let Err(log) = Self::parse(tx) {
                debug!(target: "l1-app", log = %log, "rejecting proposal");
                return false;
            }
        }
        true
    }

    fn finalize_block(&mut self, height: u64, txs: &[Vec<u8>]) -> Result<FinalizedBlock, AppError> {
        // Replacing a stale pending block aborts its write transaction.
        self.block = None;

        let mut writer = self
            .ledger
            .begin_block()
            .map_err(|e| AppError::Store(e.to_string()))?;

        let mut tx_results = Vec::with_capacity(txs.len());
        let mut app_hasher = Sha256::new();

        for tx in txs {
            // Proposal processing already vetted every tx; a parse failure
            // here would be a replica divergence, so surface it as an error
            // rather than skipping nondeterministically.
            let request = Self::parse(tx).map_err(AppError::Store)?;

            let digest = tx_id_digest(&request.session_id, &request.shard_id);
            let tx_id = hex::encode(digest);

            writer
                .put(&keys::tx(&tx_id), tx)
                .map_err(|e| AppError::Store(e.to_string()))?;
            writer
                .put(&keys::shard_session(&request.shard_id, &request.session_id), tx)
                .map_err(|e| AppError::Store(e.to_string()))?;
            writer
                .put(&keys::status(&tx_id), STATUS_ACCEPTED)
                .map_err(|e| AppError::Store(e.to_string()))?;

            let event = Event {
                kind: EVENT_SHARD_COMMIT.to_string(),
                attributes: vec![
                    attr("session_id", &request.session_id),
                    attr("shard_id", &request.shard_id),
                    attr("client_group", &request.client_group),
                    attr("tx_id", &tx_id),
                    attr("status", "accepted"),
                ],
            };

            app_hasher.update(digest);
            tx_results.push(ExecTxResult {
                code: 0,
                data: digest.to_vec(),
                log: format!("committed session {}", request.session_id),
                events: vec![event],
            });
        }

        let app_hash = app_hasher.finalize().to_vec();
        writer
            .set_head(height, &app_hash)
            .map_err(|e| AppError::Store(e.to_string()))?;

        self.block = Some(PendingBlock { writer, height });
        Ok(FinalizedBlock {
            app_hash,
            tx_results,
        })
    }

    fn commit(&mut self) -> Result<(), AppError> {
        let pending = self
            .block
            .take()
            .ok_or_else(|| AppError::Store("commit without a finalized block".to_string()))?;
        pending
            .writer
            .commit()
            .map_err(|e| AppError::Store(e.to_string()))?;
        info!(target: "l1-app", height = pending.height, "block state committed");
        Ok(())
    }
}

fn attr(key: &str, value: &str) -> EventAttribute {
    EventAttribute {
        key: key.to_string(),
        value: value.to_string(),
        index: true,
    }
}
