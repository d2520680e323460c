use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// ---- Table definition (single table, string keys) ----
const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("LEDGER");

/// Ledger key layout.
pub mod keys {
    pub const LAST_BLOCK_HEIGHT: &str = "last_block_height";
    pub const LAST_BLOCK_APP_HASH: &str = "last_block_app_hash";

    /// `tx:<tx_id>` — raw transaction bytes keyed by the deterministic tx id.
    pub fn tx(tx_id: &str) -> String {
        format!("tx:{}", tx_id)
    }

    /// `shard:<shard_id>:session:<session_id>` — raw transaction bytes keyed
    /// by origin, for cross-shard session lookups.
    pub fn shard_session(shard_id: &str, session_id: &str) -> String {
        format!("shard:{}:session:{}", shard_id, session_id)
    }

    /// `status:<tx_id>` — admission status of a finalized transaction.
    pub fn status(tx_id: &str) -> String {
        format!("status:{}", tx_id)
    }
}

/// Errors raised by the durable ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A generic error originating from the underlying key-value backend.
    #[error("backend error: {0}")]
    Backend(String),
    /// The requested key was not found in the store.
    #[error("not found")]
    NotFound,
}

fn backend<E: std::fmt::Display>(e: E) -> LedgerError {
    LedgerError::Backend(e.to_string())
}

/// Handle on the durable ledger database. Cheap to clone.
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<Database>,
}

impl LedgerStore {
    /// Opens (or creates) the ledger at `path` and ensures the table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = Database::create(path).map_err(backend)?;
        {
            let txn = db.begin_write().map_err(backend)?;
            txn.open_table(LEDGER).map_err(backend)?;
            txn.commit().map_err(backend)?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    /// Opens the write transaction for one block. Exactly one block writer
    /// may exist at a time; the caller holds it from finalization to commit.
    pub fn begin_block(&self) -> Result<BlockWriter, LedgerError> {
        let txn = self.db.begin_write().map_err(backend)?;
        Ok(BlockWriter { txn })
    }

    /// Reads one key from the latest committed snapshot.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let read = self.db.begin_read().map_err(backend)?;
        let table = read.open_table(LEDGER).map_err(backend)?;
        let value = table
            .get(key)
            .map_err(backend)?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// The height of the last committed block, 0 before genesis.
    pub fn last_block_height(&self) -> Result<u64, LedgerError> {
        match self.get(keys::LAST_BLOCK_HEIGHT)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Backend("corrupt height encoding".to_string()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// The app hash of the last committed block, empty before genesis.
    pub fn last_block_app_hash(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(self.get(keys::LAST_BLOCK_APP_HASH)?.unwrap_or_default())
    }
}

/// The single write transaction covering one block.
///
/// Dropping the writer without calling [`BlockWriter::commit`] aborts the
/// transaction and discards every write made through it.
pub struct BlockWriter {
    txn: WriteTransaction,
}

impl BlockWriter {
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        let mut table = self.txn.open_table(LEDGER).map_err(backend)?;
        table.insert(key, value).map_err(backend)?;
        Ok(())
    }

    /// Records the block head metadata inside the same transaction.
    pub fn set_head(&mut self, height: u64, app_hash: &[u8]) -> Result<(), LedgerError> {
        self.put(keys::LAST_BLOCK_HEIGHT, &height.to_be_bytes())?;
        self.put(keys::LAST_BLOCK_APP_HASH, app_hash)
    }

    /// Commits the block atomically.
    pub fn commit(self) -> Result<(), LedgerError> {
        self.txn.commit().map_err(backend)
    }
}
