use thiserror::Error;

/// Errors an application callback may surface to the engine.
#[derive(Debug, Error)]
pub enum AppError {
    /// The backing ledger store failed.
    #[error("ledger store error: {0}")]
    Store(String),
}

/// The application's view of the last finalized block.
#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    pub last_block_height: u64,
    pub last_block_app_hash: Vec<u8>,
}

/// Result of a `CheckTx` admission check. Code 0 admits the transaction.
#[derive(Debug, Clone)]
pub struct TxCheck {
    pub code: u32,
    pub log: String,
}

impl TxCheck {
    pub fn ok() -> Self {
        Self {
            code: 0,
            log: String::new(),
        }
    }

    pub fn reject(code: u32, log: impl Into<String>) -> Self {
        Self {
            code,
            log: log.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// A single typed attribute of a finalization event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    /// Whether the attribute is indexed for event queries.
    pub index: bool,
}

/// A typed event emitted while finalizing a transaction.
///
/// Attribute order is part of the deterministic block output and must be
/// identical on every replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

/// Deterministic execution result of one transaction in a finalized block.
#[derive(Debug, Clone)]
pub struct ExecTxResult {
    pub code: u32,
    /// Execution data; concatenated across the block to form the app hash.
    pub data: Vec<u8>,
    pub log: String,
    pub events: Vec<Event>,
}

/// The deterministic output of `FinalizeBlock`.
#[derive(Debug, Clone)]
pub struct FinalizedBlock {
    pub app_hash: Vec<u8>,
    pub tx_results: Vec<ExecTxResult>,
}

/// The ABCI-shaped callback contract between the consensus engine and the
/// ledger application.
///
/// `check_tx` and `process_proposal` must be pure: no writes, and identical
/// verdicts for identical bytes on every replica. `finalize_block` opens the
/// block's single write transaction; `commit` makes it durable. The engine
/// never calls `finalize_block` twice without an intervening `commit`.
pub trait Application: Send + 'static {
    fn info(&self) -> Result<AppInfo, AppError>;

    fn check_tx(&self, tx: &[u8]) -> TxCheck;

    /// Accepts or rejects a whole proposed block.
    fn process_proposal(&self, txs: &[Vec<u8>]) -> bool;

    /// Executes the block's transactions in engine order against the block's
    /// write transaction and returns the deterministic results.
    fn finalize_block(&mut self, height: u64, txs: &[Vec<u8>]) -> Result<FinalizedBlock, AppError>;

    /// Commits the finalized block's writes atomically. On error the writes
    /// are discarded and the prior app hash remains authoritative.
    fn commit(&mut self) -> Result<(), AppError>;

    /// Snapshot offer stub; state sync is not supported.
    fn offer_snapshot(&mut self) -> bool {
        false
    }

    /// Snapshot listing stub; state sync is not supported.
    fn list_snapshots(&self) -> Vec<u64> {
        Vec::new()
    }
}
