//! Process-local ordering engine.
//!
//! The engine owns the [`Application`] and drives its callbacks from a single
//! task: submissions are admitted through `CheckTx`, batched in arrival
//! order, proposed as a block on a fixed interval, finalized, and committed.
//! Every admitted submission carries a single-shot completion channel that is
//! resolved only after `Commit` succeeds, which is what makes the broadcast
//! primitive blocking.
//!
//! Broadcast callers never run on the engine task; they park on the oneshot
//! with their own deadline.

use crate::application::Application;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// The hash of a transaction as surfaced to clients: lowercase hex of
/// `SHA-256(tx bytes)`.
pub fn tx_hash(tx: &[u8]) -> String {
    hex::encode(Sha256::digest(tx))
}

/// Outcome of a blocking broadcast, available once the transaction's block
/// has been committed (or immediately, when `CheckTx` rejects it).
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub hash: String,
    pub height: u64,
    pub check_tx_code: u32,
    pub log: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has shut down; no further transactions are accepted.
    #[error("consensus engine is closed")]
    Closed,
    /// The caller's deadline expired before the transaction finalized.
    #[error("broadcast deadline expired")]
    Timeout,
    /// The transaction was dropped before its block committed.
    #[error("broadcast aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between block production attempts.
    pub block_interval: Duration,
    /// Bound on queued submissions awaiting a block.
    pub mempool_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_interval: Duration::from_millis(100),
            mempool_depth: 1024,
        }
    }
}

enum Submission {
    /// Normal path: admitted through `CheckTx`, completion reported.
    Checked {
        bytes: Vec<u8>,
        responder: oneshot::Sender<BroadcastOutcome>,
    },
    /// Raw injection that bypasses `CheckTx`. `ProcessProposal` is the only
    /// guard left, exactly as for a tx gossiped in by a faulty peer.
    Raw { bytes: Vec<u8> },
}

/// Cloneable handle for submitting transactions to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Submission>,
}

impl EngineHandle {
    /// Submits a serialized transaction and blocks until it is committed in
    /// a block, returning `{hash, height, check_tx_code}`.
    ///
    /// A `CheckTx` rejection resolves immediately with a nonzero code and
    /// height 0. Expiry of `deadline` maps to [`EngineError::Timeout`].
    pub async fn broadcast_commit(
        &self,
        bytes: Vec<u8>,
        deadline: Duration,
    ) -> Result<BroadcastOutcome, EngineError> {
        let (responder, completion) = oneshot::channel();
        self.tx
            .send(Submission::Checked { bytes, responder })
            .await
            .map_err(|_| EngineError::Closed)?;
        match tokio::time::timeout(deadline, completion).await {
            Err(_) => Err(EngineError::Timeout),
            Ok(Err(_)) => Err(EngineError::Aborted(
                "transaction dropped before finalization".to_string(),
            )),
            Ok(Ok(outcome)) => Ok(outcome),
        }
    }

    /// Enqueues raw bytes without running `CheckTx`, as a byzantine peer
    /// would. Used to exercise `ProcessProposal` rejection.
    pub async fn inject_raw(&self, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.tx
            .send(Submission::Raw { bytes })
            .await
            .map_err(|_| EngineError::Closed)
    }
}

struct PendingTx {
    bytes: Vec<u8>,
    responder: Option<oneshot::Sender<BroadcastOutcome>>,
}

/// Starts the ordering engine over `app` and returns the submission handle.
///
/// The engine resumes from the application's last finalized height. It stops
/// when `shutdown` flips to `true`; pending broadcasts are then dropped and
/// their callers observe a deadline expiry.
pub fn spawn<A: Application>(
    app: A,
    config: EngineConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<EngineHandle, crate::AppError> {
    let info = app.info()?;
    let (tx, rx) = mpsc::channel(config.mempool_depth);
    info!(
        target: "consensus",
        height = info.last_block_height,
        app_hash = %hex::encode(&info.last_block_app_hash),
        "ordering engine starting"
    );
    tokio::spawn(run_loop(app, rx, config, shutdown, info.last_block_height));
    Ok(EngineHandle { tx })
}

async fn run_loop<A: Application>(
    mut app: A,
    mut rx: mpsc::Receiver<Submission>,
    config: EngineConfig,
    mut shutdown: watch::Receiver<bool>,
    mut height: u64,
) {
    let mut pending: Vec<PendingTx> = Vec::new();
    let mut ticker = tokio::time::interval(config.block_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            submission = rx.recv() => match submission {
                Some(sub) => admit(&app, &mut pending, sub),
                None => break,
            },
            _ = ticker.tick(), if !pending.is_empty() => {
                height = produce_block(&mut app, &mut pending, height);
            }
        }
    }

    info!(target: "consensus", height, pending = pending.len(), "ordering engine stopped");
    // Dropping `pending` resolves outstanding broadcasts as aborted.
}

fn admit<A: Application>(app: &A, pending: &mut Vec<PendingTx>, submission: Submission) {
    match submission {
        Submission::Checked { bytes, responder } => {
            let check = app.check_tx(&bytes);
            if check.is_ok() {
                pending.push(PendingTx {
                    bytes,
                    responder: Some(responder),
                });
            } else {
                debug!(target: "consensus", code = check.code, log = %check.log, "CheckTx rejected submission");
                let _ = responder.send(BroadcastOutcome {
                    hash: tx_hash(&bytes),
                    height: 0,
                    check_tx_code: check.code,
                    log: check.log,
                });
            }
        }
        Submission::Raw { bytes } => pending.push(PendingTx {
            bytes,
            responder: None,
        }),
    }
}

/// Runs one proposal round over everything pending. Returns the new height.
fn produce_block<A: Application>(app: &mut A, pending: &mut Vec<PendingTx>, height: u64) -> u64 {
    let txs: Vec<Vec<u8>> = pending.iter().map(|p| p.bytes.clone()).collect();

    if !app.process_proposal(&txs) {
        // A malformed tx (necessarily one that bypassed CheckTx) poisons the
        // proposal. Evict everything CheckTx would refuse and retry with the
        // remainder on the next tick.
        let before = pending.len();
        pending.retain(|p| app.check_tx(&p.bytes).is_ok());
        warn!(
            target: "consensus",
            evicted = before - pending.len(),
            retained = pending.len(),
            "proposal rejected; evicted malformed transactions"
        );
        if pending.is_empty() {
            return height;
        }
        let retry: Vec<Vec<u8>> = pending.iter().map(|p| p.bytes.clone()).collect();
        if !app.process_proposal(&retry) {
            error!(target: "consensus", "proposal rejected after eviction; dropping batch");
            pending.clear();
            return height;
        }
        return height;
    }

    let next = height + 1;
    let block = match app.finalize_block(next, &txs) {
        Ok(block) => block,
        Err(e) => {
            error!(target: "consensus", height = next, error = %e, "FinalizeBlock failed; dropping batch");
            pending.clear();
            return height;
        }
    };
    if let Err(e) = app.commit() {
        error!(target: "consensus", height = next, error = %e, "Commit failed; block discarded");
        pending.clear();
        return height;
    }

    info!(
        target: "consensus",
        height = next,
        txs = txs.len(),
        app_hash = %hex::encode(&block.app_hash),
        "block committed"
    );

    for (tx, result) in pending.drain(..).zip(block.tx_results) {
        if let Some(responder) = tx.responder {
            let _ = responder.send(BroadcastOutcome {
                hash: tx_hash(&tx.bytes),
                height: next,
                check_tx_code: 0,
                log: result.log,
            });
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        AppError, AppInfo, Application, ExecTxResult, FinalizedBlock, TxCheck,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Accepts any tx that is valid UTF-8 not equal to "bad".
    struct EchoApp {
        height: u64,
        finalized: Arc<AtomicUsize>,
    }

    impl EchoApp {
        fn valid(tx: &[u8]) -> bool {
            std::str::from_utf8(tx).map(|s| s != "bad").unwrap_or(false)
        }
    }

    impl Application for EchoApp {
        fn info(&self) -> Result<AppInfo, AppError> {
            Ok(AppInfo {
                last_block_height: self.height,
                last_block_app_hash: Vec::new(),
            })
        }

        fn check_tx(&self, tx: &[u8]) -> TxCheck {
            if Self::valid(tx) {
                TxCheck::ok()
            } else {
                TxCheck::reject(1, "malformed")
            }
        }

        fn process_proposal(&self, txs: &[Vec<u8>]) -> bool {
            txs.iter().all(|tx| Self::valid(tx))
        }

        fn finalize_block(
            &mut self,
            _height: u64,
            txs: &[Vec<u8>],
        ) -> Result<FinalizedBlock, AppError> {
            self.finalized.fetch_add(txs.len(), Ordering::SeqCst);
            Ok(FinalizedBlock {
                app_hash: vec![0u8; 32],
                tx_results: txs
                    .iter()
                    .map(|_| ExecTxResult {
                        code: 0,
                        data: Vec::new(),
                        log: String::new(),
                        events: Vec::new(),
                    })
                    .collect(),
            })
        }

        fn commit(&mut self) -> Result<(), AppError> {
            self.height += 1;
            Ok(())
        }
    }

    fn start(finalized: Arc<AtomicUsize>) -> (EngineHandle, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn(
            EchoApp {
                height: 0,
                finalized,
            },
            EngineConfig {
                block_interval: Duration::from_millis(10),
                mempool_depth: 64,
            },
            shutdown_rx,
        )
        .unwrap();
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn broadcast_blocks_until_commit() {
        let (handle, _shutdown) = start(Arc::new(AtomicUsize::new(0)));
        let outcome = handle
            .broadcast_commit(b"tx-1".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.check_tx_code, 0);
        assert!(outcome.height >= 1);
        assert_eq!(outcome.hash, tx_hash(b"tx-1"));
        assert_eq!(outcome.hash.len(), 64);

        let second = handle
            .broadcast_commit(b"tx-2".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.height > outcome.height);
    }

    #[tokio::test]
    async fn check_tx_rejection_resolves_immediately() {
        let (handle, _shutdown) = start(Arc::new(AtomicUsize::new(0)));
        let outcome = handle
            .broadcast_commit(b"bad".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.check_tx_code, 1);
        assert_eq!(outcome.height, 0);
    }

    #[tokio::test]
    async fn deadline_expiry_times_out() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn(
            EchoApp {
                height: 0,
                finalized: Arc::new(AtomicUsize::new(0)),
            },
            EngineConfig {
                // Slower than the caller's deadline.
                block_interval: Duration::from_secs(60),
                mempool_depth: 64,
            },
            shutdown_rx,
        )
        .unwrap();

        let err = handle
            .broadcast_commit(b"tx-1".to_vec(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout));
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn injected_malformed_tx_is_evicted_and_rest_finalizes() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let (handle, _shutdown) = start(finalized.clone());

        handle.inject_raw(b"bad".to_vec()).await.unwrap();
        let outcome = handle
            .broadcast_commit(b"tx-ok".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.check_tx_code, 0);
        assert!(outcome.height >= 1);
        // Only the well-formed tx reached FinalizeBlock.
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }
}
