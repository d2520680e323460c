//! End-to-end commit pipeline tests: admission latch, consensus broadcast,
//! ledger writes, and rollback on consensus failure.

use provena_app::CommitApp;
use provena_consensus::{
    engine, AppError, AppInfo, Application, EngineConfig, ExecTxResult, FinalizedBlock, TxCheck,
};
use provena_index::IndexStore;
use provena_l1::Repository;
use provena_ledger::{keys, LedgerStore};
use provena_test_utils::{fixtures, MemIndexStore};
use provena_types::commit::tx_id_digest;
use provena_types::error::CommitError;
use provena_types::shard::ShardRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Harness {
    repo: Repository,
    ledger: LedgerStore,
    index: Arc<MemIndexStore>,
    _dir: tempfile::TempDir,
    _shutdown: watch::Sender<bool>,
}

async fn harness_with_interval(block_interval: Duration, broadcast_timeout: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ledger = LedgerStore::open(dir.path().join("ledger.redb")).unwrap();

    let index = Arc::new(MemIndexStore::new());
    index.seed_shard(fixtures::shard("shard-a", "group-a", "http://127.0.0.1:9"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = engine::spawn(
        CommitApp::new(ledger.clone()),
        EngineConfig {
            block_interval,
            mempool_depth: 64,
        },
        shutdown_rx,
    )
    .unwrap();

    let repo = Repository::new(
        index.clone() as Arc<dyn IndexStore>,
        ShardRegistry::new(),
        engine,
        broadcast_timeout,
    );
    repo.prime_registry().await.unwrap();

    Harness {
        repo,
        ledger,
        index,
        _dir: dir,
        _shutdown: shutdown_tx,
    }
}

async fn harness() -> Harness {
    harness_with_interval(Duration::from_millis(10), Duration::from_secs(5)).await
}

#[tokio::test]
async fn happy_path_commit_reaches_ledger_and_index() {
    let h = harness().await;
    let request = fixtures::commit_request("SES-11111111", "shard-a", "group-a");

    let outcome = h.repo.submit_commit(&request).await.unwrap();
    assert_eq!(outcome.tx_hash.len(), 64);
    assert!(outcome.block_height >= 1);

    // Ledger keys are in place under the deterministic tx id.
    let tx_id = hex::encode(tx_id_digest("SES-11111111", "shard-a"));
    assert!(h.ledger.get(&keys::tx(&tx_id)).unwrap().is_some());
    assert!(h
        .ledger
        .get(&keys::shard_session("shard-a", "SES-11111111"))
        .unwrap()
        .is_some());
    assert_eq!(
        h.ledger.get(&keys::status(&tx_id)).unwrap().unwrap(),
        b"accepted"
    );

    // The index row carries the consensus tx hash and the transaction row
    // is confirmed at the broadcast height.
    let records = h.repo.sessions_by_shard("shard-a").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session.tx_hash.as_deref(), Some(outcome.tx_hash.as_str()));
    assert!(records[0].session.is_committed);

    let row = h
        .repo
        .transaction_by_hash(&outcome.tx_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.session_id, "SES-11111111");
    assert_eq!(row.block_height, outcome.block_height);
    assert_eq!(row.status, "confirmed");
}

#[tokio::test]
async fn missing_fields_are_rejected_before_any_write() {
    let h = harness().await;
    let mut request = fixtures::commit_request("SES-22222222", "shard-a", "group-a");
    request.session_id = String::new();

    let err = h.repo.submit_commit(&request).await.unwrap_err();
    assert!(matches!(err, CommitError::MissingField("session_id")));
    assert_eq!(h.index.session_count(), 0);
    assert_eq!(h.ledger.last_block_height().unwrap(), 0);
}

#[tokio::test]
async fn unknown_shard_is_rejected_before_any_write() {
    let h = harness().await;
    let request = fixtures::commit_request("SES-33333333", "shard-zz", "group-zz");

    let err = h.repo.submit_commit(&request).await.unwrap_err();
    assert!(matches!(err, CommitError::ShardNotFound(_)));
    assert_eq!(h.index.session_count(), 0);
    assert_eq!(h.ledger.last_block_height().unwrap(), 0);
}

#[tokio::test]
async fn duplicate_commit_race_admits_exactly_one() {
    let h = harness().await;
    let request = fixtures::commit_request("dup-1", "shard-a", "group-a");

    let (first, second) = tokio::join!(
        h.repo.submit_commit(&request),
        h.repo.submit_commit(&request)
    );

    let mut outcomes = [first, second];
    outcomes.sort_by_key(|r| r.is_err());
    assert!(outcomes[0].is_ok());
    assert!(matches!(
        outcomes[1].as_ref().unwrap_err(),
        CommitError::SessionExists(id) if id == "dup-1"
    ));

    // Exactly one admission row and one ledger entry.
    assert_eq!(h.index.session_count(), 1);
    let tx_id = hex::encode(tx_id_digest("dup-1", "shard-a"));
    assert!(h.ledger.get(&keys::tx(&tx_id)).unwrap().is_some());
}

#[tokio::test]
async fn consensus_rejection_rolls_back_the_admission_row() {
    // An application that refuses everything stands in for a consensus
    // failure after admission.
    struct RejectApp;
    impl Application for RejectApp {
        fn info(&self) -> Result<AppInfo, AppError> {
            Ok(AppInfo::default())
        }
        fn check_tx(&self, _tx: &[u8]) -> TxCheck {
            TxCheck::reject(7, "refused")
        }
        fn process_proposal(&self, _txs: &[Vec<u8>]) -> bool {
            false
        }
        fn finalize_block(
            &mut self,
            _height: u64,
            _txs: &[Vec<u8>],
        ) -> Result<FinalizedBlock, AppError> {
            Ok(FinalizedBlock {
                app_hash: Vec::new(),
                tx_results: Vec::<ExecTxResult>::new(),
            })
        }
        fn commit(&mut self) -> Result<(), AppError> {
            Ok(())
        }
    }

    let index = Arc::new(MemIndexStore::new());
    index.seed_shard(fixtures::shard("shard-a", "group-a", "http://127.0.0.1:9"));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = engine::spawn(RejectApp, EngineConfig::default(), shutdown_rx).unwrap();
    let repo = Repository::new(
        index.clone() as Arc<dyn IndexStore>,
        ShardRegistry::new(),
        engine,
        Duration::from_secs(5),
    );
    repo.prime_registry().await.unwrap();

    let request = fixtures::commit_request("SES-44444444", "shard-a", "group-a");
    let err = repo.submit_commit(&request).await.unwrap_err();
    assert!(matches!(err, CommitError::Consensus(_)));

    // The pre-inserted row was rolled back; the session can be re-admitted.
    assert_eq!(index.session_count(), 0);
}

#[tokio::test]
async fn consensus_timeout_rolls_back_and_leaves_no_row() {
    // Block production far slower than the broadcast deadline.
    let h = harness_with_interval(Duration::from_secs(60), Duration::from_millis(100)).await;
    let request = fixtures::commit_request("SES-55555555", "shard-a", "group-a");

    let err = h.repo.submit_commit(&request).await.unwrap_err();
    assert!(matches!(err, CommitError::ConsensusTimeout));

    assert_eq!(h.index.session_count(), 0);
    let records = h.repo.sessions_by_shard("shard-a").await.unwrap();
    assert!(records.is_empty());
}
