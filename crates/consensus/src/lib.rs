//! The consensus boundary of the L1 ledger.
//!
//! [`Application`] is the ABCI-shaped callback contract the replicated
//! engine drives: `Info`, `CheckTx`, `ProcessProposal`, `FinalizeBlock`,
//! `Commit`, plus snapshot stubs. [`engine`] provides the process-local
//! ordering engine that batches admitted transactions into blocks and the
//! blocking broadcast-and-wait primitive used by the commit pipeline.
//!
//! The engine's P2P, gossip, and validator-set machinery live below this
//! boundary and are not modeled here.

mod application;
pub mod engine;

pub use application::{
    AppError, AppInfo, Application, Event, EventAttribute, ExecTxResult, FinalizedBlock, TxCheck,
};
pub use engine::{tx_hash, BroadcastOutcome, EngineConfig, EngineError, EngineHandle};
