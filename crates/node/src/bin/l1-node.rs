#![forbid(unsafe_code)]

//! The L1 ledger replica binary.
//!
//! Wires the ledger store, the relational index, the ordering engine, and
//! the `/l1/**` HTTP surface together, then runs until interrupted. Exits 0
//! on graceful shutdown and non-zero on configuration or startup failure.

use anyhow::{Context, Result};
use clap::Parser;
use provena_app::CommitApp;
use provena_consensus::{engine, EngineConfig};
use provena_index::pg::{PgConfig, PgIndexStore};
use provena_l1::http::{serve, L1State};
use provena_l1::Repository;
use provena_ledger::LedgerStore;
use provena_types::shard::ShardRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long a commit request waits for consensus finalization.
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(30);
/// Drain window for in-flight requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[clap(name = "l1-node", version, about = "Provena L1 ledger replica")]
struct L1Opts {
    /// Consensus engine home directory; the ledger database lives here.
    #[clap(long, default_value = "./cmt-home")]
    cmt_home: PathBuf,

    /// Port for the /l1 HTTP surface.
    #[clap(long, default_value_t = 8080)]
    http_port: u16,

    /// Host of the Postgres index database.
    #[clap(long, default_value = "localhost")]
    postgres_host: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    provena_telemetry::init::init_tracing("l1-node")?;
    let opts = L1Opts::parse();

    std::fs::create_dir_all(&opts.cmt_home)
        .with_context(|| format!("creating {}", opts.cmt_home.display()))?;
    let ledger = LedgerStore::open(opts.cmt_home.join("ledger.redb"))
        .context("opening the ledger store")?;

    let db_port = env_or("DB_PORT", "5432")
        .parse::<u16>()
        .context("parsing DB_PORT")?;
    let index = PgIndexStore::connect(&PgConfig {
        host: opts.postgres_host.clone(),
        port: db_port,
        user: env_or("DB_USER", "postgres"),
        password: env_or("DB_PASSWORD", "postgres"),
        database: env_or("DB_NAME", "l1"),
        max_connections: 8,
    })
    .await
    .context("connecting to the index store")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = engine::spawn(
        CommitApp::new(ledger.clone()),
        EngineConfig::default(),
        shutdown_rx.clone(),
    )
    .context("starting the ordering engine")?;

    let repo = Arc::new(Repository::new(
        Arc::new(index),
        ShardRegistry::new(),
        engine,
        BROADCAST_TIMEOUT,
    ));
    if let Err(e) = repo.prime_registry().await {
        warn!(target: "l1-node", error = %e, "failed to prime the shard registry");
    }

    let state = L1State {
        repo,
        node_id: env_or("L1_NODE_ID", &format!("l1-{}", opts.http_port)),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.http_port));
    let server = tokio::spawn(serve(addr, state, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!(target: "l1-node", "shutdown signal received");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(result) => result.context("joining the HTTP server task")??,
        Err(_) => warn!(target: "l1-node", "drain grace expired; exiting"),
    }
    info!(target: "l1-node", "bye");
    Ok(())
}
