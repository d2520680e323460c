#![forbid(unsafe_code)]

//! The L2 shard binary.
//!
//! Configuration comes from the environment (`SHARD_ID`, `CLIENT_GROUP`,
//! `L2_NODE_ID`, `HTTP_PORT`, `DB_*`, `L1_ENDPOINT`). The shard primes its
//! registry copy from the L1 at startup, serves the `/session/**` surface,
//! and drains gracefully on interrupt. Exits 0 on graceful shutdown and
//! non-zero on configuration or startup failure.

use anyhow::{Context, Result};
use provena_l2::config::L2Config;
use provena_l2::forward::ForwardCtx;
use provena_l2::http::{serve, L2State, ShardIdentity};
use provena_l2::l1_client::L1Client;
use provena_l2::store::pg::PgSessionStore;
use provena_types::shard::ShardRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    provena_telemetry::init::init_tracing("l2-node")?;
    let config = L2Config::from_env().context("loading L2 configuration")?;
    info!(
        target: "l2-node",
        shard_id = %config.shard_id,
        client_group = %config.client_group,
        "starting shard"
    );

    let store = PgSessionStore::connect(&config.db)
        .await
        .context("connecting to the session store")?;
    let l1 = Arc::new(L1Client::new(&config.l1_endpoint).context("building the L1 client")?);

    let registry = ShardRegistry::new();
    l1.prime_registry(&registry).await;

    let forward = ForwardCtx::new(config.client_group.clone(), registry)
        .context("building the forwarder")?;
    let state = L2State {
        store: Arc::new(store),
        l1,
        identity: ShardIdentity {
            shard_id: config.shard_id.clone(),
            client_group: config.client_group.clone(),
            l2_node_id: config.l2_node_id.clone(),
        },
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let server = tokio::spawn(serve(addr, state, forward, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!(target: "l2-node", "shutdown signal received");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(result) => result.context("joining the HTTP server task")??,
        Err(_) => warn!(target: "l2-node", "drain grace expired; exiting"),
    }
    info!(target: "l2-node", "bye");
    Ok(())
}
