//! The `/l1/**` HTTP surface.
//!
//! Every response is wrapped in the uniform envelope
//! `{data, meta: {tx_id, status, block_height, confirm_time, shard_info},
//! node_id}`. Non-commit responses carry `meta.status = "processed"` with
//! empty consensus fields.

use crate::metrics::{install_l1_metrics, metrics_handler, observe_commit, observe_request};
use crate::repository::Repository;
use anyhow::Result;
use axum::{
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use provena_types::commit::CommitRequest;
use provena_types::error::{CommitError, ErrorCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct L1State {
    pub repo: Arc<Repository>,
    pub node_id: String,
}

#[derive(Serialize, Default)]
struct ShardInfo {
    shard_id: String,
    client_group: String,
}

#[derive(Serialize)]
struct ResponseMeta {
    tx_id: String,
    status: String,
    block_height: i64,
    confirm_time: String,
    shard_info: ShardInfo,
}

impl ResponseMeta {
    fn processed() -> Self {
        Self {
            tx_id: String::new(),
            status: "processed".to_string(),
            block_height: 0,
            confirm_time: String::new(),
            shard_info: ShardInfo::default(),
        }
    }
}

#[derive(Serialize)]
struct Envelope {
    data: Value,
    meta: ResponseMeta,
    node_id: String,
}

fn wrap(data: Value, meta: ResponseMeta, node_id: &str) -> Json<Envelope> {
    Json(Envelope {
        data,
        meta,
        node_id: node_id.to_string(),
    })
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "CONFLICT" | "SESSION_EXISTS" => StatusCode::CONFLICT,
        "BAD_REQUEST" | "SHARD_NOT_FOUND" | "PRECONDITION_FAILED" => StatusCode::BAD_REQUEST,
        "CONSENSUS_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain error body for the non-commit endpoints.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<CommitError> for ApiError {
    fn from(e: CommitError) -> Self {
        Self {
            status: status_for(e.code()),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// --- Handlers ---

async fn commit_handler(
    State(state): State<L1State>,
    Json(request): Json<CommitRequest>,
) -> Response {
    let started = Instant::now();
    match state.repo.submit_commit(&request).await {
        Ok(outcome) => {
            observe_request("/l1/commit", "ok");
            observe_commit("ok", started.elapsed().as_secs_f64());
            let meta = ResponseMeta {
                tx_id: request.tx_id(),
                status: "committed".to_string(),
                block_height: outcome.block_height,
                confirm_time: Utc::now().to_rfc3339(),
                shard_info: ShardInfo {
                    shard_id: request.shard_id.clone(),
                    client_group: request.client_group.clone(),
                },
            };
            let data = json!({
                "message": "session committed to the ledger",
                "tx_hash": outcome.tx_hash,
                "session_id": request.session_id,
                "shard_id": request.shard_id,
                "block_height": outcome.block_height,
            });
            (StatusCode::ACCEPTED, wrap(data, meta, &state.node_id)).into_response()
        }
        Err(e) => {
            let code = e.code();
            observe_request("/l1/commit", code);
            observe_commit("error", started.elapsed().as_secs_f64());
            let mut meta = ResponseMeta::processed();
            meta.status = code.to_string();
            (
                status_for(code),
                wrap(json!({ "error": e.to_string() }), meta, &state.node_id),
            )
                .into_response()
        }
    }
}

async fn sessions_by_group(
    State(state): State<L1State>,
    Path(group): Path<String>,
) -> Result<Response, ApiError> {
    let records = state.repo.sessions_by_group(&group).await?;
    observe_request("/l1/sessions/group", "ok");
    let count = records.len();
    let data = json!({ "sessions": records, "count": count });
    Ok(wrap(data, ResponseMeta::processed(), &state.node_id).into_response())
}

async fn sessions_by_shard(
    State(state): State<L1State>,
    Path(shard): Path<String>,
) -> Result<Response, ApiError> {
    let records = state.repo.sessions_by_shard(&shard).await?;
    observe_request("/l1/sessions/shard", "ok");
    let count = records.len();
    let data = json!({ "sessions": records, "count": count });
    Ok(wrap(data, ResponseMeta::processed(), &state.node_id).into_response())
}

async fn transaction_by_hash(
    State(state): State<L1State>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    match state.repo.transaction_by_hash(&hash).await? {
        Some(row) => {
            observe_request("/l1/transaction", "ok");
            let data = serde_json::to_value(&row).map_err(|e| ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: e.to_string(),
            })?;
            Ok(wrap(data, ResponseMeta::processed(), &state.node_id).into_response())
        }
        None => {
            observe_request("/l1/transaction", "not_found");
            Err(ApiError {
                status: StatusCode::NOT_FOUND,
                message: format!("transaction not found: {}", hash),
            })
        }
    }
}

async fn status_handler(State(state): State<L1State>) -> Response {
    observe_request("/l1/status", "ok");
    let data = json!({
        "status": "active",
        "layer": "L1",
        "type": "Byzantine Fault Tolerant",
        "time": Utc::now().to_rfc3339(),
    });
    wrap(data, ResponseMeta::processed(), &state.node_id).into_response()
}

async fn shards_handler(State(state): State<L1State>) -> Result<Response, ApiError> {
    let shards = state.repo.shards().await?;
    observe_request("/l1/shards", "ok");
    let count = shards.len();
    let data = json!({ "shards": shards, "count": count });
    Ok(wrap(data, ResponseMeta::processed(), &state.node_id).into_response())
}

async fn fallback_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no such endpoint" })),
    )
        .into_response()
}

async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({ "error": "request timed out" })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
    }
}

/// Builds the `/l1/**` router.
pub fn router(state: L1State) -> Router {
    Router::new()
        .route("/l1/commit", post(commit_handler))
        .route("/l1/sessions/group/:group", get(sessions_by_group))
        .route("/l1/sessions/shard/:shard", get(sessions_by_shard))
        .route("/l1/transaction/:hash", get(transaction_by_hash))
        .route("/l1/status", get(status_handler))
        .route("/l1/shards", get(shards_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                // Wide enough for a full consensus broadcast wait.
                .layer(TimeoutLayer::new(Duration::from_secs(35))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
}

/// Serves the router until the shutdown signal flips.
pub async fn serve(
    addr: SocketAddr,
    state: L1State,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    install_l1_metrics();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "l1-http", %addr, "L1 HTTP surface listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_rx.changed().await.ok();
        info!(target: "l1-http", "shutting down gracefully");
    });

    if let Err(e) = server.await {
        error!(target: "l1-http", error = %e, "server error");
    }
    Ok(())
}
