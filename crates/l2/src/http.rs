//! The `/session/**` HTTP surface of a shard.

use crate::forward::{preflight, ForwardCtx};
use crate::l1_client::L1Client;
use crate::store::SessionStore;
use anyhow::Result;
use axum::{
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use provena_types::commit::CommitRequest;
use provena_types::error::{ErrorCode, SessionError, UpstreamError};
use provena_types::session::SessionStatus;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Static identity of the local shard.
#[derive(Debug, Clone)]
pub struct ShardIdentity {
    pub shard_id: String,
    pub client_group: String,
    pub l2_node_id: String,
}

#[derive(Clone)]
pub struct L2State {
    pub store: Arc<dyn SessionStore>,
    pub l1: Arc<L1Client>,
    pub identity: ShardIdentity,
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "CONFLICT" => StatusCode::CONFLICT,
        "PRECONDITION_FAILED" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
        "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self {
            status: status_for(e.code()),
            message: e.to_string(),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
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

// --- Request bodies ---

#[derive(Deserialize)]
struct StartSessionRequest {
    operator_id: String,
}

#[derive(Deserialize)]
struct ScanRequest {
    package_id: String,
}

#[derive(Deserialize)]
struct ValidateRequest {
    package_id: String,
    signature: String,
}

#[derive(Deserialize)]
struct QcRequest {
    passed: bool,
    #[serde(default)]
    issues: Vec<String>,
}

#[derive(Deserialize)]
struct LabelRequest {
    courier_id: String,
}

// --- Handlers ---

async fn start_session(
    State(state): State<L2State>,
    Json(body): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    let session = state.store.create_session(&body.operator_id).await?;
    info!(target: "l2-http", session_id = %session.session_id, operator_id = %session.operator_id, "session started");
    Ok(Json(json!({ "session": session })).into_response())
}

async fn scan_package(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
    Json(body): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    let (session, package) = state
        .store
        .scan_package(&session_id, &body.package_id)
        .await?;
    Ok(Json(json!({ "session": session, "package": package })).into_response())
}

async fn validate_package(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
    Json(body): Json<ValidateRequest>,
) -> Result<Response, ApiError> {
    let package = state
        .store
        .validate_package(&session_id, &body.package_id, &body.signature)
        .await?;
    Ok(Json(json!({ "package": package })).into_response())
}

async fn record_qc(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
    Json(body): Json<QcRequest>,
) -> Result<Response, ApiError> {
    let record = state
        .store
        .record_qc(&session_id, body.passed, &body.issues)
        .await?;
    Ok(Json(json!({ "qc_record": record })).into_response())
}

async fn create_label(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
    Json(body): Json<LabelRequest>,
) -> Result<Response, ApiError> {
    let (session, label) = state
        .store
        .create_label(&session_id, &body.courier_id)
        .await?;
    Ok(Json(json!({ "session": session, "label": label })).into_response())
}

/// The terminal transition: assemble the canonical record, submit it to the
/// L1, and mark the session committed only once the ledger answers with a
/// finalized `{tx_hash, block_height}`.
async fn commit_session(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.store.get_session(&session_id).await?;
    if session.is_committed {
        return Err(SessionError::Conflict(format!(
            "session {} is already committed",
            session_id
        ))
        .into());
    }
    if session.status != SessionStatus::Completed {
        return Err(SessionError::PreconditionFailed(format!(
            "session {} is not completed",
            session_id
        ))
        .into());
    }

    let session_data = state.store.session_view(&session_id).await?;
    let request = CommitRequest {
        shard_id: state.identity.shard_id.clone(),
        client_group: state.identity.client_group.clone(),
        session_id: session_id.clone(),
        operator_id: session.operator_id.clone(),
        session_data,
        l2_node_id: state.identity.l2_node_id.clone(),
        timestamp: Utc::now(),
    };

    let outcome = match state.l1.submit_commit(&request).await {
        Ok(outcome) => outcome,
        Err(UpstreamError::BadResponse { status: 409, body }) => {
            // The ledger already admitted this session id; surface the
            // duplicate rather than a gateway failure.
            warn!(target: "l2-http", session_id = %session_id, body = %body, "L1 reported duplicate session");
            return Err(SessionError::Conflict(format!(
                "session {} already exists on the ledger",
                session_id
            ))
            .into());
        }
        Err(e) => {
            warn!(target: "l2-http", session_id = %session_id, error = %e, "L1 commit failed; session stays completed");
            return Err(e.into());
        }
    };

    let session = state
        .store
        .mark_committed(&session_id, &outcome.tx_hash, outcome.block_height)
        .await?;
    info!(
        target: "l2-http",
        session_id = %session_id,
        tx_hash = %outcome.tx_hash,
        block_height = outcome.block_height,
        "session committed to L1"
    );
    Ok(Json(json!({
        "session_id": session.session_id,
        "status": session.status,
        "l1_tx_hash": session.l1_tx_hash,
        "l1_block_height": session.l1_block_height,
        "l1_commit_time": session.l1_commit_time,
    }))
    .into_response())
}

async fn get_session(
    State(state): State<L2State>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.store.get_session(&session_id).await?;
    let data = state.store.session_view(&session_id).await?;
    Ok(Json(json!({ "session": session, "data": data })).into_response())
}

async fn info_handler(State(state): State<L2State>) -> Response {
    Json(json!({
        "shard_id": state.identity.shard_id,
        "client_group": state.identity.client_group,
        "l2_node_id": state.identity.l2_node_id,
        "status": "active",
        "time": Utc::now().to_rfc3339(),
    }))
    .into_response()
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

/// Builds the shard router with the forwarding preflight applied to every
/// route.
pub fn router(state: L2State, forward: ForwardCtx) -> Router {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/:id/scan", post(scan_package))
        .route("/session/:id/validate", post(validate_package))
        .route("/session/:id/qc", post(record_qc))
        .route("/session/:id/label", post(create_label))
        .route("/session/:id/commit", post(commit_session))
        .route("/session/:id", get(get_session))
        .route("/info", get(info_handler))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(middleware::from_fn_with_state(forward, preflight))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                // Wide enough for a forwarded call plus the L1 commit wait.
                .layer(TimeoutLayer::new(Duration::from_secs(35))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
}

/// Serves the shard until the shutdown signal flips.
pub async fn serve(
    addr: SocketAddr,
    state: L2State,
    forward: ForwardCtx,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state, forward);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "l2-http", %addr, "L2 shard listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_rx.changed().await.ok();
        info!(target: "l2-http", "shutting down gracefully");
    });

    if let Err(e) = server.await {
        error!(target: "l2-http", error = %e, "server error");
    }
    Ok(())
}
