//! Header-driven cross-shard forwarding.
//!
//! Requests carrying `X-Client-Group` are checked against the registry
//! before routing. An exact match on the local group is terminal and handled
//! here, so a forwarded request is never forwarded again by the target
//! shard. Unknown groups fall through to local handling and fail with the
//! natural downstream error.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use provena_types::error::UpstreamError;
use provena_types::shard::{Shard, ShardRegistry};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Routing header naming the client group a request belongs to.
pub const CLIENT_GROUP_HEADER: &str = "x-client-group";

/// Forwarding wall-clock limit.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_FORWARD_BODY: usize = 1024 * 1024;

#[derive(Clone)]
pub struct ForwardCtx {
    pub local_group: String,
    pub registry: ShardRegistry,
    pub http: reqwest::Client,
}

impl ForwardCtx {
    pub fn new(local_group: String, registry: ShardRegistry) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;
        Ok(Self {
            local_group,
            registry,
            http,
        })
    }
}

/// Preflight middleware: decide local handling vs. transparent forward.
pub async fn preflight(State(ctx): State<ForwardCtx>, req: Request, next: Next) -> Response {
    let group = match req
        .headers()
        .get(CLIENT_GROUP_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => return next.run(req).await,
    };

    // Exact match is terminal: this shard owns the group.
    if group == ctx.local_group {
        return next.run(req).await;
    }

    let shard = match ctx.registry.by_client_group(&group) {
        Some(shard) => shard,
        None => {
            debug!(target: "l2-router", group = %group, "unknown client group; handling locally");
            return next.run(req).await;
        }
    };

    match forward(&ctx, &shard, req).await {
        Ok(response) => response,
        Err(e) => {
            warn!(target: "l2-router", shard_id = %shard.shard_id, error = %e, "forward failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Replays the request against the owning shard, preserving method, path,
/// body, and headers, and relays the response status and body verbatim.
async fn forward(ctx: &ForwardCtx, shard: &Shard, req: Request) -> Result<Response, UpstreamError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        shard.l2_endpoint.trim_end_matches('/'),
        path_and_query
    );

    let mut headers = parts.headers.clone();
    // The client targets the forwarder; let reqwest set Host for the peer.
    headers.remove(header::HOST);

    debug!(target: "l2-router", method = %parts.method, url = %url, "forwarding to owning shard");

    let upstream = ctx
        .http
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(bytes.to_vec())
        .send()
        .await
        .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

    let status = upstream.status();
    let body = upstream
        .bytes()
        .await
        .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_vec()))
        .map_err(|e| UpstreamError::Unreachable(e.to_string()))
}
