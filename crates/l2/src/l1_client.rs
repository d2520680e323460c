//! Outbound client for the L1 commit and registry endpoints.

use provena_types::commit::CommitRequest;
use provena_types::error::UpstreamError;
use provena_types::shard::{Shard, ShardRegistry};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

const L1_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a finalized L1 commit as seen by the shard.
#[derive(Debug, Clone)]
pub struct L1Commit {
    pub tx_hash: String,
    pub block_height: i64,
}

pub struct L1Client {
    base: String,
    http: reqwest::Client,
}

impl L1Client {
    pub fn new(endpoint: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(L1_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// POSTs the canonical session record to `/l1/commit` and parses
    /// `{data.tx_hash, meta.block_height}` out of the wrapped response.
    pub async fn submit_commit(&self, request: &CommitRequest) -> Result<L1Commit, UpstreamError> {
        let url = format!("{}/l1/commit", self.base);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        if status != 200 && status != 202 {
            return Err(UpstreamError::BadResponse {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let value: Value = serde_json::from_slice(&body).map_err(|e| UpstreamError::BadResponse {
            status,
            body: format!("unparseable commit response: {}", e),
        })?;
        let tx_hash = value["data"]["tx_hash"]
            .as_str()
            .ok_or_else(|| UpstreamError::BadResponse {
                status,
                body: "commit response is missing data.tx_hash".to_string(),
            })?
            .to_string();
        let block_height =
            value["meta"]["block_height"]
                .as_i64()
                .ok_or_else(|| UpstreamError::BadResponse {
                    status,
                    body: "commit response is missing meta.block_height".to_string(),
                })?;

        Ok(L1Commit {
            tx_hash,
            block_height,
        })
    }

    /// Fetches the shard registry from `GET /l1/shards`.
    pub async fn fetch_shards(&self) -> Result<Vec<Shard>, UpstreamError> {
        let url = format!("{}/l1/shards", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::BadResponse { status, body });
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;
        let shards = serde_json::from_value(value["data"]["shards"].clone()).map_err(|e| {
            UpstreamError::BadResponse {
                status,
                body: format!("unparseable shard list: {}", e),
            }
        })?;
        Ok(shards)
    }

    /// Primes the local registry copy at startup. Failure is logged and
    /// non-fatal: forwarding then degrades to local handling.
    pub async fn prime_registry(&self, registry: &ShardRegistry) {
        match self.fetch_shards().await {
            Ok(shards) => {
                let count = shards.len();
                registry.replace_all(shards);
                info!(target: "l2-router", shards = count, "shard registry primed from L1");
            }
            Err(e) => {
                warn!(target: "l2-router", error = %e, "failed to prime shard registry; forwarding degrades to local handling");
            }
        }
    }
}
