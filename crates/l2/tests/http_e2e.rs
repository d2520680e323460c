//! Full workflow over HTTP against a live shard router, with a stub L1
//! behind the commit endpoint.

use axum::{http::StatusCode, response::IntoResponse, routing::get, routing::post, Json, Router};
use provena_l2::forward::ForwardCtx;
use provena_l2::http::{router, L2State, ShardIdentity};
use provena_l2::l1_client::L1Client;
use provena_l2::store::SessionStore;
use provena_test_utils::{fixtures, MemSessionStore};
use provena_types::shard::ShardRegistry;
use serde_json::{json, Value};
use std::sync::Arc;

async fn spawn_stub_l1() -> String {
    async fn commit(Json(body): Json<Value>) -> impl IntoResponse {
        let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
        (
            StatusCode::ACCEPTED,
            Json(json!({
                "data": {
                    "message": "session committed to the ledger",
                    "tx_hash": "1f".repeat(32),
                    "session_id": session_id,
                    "shard_id": body["shard_id"],
                    "block_height": 1,
                },
                "meta": { "tx_id": "", "status": "committed", "block_height": 1 },
                "node_id": "l1-stub",
            })),
        )
    }
    async fn shards() -> impl IntoResponse {
        Json(json!({
            "data": { "shards": [], "count": 0 },
            "meta": { "status": "processed" },
            "node_id": "l1-stub",
        }))
    }

    let app = Router::new()
        .route("/l1/commit", post(commit))
        .route("/l1/shards", get(shards));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_shard(store: Arc<dyn SessionStore>, l1_endpoint: &str) -> String {
    let state = L2State {
        store,
        l1: Arc::new(L1Client::new(l1_endpoint).unwrap()),
        identity: ShardIdentity {
            shard_id: "shard-a".to_string(),
            client_group: "group-a".to_string(),
            l2_node_id: "shard-a-node".to_string(),
        },
    };
    let forward = ForwardCtx::new("group-a".to_string(), ShardRegistry::new()).unwrap();
    let app = router(state, forward);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn run_through_label(client: &reqwest::Client, base: &str) -> String {
    let body: Value = client
        .post(format!("{}/session/start", base))
        .json(&json!({ "operator_id": "OPR-001" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session"]["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("SES-"));

    let response = client
        .post(format!("{}/session/{}/scan", base, session_id))
        .json(&json!({ "package_id": "PKG-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(format!("{}/session/{}/validate", base, session_id))
        .json(&json!({ "package_id": "PKG-001", "signature": "sig_acme_electronics_001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(format!("{}/session/{}/qc", base, session_id))
        .json(&json!({ "passed": true, "issues": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = client
        .post(format!("{}/session/{}/label", base, session_id))
        .json(&json!({ "courier_id": "CUR-001" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"]["status"], "completed");
    assert!(body["label"]["tracking_no"]
        .as_str()
        .unwrap()
        .starts_with("TRK-"));

    session_id
}

#[tokio::test]
async fn full_workflow_commits_through_the_l1() {
    let l1 = spawn_stub_l1().await;
    let store = Arc::new(MemSessionStore::new());
    fixtures::seed_reference_data(store.as_ref()).await;
    let base = spawn_shard(store.clone(), &l1).await;
    let client = reqwest::Client::new();

    let session_id = run_through_label(&client, &base).await;

    let response = client
        .post(format!("{}/session/{}/commit", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "committed");
    assert_eq!(body["l1_tx_hash"], "1f".repeat(32));
    assert!(body["l1_block_height"].as_i64().unwrap() >= 1);

    // Re-commit is a conflict and changes nothing.
    let response = client
        .post(format!("{}/session/{}/commit", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let body: Value = client
        .get(format!("{}/session/{}", base, session_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"]["status"], "committed");
    assert_eq!(body["session"]["is_committed"], true);
}

#[tokio::test]
async fn commit_before_completion_is_a_precondition_failure() {
    let l1 = spawn_stub_l1().await;
    let store = Arc::new(MemSessionStore::new());
    fixtures::seed_reference_data(store.as_ref()).await;
    let base = spawn_shard(store.clone(), &l1).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/session/start", base))
        .json(&json!({ "operator_id": "OPR-001" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session"]["session_id"].as_str().unwrap();

    let response = client
        .post(format!("{}/session/{}/commit", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not completed"));
}

#[tokio::test]
async fn unreachable_l1_leaves_the_session_completed_and_retryable() {
    // Nothing listens on this endpoint.
    let dead_l1 = "http://127.0.0.1:9".to_string();
    let store = Arc::new(MemSessionStore::new());
    fixtures::seed_reference_data(store.as_ref()).await;
    let base = spawn_shard(store.clone(), &dead_l1).await;
    let client = reqwest::Client::new();

    let session_id = run_through_label(&client, &base).await;

    let response = client
        .post(format!("{}/session/{}/commit", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);

    // No partial state: still completed, not committed.
    let session = store.get_session(&session_id).await.unwrap();
    assert_eq!(session.status.as_str(), "completed");
    assert!(!session.is_committed);

    // With the L1 back, the same session commits cleanly.
    let l1 = spawn_stub_l1().await;
    let retry_base = spawn_shard(store.clone(), &l1).await;
    let response = client
        .post(format!("{}/session/{}/commit", retry_base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn info_and_unknown_routes() {
    let l1 = spawn_stub_l1().await;
    let store = Arc::new(MemSessionStore::new());
    let base = spawn_shard(store, &l1).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/info", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["shard_id"], "shard-a");
    assert_eq!(body["client_group"], "group-a");
    assert_eq!(body["status"], "active");

    let response = client
        .get(format!("{}/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = client
        .get(format!("{}/session/SES-missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
