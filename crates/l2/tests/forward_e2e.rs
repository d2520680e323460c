//! Cross-shard routing: header preflight, transparent forwarding, and
//! exact-match termination.

use provena_l2::forward::{ForwardCtx, CLIENT_GROUP_HEADER};
use provena_l2::http::{router, L2State, ShardIdentity};
use provena_l2::l1_client::L1Client;
use provena_l2::store::SessionStore;
use provena_test_utils::MemSessionStore;
use provena_types::shard::{Shard, ShardRegistry, ShardStatus};
use serde_json::{json, Value};
use std::sync::Arc;

struct TestShard {
    base: String,
    store: Arc<MemSessionStore>,
}

async fn spawn_shard(shard_id: &str, group: &str, registry: ShardRegistry) -> TestShard {
    let store = Arc::new(MemSessionStore::new());
    let state = L2State {
        store: store.clone(),
        // The L1 is never reached by these tests.
        l1: Arc::new(L1Client::new("http://127.0.0.1:9").unwrap()),
        identity: ShardIdentity {
            shard_id: shard_id.to_string(),
            client_group: group.to_string(),
            l2_node_id: format!("{}-node", shard_id),
        },
    };
    let forward = ForwardCtx::new(group.to_string(), registry).unwrap();
    let app = router(state, forward);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestShard {
        base: format!("http://{}", addr),
        store,
    }
}

/// Two shards sharing one registry view of each other.
async fn spawn_pair() -> (TestShard, TestShard) {
    let registry = ShardRegistry::new();
    let shard_a = spawn_shard("shard-a", "group-a", registry.clone()).await;
    let shard_b = spawn_shard("shard-b", "group-b", registry.clone()).await;
    registry.replace_all(vec![
        Shard {
            shard_id: "shard-a".to_string(),
            client_group: "group-a".to_string(),
            l2_endpoint: shard_a.base.clone(),
            status: ShardStatus::Active,
        },
        Shard {
            shard_id: "shard-b".to_string(),
            client_group: "group-b".to_string(),
            l2_endpoint: shard_b.base.clone(),
            status: ShardStatus::Active,
        },
    ]);
    (shard_a, shard_b)
}

#[tokio::test]
async fn mis_addressed_request_is_forwarded_to_the_owning_shard() {
    let (shard_a, shard_b) = spawn_pair().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", shard_a.base))
        .header(CLIENT_GROUP_HEADER, "group-b")
        .json(&json!({ "operator_id": "OPR-007" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    let session_id = body["session"]["session_id"].as_str().unwrap();
    assert!(session_id.starts_with("SES-"));

    // The owning shard recorded the session; the forwarder recorded nothing.
    assert_eq!(shard_b.store.session_count(), 1);
    assert_eq!(shard_a.store.session_count(), 0);
    assert!(shard_b.store.get_session(session_id).await.is_ok());
}

#[tokio::test]
async fn exact_group_match_is_handled_locally() {
    let (shard_a, shard_b) = spawn_pair().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", shard_a.base))
        .header(CLIENT_GROUP_HEADER, "group-a")
        .json(&json!({ "operator_id": "OPR-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(shard_a.store.session_count(), 1);
    assert_eq!(shard_b.store.session_count(), 0);
}

#[tokio::test]
async fn missing_or_unknown_group_is_handled_locally() {
    let (shard_a, shard_b) = spawn_pair().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", shard_a.base))
        .json(&json!({ "operator_id": "OPR-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(format!("{}/session/start", shard_a.base))
        .header(CLIENT_GROUP_HEADER, "group-zz")
        .json(&json!({ "operator_id": "OPR-002" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(shard_a.store.session_count(), 2);
    assert_eq!(shard_b.store.session_count(), 0);
}

#[tokio::test]
async fn forwarded_error_statuses_are_relayed_verbatim() {
    let (shard_a, shard_b) = spawn_pair().await;
    let client = reqwest::Client::new();

    // The owning shard has no such session; its 404 comes back through the
    // forwarder untouched.
    let response = client
        .get(format!("{}/session/SES-missing", shard_a.base))
        .header(CLIENT_GROUP_HEADER, "group-b")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("SES-missing"));
    assert_eq!(shard_b.store.session_count(), 0);
}

#[tokio::test]
async fn unreachable_peer_shard_maps_to_bad_gateway() {
    let registry = ShardRegistry::new();
    let shard_a = spawn_shard("shard-a", "group-a", registry.clone()).await;
    registry.replace_all(vec![
        Shard {
            shard_id: "shard-a".to_string(),
            client_group: "group-a".to_string(),
            l2_endpoint: shard_a.base.clone(),
            status: ShardStatus::Active,
        },
        Shard {
            shard_id: "shard-b".to_string(),
            client_group: "group-b".to_string(),
            // Nothing listens here.
            l2_endpoint: "http://127.0.0.1:9".to_string(),
            status: ShardStatus::Active,
        },
    ]);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", shard_a.base))
        .header(CLIENT_GROUP_HEADER, "group-b")
        .json(&json!({ "operator_id": "OPR-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    assert_eq!(shard_a.store.session_count(), 0);
}
