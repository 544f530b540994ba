//! Tracker against a live HTTP server.
//!
//! One axum server hosts several fake tracking endpoints under different
//! path prefixes, so failover and chunking run through the real transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use xbridge_sdk::{
    Address, BridgeError, Direction, OperationId, OperationTracker, SimplifiedStatus, TrackerConfig,
    TransactionLinker,
};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
struct Recorded {
    chunk_sizes: Arc<Mutex<Vec<usize>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "down")
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn operation_id(
    State(recorded): State<Recorded>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorded.queries.lock().unwrap().push(query);
    Json(json!({ "response": "op-123" }))
}

async fn unknown_operation_id() -> Json<Value> {
    Json(json!({ "response": "" }))
}

async fn status() -> Json<Value> {
    Json(json!({ "response": "EVMMerkleMessageExecuted" }))
}

/// Answers only for ids whose numeric suffix is even.
async fn statuses(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    let ids: Vec<String> = serde_json::from_value(body["operationIds"].clone()).unwrap_or_default();
    recorded.chunk_sizes.lock().unwrap().push(ids.len());
    let known: serde_json::Map<String, Value> = ids
        .into_iter()
        .filter(|id| {
            let n = id.trim_start_matches("op-").parse::<u32>();
            n.map(|n| n % 2 == 0).unwrap_or(false)
        })
        .map(|id| {
            (
                id,
                json!({ "stage": "executedInEVM", "success": true, "timestamp": 1_700_000_500u64 }),
            )
        })
        .collect();
    Json(json!({ "response": known }))
}

async fn profiling(Json(body): Json<Value>) -> Json<Value> {
    let first = body["operationIds"][0].as_str().unwrap_or_default().to_string();
    let mut response = serde_json::Map::new();
    response.insert(
        first,
        json!({
            "operationType": "TVM_EVM",
            "collectedInTVM": { "exists": true, "stageData": { "success": true, "timestamp": 1 } },
            "executedInEVM": {
                "exists": true,
                "stageData": {
                    "success": false,
                    "timestamp": 2,
                    "note": { "content": "reverted", "errorName": "EVMCallFailed" }
                }
            }
        }),
    );
    Json(json!({ "response": response }))
}

async fn spawn_server(recorded: Recorded) -> String {
    let app = Router::new()
        .route("/a/operationId", get(unavailable))
        .route("/b/operationId", get(broken))
        .route("/c/operationId", get(operation_id))
        .route("/c/status", get(status))
        .route("/c/statusesByOperationIds", post(statuses))
        .route("/c/stageProfiling", post(profiling))
        .route("/empty/operationId", get(unknown_operation_id))
        .with_state(recorded);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn tracker(base: &str, prefixes: &[&str]) -> OperationTracker {
    let endpoints = prefixes.iter().map(|p| format!("{}/{}", base, p)).collect();
    OperationTracker::new(TrackerConfig::with_endpoints(endpoints).unwrap()).unwrap()
}

fn linker() -> TransactionLinker {
    TransactionLinker::new(&Address::new(0, [0x42; 32]), 1, "1700000777", 1_700_000_000)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILOVER
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_third_endpoint_answers_after_two_failures() {
    let recorded = Recorded::default();
    let base = spawn_server(recorded.clone()).await;
    let tracker = tracker(&base, &["a", "b", "c"]);

    let id = tracker.get_operation_id(&linker()).await.unwrap();
    assert_eq!(id, Some(OperationId::from("op-123")));

    let queries = recorded.queries.lock().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["shardedId"], "1700000777");
    assert_eq!(queries[0]["shardCount"], "1");
    assert_eq!(queries[0]["timestamp"], "1700000000");
    assert_eq!(queries[0]["caller"], Address::new(0, [0x42; 32]).to_raw());
}

#[tokio::test]
async fn test_every_endpoint_failing_is_reported() {
    let base = spawn_server(Recorded::default()).await;
    let tracker = tracker(&base, &["a", "b"]);

    match tracker.get_operation_id(&linker()).await {
        Err(BridgeError::AllEndpointsFailed { attempted, .. }) => assert_eq!(attempted, 2),
        other => panic!("expected AllEndpointsFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_operation_id_maps_to_not_found() {
    let base = spawn_server(Recorded::default()).await;
    let tracker = tracker(&base, &["empty"]);

    assert_eq!(tracker.get_operation_id(&linker()).await.unwrap(), None);
    assert_eq!(
        tracker.simplified_status(&linker(), Direction::Forward).await.unwrap(),
        SimplifiedStatus::OperationIdNotFound
    );
}

#[tokio::test]
async fn test_forward_operation_reaches_success() {
    let base = spawn_server(Recorded::default()).await;
    let tracker = tracker(&base, &["a", "c"]);

    assert_eq!(
        tracker.simplified_status(&linker(), Direction::Forward).await.unwrap(),
        SimplifiedStatus::Successful
    );
    assert_eq!(
        tracker.simplified_status(&linker(), Direction::Reverse).await.unwrap(),
        SimplifiedStatus::Pending
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_chunked_statuses_keep_input_cardinality() {
    let recorded = Recorded::default();
    let base = spawn_server(recorded.clone()).await;
    let mut config = TrackerConfig::with_endpoints(vec![format!("{}/c", base)]).unwrap();
    config.chunk_size = 4;
    config.chunk_delay_ms = 1;
    let tracker = OperationTracker::new(config).unwrap();

    let ids: Vec<OperationId> = (0..10)
        .map(|i| OperationId::from(format!("op-{}", i).as_str()))
        .collect();
    let statuses = tracker.get_statuses_by_operation_ids(&ids).await.unwrap();

    assert_eq!(statuses.len(), 10);
    for (i, id) in ids.iter().enumerate() {
        let entry = &statuses[id];
        if i % 2 == 0 {
            assert_eq!(entry.as_ref().unwrap().stage, "executedInEVM");
        } else {
            assert!(entry.is_none());
        }
    }
    assert_eq!(*recorded.chunk_sizes.lock().unwrap(), vec![4, 4, 2]);
}

#[tokio::test]
async fn test_stage_profiling_exposes_failed_stage() {
    let base = spawn_server(Recorded::default()).await;
    let tracker = tracker(&base, &["c"]);

    let ids = vec![OperationId::from("op-7"), OperationId::from("op-8")];
    let profiles = tracker.get_stage_profilings(&ids).await.unwrap();

    assert_eq!(profiles.len(), 2);
    let stages = profiles[&ids[0]].as_ref().unwrap();
    assert_eq!(stages.first_failure(), Some("executedInEVM"));
    let note = stages.executed_in_evm.stage_data.as_ref().unwrap().note.as_ref().unwrap();
    assert_eq!(note.error_name, "EVMCallFailed");
    assert!(profiles[&ids[1]].is_none());
}
