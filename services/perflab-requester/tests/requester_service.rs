//! Requester service tests over the wire, driven through the dashboard's
//! control client against a stub calculator target.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use perflab_client::{ClientError, RequesterClient};
use perflab_requester::{LoadGenerator, RequesterConfig};
use perflab_runtime::{lifecycle_router, ApiState, ExperimentManager, FileStorage};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_calculator() -> SocketAddr {
    let app = Router::new().route(
        "/calculate",
        post(|| async { Json(json!({"gcd": 24, "process_time": 0.5})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_service(dir: &std::path::Path, target: SocketAddr) -> SocketAddr {
    let config = RequesterConfig {
        storage_path: dir.to_path_buf(),
        target_ip: target.ip().to_string(),
        target_port: target.port(),
        default_qps: 20,
        ..RequesterConfig::default()
    };
    let storage = FileStorage::init(&config.storage_path).await.unwrap();
    let manager = Arc::new(ExperimentManager::new(LoadGenerator::new(config), storage));
    let state = Arc::new(ApiState::new(manager, json!({"service": "requester"})));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, lifecycle_router(state)).await.unwrap();
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_generate_stop_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let calculator = spawn_calculator().await;
    let addr = spawn_service(dir.path(), calculator).await;
    let client = RequesterClient::new(format!("http://{addr}"));

    client
        .start_experiment("req-1", 60, 100, CALL_TIMEOUT)
        .await
        .unwrap();

    let status = client.get_status(CALL_TIMEOUT).await.unwrap();
    assert_eq!(status.status, "Running");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    client.stop_experiment("req-1", CALL_TIMEOUT).await.unwrap();

    let record = client.fetch_result("req-1", CALL_TIMEOUT).await.unwrap();
    let data = record.data;

    assert!(data.total_requests > 0);
    assert_eq!(data.total_requests, data.success_count + data.failure_count);
    assert_eq!(data.failure_count, 0);
    assert_eq!(data.config.qps, 100);
    assert_eq!(data.config.target_port, calculator.port());

    let stats = &data.stats;
    assert!(stats.actual_qps > 0.0);
    assert!(stats.min_latency_ms <= stats.p50_latency_ms);
    assert!(stats.p50_latency_ms <= stats.p90_latency_ms);
    assert!(stats.p90_latency_ms <= stats.p95_latency_ms);
    assert!(stats.p95_latency_ms <= stats.p99_latency_ms);
    assert!(stats.p99_latency_ms <= stats.max_latency_ms);
    assert_eq!(stats.error_rate_percent, 0.0);
    let bucket_sum: u64 = stats.latency_buckets.iter().map(|b| b.count).sum();
    assert_eq!(bucket_sum, data.success_count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_qps_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let calculator = spawn_calculator().await;
    let addr = spawn_service(dir.path(), calculator).await;
    let client = RequesterClient::new(format!("http://{addr}"));

    let err = client
        .start_experiment("req-bad", 10, 0, CALL_TIMEOUT)
        .await
        .unwrap_err();
    match err {
        ClientError::Service { code, status, .. } => {
            assert_eq!(code, "invalid_request");
            assert_eq!(status, 400);
        }
        other => panic!("expected service error, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_id_cannot_be_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let calculator = spawn_calculator().await;
    let addr = spawn_service(dir.path(), calculator).await;
    let client = RequesterClient::new(format!("http://{addr}"));

    client
        .start_experiment("req-2", 60, 50, CALL_TIMEOUT)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    client.stop_experiment("req-2", CALL_TIMEOUT).await.unwrap();

    let err = client
        .start_experiment("req-2", 60, 50, CALL_TIMEOUT)
        .await
        .unwrap_err();
    match err {
        ClientError::Service { code, status, .. } => {
            assert_eq!(code, "experiment_exists");
            assert_eq!(status, 409);
        }
        other => panic!("expected service error, got {other}"),
    }
}
