//! End-to-end tests of the shared lifecycle HTTP surface against an
//! in-process router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use perflab_core::CoreResult;
use perflab_runtime::{
    lifecycle_router, ApiState, Collect, ExperimentManager, FileStorage, RunContext, StartRequest,
};

/// Collector that idles until its scope ends, then reports elapsed ticks.
struct TickUntilDone;

#[async_trait]
impl Collect for TickUntilDone {
    type Payload = u64;
    type Params = ();

    fn make_params(&self, _request: &StartRequest) -> CoreResult<()> {
        Ok(())
    }

    async fn collect(&self, ctx: RunContext, _params: ()) -> CoreResult<u64> {
        let mut ticks = 0;
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        interval.tick().await;
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(ticks),
                _ = interval.tick() => ticks += 1,
            }
        }
    }
}

async fn router() -> (tempfile::TempDir, axum::Router) {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::init(dir.path()).await.unwrap();
    let manager = Arc::new(ExperimentManager::new(TickUntilDone, storage));
    let state = Arc::new(ApiState::new(manager, json!({"service": "test"})));
    (dir, lifecycle_router(state))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn start_status_stop_round_trip() {
    let (_dir, app) = router().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/experiments",
            json!({"experimentId": "exp-1", "timeout": 60}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "started");
    assert_eq!(body["experimentId"], "exp-1");

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/status"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "Running");
    assert_eq!(body["currentExperimentId"], "exp-1");

    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/experiments/exp-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "stopped");

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/experiments/exp-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "exp-1");
    assert!(body["endTime"].is_string());
}

#[tokio::test]
async fn duplicate_start_conflicts_running_then_exists() {
    let (_dir, app) = router().await;

    let start = json!({"experimentId": "exp-dup", "timeout": 60});
    let response = app.clone().oneshot(post_json("/experiments", start.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Second start while the first is live.
    let response = app.clone().oneshot(post_json("/experiments", start.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "experiment_running");

    // Stop, then start the same ID again: the persisted file blocks reuse.
    app.clone()
        .oneshot(request(Method::DELETE, "/experiments/exp-dup"))
        .await
        .unwrap();
    let response = app.clone().oneshot(post_json("/experiments", start)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "experiment_exists");
    assert_eq!(body["experimentId"], "exp-dup");
}

#[tokio::test]
async fn stop_is_idempotent_with_distinct_codes() {
    let (_dir, app) = router().await;

    // Unknown ID.
    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/experiments/ghost"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "experiment_not_found");

    // Completed ID.
    app.clone()
        .oneshot(post_json(
            "/experiments",
            json!({"experimentId": "exp-s", "timeout": 60}),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(Method::DELETE, "/experiments/exp-s"))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/experiments/exp-s"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "experiment_already_stopped");
}

#[tokio::test]
async fn invalid_id_is_a_bad_request() {
    let (_dir, app) = router().await;

    let response = app
        .oneshot(post_json(
            "/experiments",
            json!({"experimentId": "Not-Valid!", "timeout": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn list_pages_through_persisted_experiments() {
    let (_dir, app) = router().await;

    for id in ["exp-l1", "exp-l2", "exp-l3"] {
        app.clone()
            .oneshot(post_json(
                "/experiments",
                json!({"experimentId": id, "timeout": 60}),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(request(Method::DELETE, &format!("/experiments/{id}")))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/experiments?limit=2"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["experiments"].as_array().unwrap().len(), 2);
    assert_eq!(body["hasMore"], true);

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/experiments?limit=2&offset=2"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["experiments"].as_array().unwrap().len(), 1);
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn health_and_config_report_service_state() {
    let (_dir, app) = router().await;

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");

    let response = app
        .oneshot(request(Method::GET, "/config"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["service"], "test");
}
