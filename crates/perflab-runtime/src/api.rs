//! Shared lifecycle HTTP surface.
//!
//! Every service exposes the same verbs: `POST /experiments`,
//! `DELETE /experiments/:id`, `GET /experiments/:id`, `GET /experiments`,
//! `GET /status`, `GET /config` and `GET /health`. The router is generic
//! over the service's [`Collect`] capability; services merge their own
//! extra routes on top.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info_span};
use uuid::Uuid;

use perflab_core::{CoreError, Experiment, ServiceStatus};

use crate::manager::{Collect, ExperimentManager};
use crate::storage::StoredExperiment;

/// Body of `POST /experiments`. Optional fields apply only to some
/// services; each service's [`Collect::make_params`] picks what it needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub experiment_id: String,
    /// Experiment duration in seconds.
    pub timeout: u64,
    #[serde(default)]
    pub qps: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    /// Metric sampling interval in seconds (collector only).
    #[serde(default)]
    pub collection_interval: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResponse {
    pub experiment_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_experiment_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since service start.
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub experiments: Vec<StoredExperiment>,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Wire error envelope: `{error, message, timestamp, experimentId?}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

/// API-level errors, each carrying its wire code and HTTP status.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    ExperimentExists(String),
    ExperimentNotFound(String),
    ExperimentRunning(String),
    NoExperimentRunning,
    ExperimentAlreadyStopped(String),
    ServiceBusy(String),
    GroupNotFound(String),
    GroupAlreadyCompleted(String),
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::ExperimentExists(_) => "experiment_exists",
            Self::ExperimentNotFound(_) => "experiment_not_found",
            Self::ExperimentRunning(_) => "experiment_running",
            Self::NoExperimentRunning => "no_experiment_running",
            Self::ExperimentAlreadyStopped(_) => "experiment_already_stopped",
            Self::ServiceBusy(_) => "service_busy",
            Self::GroupNotFound(_) => "group_not_found",
            Self::GroupAlreadyCompleted(_) => "group_already_completed",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ExperimentNotFound(_) | Self::GroupNotFound(_) => StatusCode::NOT_FOUND,
            Self::ExperimentExists(_)
            | Self::ExperimentRunning(_)
            | Self::NoExperimentRunning
            | Self::ExperimentAlreadyStopped(_)
            | Self::ServiceBusy(_)
            | Self::GroupAlreadyCompleted(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn experiment_id(&self) -> Option<String> {
        match self {
            Self::ExperimentExists(id)
            | Self::ExperimentNotFound(id)
            | Self::ExperimentRunning(id)
            | Self::ExperimentAlreadyStopped(id) => Some(id.clone()),
            _ => None,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::InvalidRequest(msg) | Self::ServiceBusy(msg) | Self::Internal(msg) => msg.clone(),
            Self::ExperimentExists(id) => format!("experiment `{id}` already exists"),
            Self::ExperimentNotFound(id) => format!("experiment `{id}` was not found"),
            Self::ExperimentRunning(id) => format!("experiment `{id}` is already running"),
            Self::NoExperimentRunning => "no experiment is running".to_string(),
            Self::ExperimentAlreadyStopped(id) => {
                format!("experiment `{id}` has already stopped")
            }
            Self::GroupNotFound(id) => format!("group `{id}` was not found"),
            Self::GroupAlreadyCompleted(id) => format!("group `{id}` has already completed"),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity: "group", id } => Self::GroupNotFound(id),
            CoreError::NotFound { id, .. } => Self::ExperimentNotFound(id),
            CoreError::AlreadyExists { id, .. } => Self::ExperimentExists(id),
            CoreError::AlreadyRunning { id } => Self::ExperimentRunning(id),
            CoreError::NotRunning => Self::NoExperimentRunning,
            CoreError::Validation(msg) => Self::InvalidRequest(msg),
            CoreError::InvalidState { message } => Self::ServiceBusy(message),
            other => {
                error!(error = %other, "internal error surfaced to API");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.message(),
            timestamp: Utc::now(),
            experiment_id: self.experiment_id(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Shared state behind the lifecycle routes.
pub struct ApiState<C: Collect> {
    pub manager: Arc<ExperimentManager<C>>,
    config_snapshot: serde_json::Value,
    started_at: Instant,
}

impl<C: Collect> ApiState<C> {
    #[must_use]
    pub fn new(manager: Arc<ExperimentManager<C>>, config_snapshot: serde_json::Value) -> Self {
        Self {
            manager,
            config_snapshot,
            started_at: Instant::now(),
        }
    }
}

/// Builds the lifecycle router for one service.
pub fn lifecycle_router<C: Collect>(state: Arc<ApiState<C>>) -> Router {
    Router::new()
        .route(
            "/experiments",
            get(list_experiments::<C>).post(start_experiment::<C>),
        )
        .route(
            "/experiments/:id",
            get(get_experiment::<C>).delete(stop_experiment::<C>),
        )
        .route("/status", get(service_status::<C>))
        .route("/config", get(service_config::<C>))
        .route("/health", get(health::<C>))
        .with_state(state)
}

/// Wraps a router with per-request tracing spans carrying a request ID.
pub fn with_request_tracing(router: Router) -> Router {
    router.layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!(
            "http_request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            uri = %request.uri(),
        )
    }))
}

async fn start_experiment<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    let params = state.manager.collector().make_params(&request)?;
    state
        .manager
        .start(
            &request.experiment_id,
            request.timeout,
            request.description.clone(),
            params,
        )
        .await?;

    Ok(Json(LifecycleResponse {
        experiment_id: request.experiment_id,
        status: "started".to_string(),
        timestamp: Utc::now(),
        message: format!("experiment started for {}s", request.timeout),
    }))
}

async fn stop_experiment<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    match state.manager.current_id().await {
        Some(current) if current == id => {
            state.manager.stop().await?;
            Ok(Json(LifecycleResponse {
                experiment_id: id,
                status: "stopped".to_string(),
                timestamp: Utc::now(),
                message: "experiment stopped".to_string(),
            }))
        }
        _ if state.manager.exists(&id).await => Err(ApiError::ExperimentAlreadyStopped(id)),
        _ => Err(ApiError::ExperimentNotFound(id)),
    }
}

async fn get_experiment<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
    Path(id): Path<String>,
) -> Result<Json<Experiment<C::Payload>>, ApiError> {
    Ok(Json(state.manager.get(&id).await?))
}

async fn list_experiments<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let all = state.manager.list().await?;
    let total = all.len();
    let experiments: Vec<_> = all
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();
    let has_more = query.offset + experiments.len() < total;
    Ok(Json(ListResponse {
        experiments,
        total,
        has_more,
    }))
}

async fn service_status<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
) -> Json<StatusResponse> {
    let status = state.manager.status().await;
    let current_experiment_id = match status {
        ServiceStatus::Running => state.manager.current_id().await,
        ServiceStatus::Pending => None,
    };
    Json(StatusResponse {
        status: status.as_str().to_string(),
        current_experiment_id,
    })
}

async fn service_config<C: Collect>(
    State(state): State<Arc<ApiState<C>>>,
) -> Json<serde_json::Value> {
    Json(state.config_snapshot.clone())
}

async fn health<C: Collect>(State(state): State<Arc<ApiState<C>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
