//! Dashboard-specific routes: experiment groups and the hosts probe.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use perflab_core::{ExperimentGroup, GroupConfig};
use perflab_runtime::{ApiError, StoredExperiment};

use crate::groups::GroupController;
use crate::orchestrator::HostClients;

/// Budget for one `GET /status` probe against a remote service.
pub const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// State behind the dashboard-specific routes.
pub struct DashboardState {
    pub controller: Arc<GroupController>,
    pub clients: Arc<HostClients>,
}

/// Builds the group and hosts-probe router.
pub fn dashboard_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/groups", post(start_group).get(list_groups))
        .route("/groups/:id", get(get_group))
        .route("/groups/:id/resume", post(resume_group))
        .route("/hosts/status", get(hosts_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGroupRequest {
    pub group_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub config: GroupConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupLifecycleResponse {
    pub group_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupListResponse {
    pub groups: Vec<StoredExperiment>,
    pub total: usize,
}

/// One entry of the hosts-status probe. Unreachable services degrade to
/// an `Error` entry instead of failing the whole response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProbe {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostsStatusResponse {
    pub targets: BTreeMap<String, HostProbe>,
    pub client: HostProbe,
}

async fn start_group(
    State(state): State<Arc<DashboardState>>,
    Json(request): Json<StartGroupRequest>,
) -> Result<Json<GroupLifecycleResponse>, ApiError> {
    state
        .controller
        .start_group(&request.group_id, request.description, request.config)
        .await?;
    Ok(Json(GroupLifecycleResponse {
        group_id: request.group_id,
        status: "started".to_string(),
        timestamp: Utc::now(),
        message: "experiment group started".to_string(),
    }))
}

async fn resume_group(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Result<Json<GroupLifecycleResponse>, ApiError> {
    state.controller.resume_group(&id).await?;
    Ok(Json(GroupLifecycleResponse {
        group_id: id,
        status: "resumed".to_string(),
        timestamp: Utc::now(),
        message: "experiment group resumed".to_string(),
    }))
}

async fn list_groups(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<GroupListResponse>, ApiError> {
    let groups = state.controller.list_groups().await?;
    let total = groups.len();
    Ok(Json(GroupListResponse { groups, total }))
}

async fn get_group(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Result<Json<ExperimentGroup>, ApiError> {
    Ok(Json(state.controller.get_group(&id).await?))
}

async fn hosts_status(State(state): State<Arc<DashboardState>>) -> Json<HostsStatusResponse> {
    let probes = state.clients.collectors.values().map(|client| async move {
        let probe = match client.get_status(STATUS_PROBE_TIMEOUT).await {
            Ok(snapshot) => HostProbe {
                status: snapshot.status,
                current_experiment_id: snapshot.current_experiment_id,
                error: None,
            },
            Err(err) => HostProbe {
                status: "Error".to_string(),
                current_experiment_id: None,
                error: Some(err.to_string()),
            },
        };
        (client.host_name().to_string(), probe)
    });
    let client_probe = async {
        match state.clients.requester.get_status(STATUS_PROBE_TIMEOUT).await {
            Ok(snapshot) => HostProbe {
                status: snapshot.status,
                current_experiment_id: snapshot.current_experiment_id,
                error: None,
            },
            Err(err) => HostProbe {
                status: "Error".to_string(),
                current_experiment_id: None,
                error: Some(err.to_string()),
            },
        }
    };

    let (targets, client) = tokio::join!(join_all(probes), client_probe);
    Json(HostsStatusResponse {
        targets: targets.into_iter().collect(),
        client,
    })
}
