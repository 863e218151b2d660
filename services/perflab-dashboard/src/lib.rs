//! Dashboard service: orchestrates collectors and the requester for
//! single experiments and QPS-sweep experiment groups.
//!
//! The orchestrator is itself an experiment-runtime instance whose
//! payload is the composite [`perflab_core::ExperimentData`]; the group
//! controller drives that runtime sequentially across a rate sweep.

pub mod config;
pub mod groups;
pub mod handlers;
pub mod orchestrator;
pub mod stats;

pub use config::DashboardConfig;
pub use groups::GroupController;
pub use handlers::{dashboard_router, DashboardState};
pub use orchestrator::{HostClients, Orchestration, OrchestrationParams};

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use perflab_core::{CoreError, CoreResult, HostsConfig};
use perflab_runtime::{lifecycle_router, ApiState, ExperimentManager, FileStorage};

/// Boots the dashboard service.
///
/// # Errors
///
/// Returns `CoreError` when configuration, the host inventory, storage
/// or the listener fail to initialise.
pub async fn run_server() -> CoreResult<()> {
    let config = DashboardConfig::from_env()?;
    let hosts = HostsConfig::load()?;

    let clients = Arc::new(HostClients::from_config(hosts.clone()));
    let orchestration = Orchestration::new(Arc::clone(&clients), config.default_qps);

    let experiment_store = FileStorage::init(&config.storage_path).await?;
    let group_store = FileStorage::init(config.storage_path.join("groups")).await?;

    let manager = Arc::new(ExperimentManager::new(orchestration, experiment_store));
    let controller = Arc::new(GroupController::new(
        Arc::clone(&manager),
        group_store,
        hosts.clone(),
    ));

    let api_state = Arc::new(ApiState::new(
        Arc::clone(&manager),
        json!({"dashboard": &config, "hosts": &hosts}),
    ));
    let dashboard_state = Arc::new(DashboardState {
        controller,
        clients,
    });

    let app = perflab_runtime::api::with_request_tracing(
        lifecycle_router(api_state).merge(dashboard_router(dashboard_state)),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| CoreError::validation(format!("invalid listen address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, targets = hosts.target_hosts.len(), "dashboard service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CoreError::internal(format!("server error: {e}")))?;

    info!("dashboard service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
