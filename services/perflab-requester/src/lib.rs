//! HTTP load generator service.
//!
//! Issues rate-limited POSTs against a target calculator endpoint across
//! a fixed pool of worker pairs (scheduler + sender), aggregates
//! per-worker statistics lock-free and persists the merged result
//! through the shared experiment runtime.

pub mod config;
pub mod generator;
pub mod stats;
pub mod transport;

pub use config::RequesterConfig;
pub use generator::{LoadGenerator, RequestParams, QUEUE_CAPACITY, WORKER_COUNT};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use perflab_core::{CoreError, CoreResult};
use perflab_runtime::{lifecycle_router, ApiState, ExperimentManager, FileStorage};

/// Boots the requester service.
///
/// # Errors
///
/// Returns `CoreError` when configuration, storage or the listener fail
/// to initialise.
pub async fn run_server() -> CoreResult<()> {
    let config = RequesterConfig::from_env()?;
    let storage = FileStorage::init(&config.storage_path).await?;
    let generator = LoadGenerator::new(config.clone());
    let manager = Arc::new(ExperimentManager::new(generator, storage));
    let state = Arc::new(ApiState::new(manager, serde_json::to_value(&config)?));

    let app = perflab_runtime::api::with_request_tracing(lifecycle_router(state));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| CoreError::validation(format!("invalid listen address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        target = %format!("{}:{}", config.target_ip, config.target_port),
        mode = ?config.connection_mode,
        "requester service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CoreError::internal(format!("server error: {e}")))?;

    info!("requester service shutdown complete");
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
