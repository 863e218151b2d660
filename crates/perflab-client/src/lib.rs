//! Message-passing facades over the collector and requester control APIs.
//!
//! The dashboard holds one client per remote service, keyed by host name.
//! Clients never own remote state; they translate lifecycle verbs into
//! HTTP calls and surface the wire error envelope as [`ClientError`].

mod collector;
mod error;
mod requester;

pub use collector::CollectorClient;
pub use error::{ClientError, ClientResult};
pub use requester::RequesterClient;

use serde::Deserialize;

/// Snapshot of a remote service's `GET /status` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: String,
    #[serde(default)]
    pub current_experiment_id: Option<String>,
}

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
