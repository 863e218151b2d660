use std::time::Duration;

use serde_json::json;
use tracing::debug;

use perflab_core::{Experiment, MetricsData};

use crate::error::{error_from_response, ClientResult};
use crate::{build_http_client, join_url, StatusSnapshot};

/// Handle to one target host's metric collector service.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    host_name: String,
    base_url: String,
    http: reqwest::Client,
}

impl CollectorClient {
    #[must_use]
    pub fn new(host_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            base_url: base_url.into(),
            http: build_http_client(),
        }
    }

    /// Name of the target host this client talks to.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Starts a collection run on the remote collector.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure or a service error
    /// envelope (e.g. `experiment_exists`).
    pub async fn start_experiment(
        &self,
        experiment_id: &str,
        timeout_secs: u64,
        collection_interval_secs: Option<u64>,
        call_timeout: Duration,
    ) -> ClientResult<()> {
        let url = join_url(&self.base_url, "experiments");
        let mut body = json!({
            "experimentId": experiment_id,
            "timeout": timeout_secs,
        });
        if let Some(interval) = collection_interval_secs {
            body["collectionInterval"] = interval.into();
        }

        debug!(host = %self.host_name, experiment = %experiment_id, "starting collector experiment");
        let response = self
            .http
            .post(&url)
            .timeout(call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|source| crate::ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(&url, response).await)
        }
    }

    /// Stops the collection run. Treats "nothing running" as success so
    /// rollback can call it at least once.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure or a non-idempotent
    /// service error.
    pub async fn stop_experiment(
        &self,
        experiment_id: &str,
        call_timeout: Duration,
    ) -> ClientResult<()> {
        let url = join_url(&self.base_url, &format!("experiments/{experiment_id}"));
        let response = self
            .http
            .delete(&url)
            .timeout(call_timeout)
            .send()
            .await
            .map_err(|source| crate::ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            return Ok(());
        }
        let err = error_from_response(&url, response).await;
        if err.is_already_stopped() {
            debug!(host = %self.host_name, experiment = %experiment_id, "collector already stopped");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Fetches the persisted result of a completed collection run.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure, `experiment_not_found`
    /// or an undecodable body.
    pub async fn fetch_result(
        &self,
        experiment_id: &str,
        call_timeout: Duration,
    ) -> ClientResult<Experiment<MetricsData>> {
        let url = join_url(&self.base_url, &format!("experiments/{experiment_id}"));
        let response = self
            .http
            .get(&url)
            .timeout(call_timeout)
            .send()
            .await
            .map_err(|source| crate::ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(&url, response).await);
        }
        response
            .json::<Experiment<MetricsData>>()
            .await
            .map_err(|err| crate::ClientError::Decode {
                url,
                message: err.to_string(),
            })
    }

    /// Probes the remote service status.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` when the service is unreachable.
    pub async fn get_status(&self, call_timeout: Duration) -> ClientResult<StatusSnapshot> {
        let url = join_url(&self.base_url, "status");
        let response = self
            .http
            .get(&url)
            .timeout(call_timeout)
            .send()
            .await
            .map_err(|source| crate::ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(&url, response).await);
        }
        response
            .json::<StatusSnapshot>()
            .await
            .map_err(|err| crate::ClientError::Decode {
                url,
                message: err.to_string(),
            })
    }
}
