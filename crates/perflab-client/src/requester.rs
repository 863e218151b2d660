use std::time::Duration;

use serde_json::json;
use tracing::debug;

use perflab_core::{Experiment, RequestData};

use crate::error::{error_from_response, ClientResult};
use crate::{build_http_client, join_url, StatusSnapshot};

/// Handle to the client host's load generator service.
#[derive(Debug, Clone)]
pub struct RequesterClient {
    base_url: String,
    http: reqwest::Client,
}

impl RequesterClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(),
        }
    }

    /// Starts a load-generation run at the given rate.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure or a service error
    /// envelope.
    pub async fn start_experiment(
        &self,
        experiment_id: &str,
        timeout_secs: u64,
        qps: u32,
        call_timeout: Duration,
    ) -> ClientResult<()> {
        let url = join_url(&self.base_url, "experiments");
        let body = json!({
            "experimentId": experiment_id,
            "timeout": timeout_secs,
            "qps": qps,
        });

        debug!(experiment = %experiment_id, qps, "starting requester experiment");
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

    /// Stops the load-generation run; "nothing running" counts as success.
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
            debug!(experiment = %experiment_id, "requester already stopped");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Fetches the persisted load statistics of a completed run.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on transport failure, `experiment_not_found`
    /// or an undecodable body.
    pub async fn fetch_result(
        &self,
        experiment_id: &str,
        call_timeout: Duration,
    ) -> ClientResult<Experiment<RequestData>> {
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
            .json::<Experiment<RequestData>>()
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
