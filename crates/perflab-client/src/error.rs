use serde::Deserialize;
use thiserror::Error;

/// Error envelope returned by every service on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireError {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// Errors surfaced by the control-plane clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP round-trip itself failed (connect, timeout, protocol).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with its error envelope.
    #[error("service error {code} ({status}): {message}")]
    Service {
        code: String,
        message: String,
        status: u16,
    },

    /// Non-2xx response without a parseable envelope.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// The success body could not be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ClientError {
    /// True when the remote reported that nothing was running, i.e. the
    /// idempotent-stop success cases.
    #[must_use]
    pub fn is_already_stopped(&self) -> bool {
        matches!(
            self,
            Self::Service { code, .. }
                if code == "no_experiment_running" || code == "experiment_already_stopped"
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub(crate) async fn error_from_response(
    url: &str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status().as_u16();
    match response.json::<WireError>().await {
        Ok(envelope) => ClientError::Service {
            code: envelope.error,
            message: envelope.message,
            status,
        },
        Err(_) => ClientError::UnexpectedStatus {
            url: url.to_string(),
            status,
        },
    }
}
