use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum accepted experiment-ID length. Group children use compound IDs
/// (`{group}-q{qps}-r{repeat}`), so this is wider than a single DNS label.
pub const MAX_EXPERIMENT_ID_LEN: usize = 128;

/// A single time-bounded measurement run with a typed payload.
///
/// The record is created on `start`, mutated only by the owning runtime
/// task and frozen when the run stops or times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment<T> {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Configured duration in seconds (the run may stop earlier).
    pub duration_secs: u64,
    pub data: T,
}

/// The only two states of a single-active-experiment runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Pending,
    Running,
}

impl ServiceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
        }
    }
}

/// Validates an experiment identifier.
///
/// IDs are kebab-case, DNS-label shaped: lowercase alphanumerics and `-`,
/// starting and ending with an alphanumeric.
///
/// # Errors
///
/// Returns `CoreError::Validation` when the identifier is malformed.
pub fn validate_experiment_id(id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::validation("experiment ID must not be empty"));
    }
    if id.len() > MAX_EXPERIMENT_ID_LEN {
        return Err(CoreError::validation(format!(
            "experiment ID exceeds {MAX_EXPERIMENT_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CoreError::validation(format!(
            "experiment ID `{id}` contains characters outside [a-z0-9-]"
        )));
    }
    if id.starts_with('-') || id.ends_with('-') {
        return Err(CoreError::validation(format!(
            "experiment ID `{id}` must start and end with an alphanumeric"
        )));
    }
    Ok(())
}
