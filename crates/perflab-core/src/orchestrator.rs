use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsData;
use crate::request::RequestData;

/// Outcome status of an orchestrated experiment or one of its sub-results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

/// Per-target collector outcome within an orchestrated experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MetricsData>,
}

impl CollectorResult {
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            error: None,
            data: None,
        }
    }
}

/// Requester outcome within an orchestrated experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RequestData>,
}

impl RequesterResult {
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            error: None,
            stats: None,
        }
    }
}

/// An entry in the ordered error log of an orchestrated experiment,
/// annotated with the lifecycle phase and host where it occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentError {
    pub phase: String,
    pub host: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload persisted by the dashboard for one orchestrated experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentData {
    pub qps: u32,
    pub target_hosts: Vec<String>,
    pub client_host: String,
    pub collector_results: BTreeMap<String, CollectorResult>,
    pub requester_result: RequesterResult,
    #[serde(default)]
    pub errors: Vec<ExperimentError>,
    pub status: RunStatus,
}

impl ExperimentData {
    /// Creates a fresh record with every configured host marked running.
    #[must_use]
    pub fn new(qps: u32, target_hosts: Vec<String>, client_host: String) -> Self {
        let collector_results = target_hosts
            .iter()
            .map(|h| (h.clone(), CollectorResult::running()))
            .collect();
        Self {
            qps,
            target_hosts,
            client_host,
            collector_results,
            requester_result: RequesterResult::running(),
            errors: Vec::new(),
            status: RunStatus::Running,
        }
    }

    /// Appends an error annotated with its phase and host.
    pub fn record_error(&mut self, phase: &str, host: &str, message: impl Into<String>) {
        self.errors.push(ExperimentError {
            phase: phase.to_string(),
            host: host.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Freezes the record: `completed` iff the error log is empty.
    pub fn finalize(&mut self) {
        self.status = if self.errors.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
    }

    /// Status derivation of the legacy stop-and-collect path: `partial`
    /// when some but not all collectors returned data.
    #[must_use]
    pub fn stop_and_collect_status(collected: usize, expected: usize) -> RunStatus {
        if expected == 0 || collected == expected {
            RunStatus::Completed
        } else if collected == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}
