use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::hosts::{ClientHost, TargetHost};
use crate::orchestrator::RunStatus;

/// QPS-sweep configuration of an experiment group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    pub qps_min: u32,
    pub qps_max: u32,
    pub qps_step: u32,
    pub repeat_count: u32,
    /// Per-child experiment duration in seconds.
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
    /// Pause between consecutive children in seconds.
    #[serde(rename = "delayBetween")]
    pub delay_between_secs: u64,
}

impl GroupConfig {
    /// Validates the sweep parameters.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the range or repeat count is
    /// malformed.
    pub fn validate(&self) -> CoreResult<()> {
        if self.qps_min == 0 {
            return Err(CoreError::validation("qpsMin must be > 0"));
        }
        if self.qps_min > self.qps_max {
            return Err(CoreError::validation("qpsMin must be <= qpsMax"));
        }
        if self.qps_step == 0 {
            return Err(CoreError::validation("qpsStep must be > 0"));
        }
        if self.repeat_count == 0 {
            return Err(CoreError::validation("repeatCount must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::validation("timeout must be > 0"));
        }
        Ok(())
    }

    /// Enumerates the swept QPS values in ascending order.
    #[must_use]
    pub fn qps_values(&self) -> Vec<u32> {
        let mut values = Vec::new();
        let mut qps = self.qps_min;
        while qps <= self.qps_max {
            values.push(qps);
            match qps.checked_add(self.qps_step) {
                Some(next) => qps = next,
                None => break,
            }
        }
        values
    }
}

/// Aggregate statistics over the replicated children of one QPS point,
/// reported with a confidence interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SteadyStateStats {
    pub mean: f64,
    pub std_dev: f64,
    pub conf_lower: f64,
    pub conf_upper: f64,
    pub min: f64,
    pub max: f64,
    pub sample_size: usize,
    pub confidence_level: f64,
}

/// One swept rate: its child experiment IDs and per-host statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QpsPoint {
    pub qps: u32,
    #[serde(default)]
    pub experiments: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub host_stats: BTreeMap<String, SteadyStateStats>,
    pub status: RunStatus,
}

impl QpsPoint {
    #[must_use]
    pub fn new(qps: u32) -> Self {
        Self {
            qps,
            experiments: Vec::new(),
            errors: Vec::new(),
            host_stats: BTreeMap::new(),
            status: RunStatus::Running,
        }
    }
}

/// Host environment captured when the group was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub target_hosts: Vec<TargetHost>,
    pub client_host: ClientHost,
}

/// A QPS sweep: an ordered set of experiments parameterised by request rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentGroup {
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: GroupConfig,
    pub environment: EnvironmentSnapshot,
    pub qps_points: Vec<QpsPoint>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExperimentGroup {
    /// Creates a group with one pending point per swept QPS value.
    #[must_use]
    pub fn new(
        group_id: String,
        description: Option<String>,
        config: GroupConfig,
        environment: EnvironmentSnapshot,
    ) -> Self {
        let qps_points = config.qps_values().into_iter().map(QpsPoint::new).collect();
        let now = Utc::now();
        Self {
            group_id,
            description,
            config,
            environment,
            qps_points,
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    /// Child experiment ID for one repeat of one swept rate.
    #[must_use]
    pub fn child_id(&self, qps: u32, repeat: u32) -> String {
        format!("{}-q{}-r{}", self.group_id, qps, repeat)
    }

    /// Mutable access to the point for a swept rate.
    pub fn point_mut(&mut self, qps: u32) -> Option<&mut QpsPoint> {
        self.qps_points.iter_mut().find(|p| p.qps == qps)
    }

    /// Whether a point already holds the full repeat count (resume skips it).
    #[must_use]
    pub fn point_complete(&self, qps: u32) -> bool {
        self.qps_points
            .iter()
            .find(|p| p.qps == qps)
            .is_some_and(|p| p.experiments.len() >= self.config.repeat_count as usize)
    }

    /// Derives the group status from per-point statuses: `failed` iff any
    /// point failed, else `completed` once every point carries its repeats.
    pub fn derive_status(&mut self) {
        self.updated_at = Utc::now();
        if self.qps_points.iter().any(|p| p.status == RunStatus::Failed) {
            self.status = RunStatus::Failed;
            return;
        }
        let all_done = self.qps_points.iter().all(|p| {
            p.status == RunStatus::Completed
                && p.experiments.len() >= self.config.repeat_count as usize
        });
        self.status = if all_done {
            RunStatus::Completed
        } else {
            RunStatus::Running
        };
    }
}
