//! QPS-sweep group controller.
//!
//! A group walks an ascending range of request rates, runs each rate's
//! repeats strictly sequentially through the orchestrator's experiment
//! manager, and persists after every child so an interrupted sweep can
//! resume from the first incomplete point.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use perflab_core::{
    validate_experiment_id, EnvironmentSnapshot, ExperimentGroup, GroupConfig, HostsConfig,
    RunStatus, ServiceStatus,
};
use perflab_runtime::{ApiError, ExperimentManager, FileStorage, StoredExperiment};

use crate::orchestrator::{Orchestration, OrchestrationParams};
use crate::stats::steady_state;

struct GroupRun {
    group_id: String,
    handle: JoinHandle<()>,
}

/// Single-active-group driver over the orchestrator runtime.
pub struct GroupController {
    manager: Arc<ExperimentManager<Orchestration>>,
    store: FileStorage<ExperimentGroup>,
    hosts: HostsConfig,
    active: tokio::sync::Mutex<Option<GroupRun>>,
}

impl GroupController {
    #[must_use]
    pub fn new(
        manager: Arc<ExperimentManager<Orchestration>>,
        store: FileStorage<ExperimentGroup>,
        hosts: HostsConfig,
    ) -> Self {
        Self {
            manager,
            store,
            hosts,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Creates a group and launches its sweep in the background.
    ///
    /// # Errors
    ///
    /// Rejects malformed IDs/configs, a busy service, or an ID that
    /// already has a persisted group file.
    pub async fn start_group(
        &self,
        group_id: &str,
        description: Option<String>,
        config: GroupConfig,
    ) -> Result<(), ApiError> {
        validate_experiment_id(group_id).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        config
            .validate()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.handle.is_finished() {
                return Err(ApiError::ServiceBusy(format!(
                    "group `{}` is already running",
                    run.group_id
                )));
            }
        }
        if self.manager.status().await == ServiceStatus::Running {
            return Err(ApiError::ServiceBusy(
                "an experiment is already running".to_string(),
            ));
        }
        if self.store.exists(group_id).await {
            return Err(ApiError::ExperimentExists(group_id.to_string()));
        }

        let environment = EnvironmentSnapshot {
            target_hosts: self.hosts.target_hosts.clone(),
            client_host: self.hosts.client_host.clone(),
        };
        let group = ExperimentGroup::new(group_id.to_string(), description, config, environment);
        persist_group(&self.store, &group).await;

        info!(group = %group_id, points = group.qps_points.len(), "starting experiment group");
        let handle = tokio::spawn(run_group(
            Arc::clone(&self.manager),
            self.store.clone(),
            group,
        ));
        *active = Some(GroupRun {
            group_id: group_id.to_string(),
            handle,
        });
        Ok(())
    }

    /// Resumes an interrupted sweep from its first incomplete QPS point.
    ///
    /// # Errors
    ///
    /// Rejects unknown groups, completed groups and a busy service.
    pub async fn resume_group(&self, group_id: &str) -> Result<(), ApiError> {
        if !self.store.exists(group_id).await {
            return Err(ApiError::GroupNotFound(group_id.to_string()));
        }
        let mut group = self
            .store
            .load(group_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if group.status == RunStatus::Completed {
            return Err(ApiError::GroupAlreadyCompleted(group_id.to_string()));
        }

        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.handle.is_finished() {
                return Err(ApiError::ServiceBusy(format!(
                    "group `{}` is already running",
                    run.group_id
                )));
            }
        }
        if self.manager.status().await == ServiceStatus::Running {
            return Err(ApiError::ServiceBusy(
                "an experiment is already running".to_string(),
            ));
        }

        group.status = RunStatus::Running;
        persist_group(&self.store, &group).await;

        info!(group = %group_id, "resuming experiment group");
        let handle = tokio::spawn(run_group(
            Arc::clone(&self.manager),
            self.store.clone(),
            group,
        ));
        *active = Some(GroupRun {
            group_id: group_id.to_string(),
            handle,
        });
        Ok(())
    }

    /// Lists persisted groups, newest first.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures as `internal_error`.
    pub async fn list_groups(&self) -> Result<Vec<StoredExperiment>, ApiError> {
        self.store
            .list()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Loads one group record.
    ///
    /// # Errors
    ///
    /// Returns `group_not_found` for unknown IDs.
    pub async fn get_group(&self, group_id: &str) -> Result<ExperimentGroup, ApiError> {
        if !self.store.exists(group_id).await {
            return Err(ApiError::GroupNotFound(group_id.to_string()));
        }
        self.store
            .load(group_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Waits for the active sweep task to finish. Test hook and shutdown
    /// aid; a no-op when nothing runs.
    pub async fn wait_for_completion(&self) {
        let handle = {
            let mut active = self.active.lock().await;
            active.take()
        };
        if let Some(run) = handle {
            if let Err(err) = run.handle.await {
                error!(group = %run.group_id, error = %err, "group task failed");
            }
        }
    }
}

async fn run_group(
    manager: Arc<ExperimentManager<Orchestration>>,
    store: FileStorage<ExperimentGroup>,
    mut group: ExperimentGroup,
) {
    let qps_values = group.config.qps_values();
    for qps in qps_values {
        // Resume: points that already carry every repeat are final.
        if group.point_complete(qps) {
            continue;
        }
        run_qps_point(&manager, &store, &mut group, qps).await;
    }

    group.derive_status();
    persist_group(&store, &group).await;
    info!(group = %group.group_id, status = ?group.status, "experiment group finished");
}

async fn run_qps_point(
    manager: &ExperimentManager<Orchestration>,
    store: &FileStorage<ExperimentGroup>,
    group: &mut ExperimentGroup,
    qps: u32,
) {
    let repeat_count = group.config.repeat_count;
    let timeout_secs = group.config.timeout_secs;
    let delay_between_secs = group.config.delay_between_secs;

    let already_done = group
        .point_mut(qps)
        .map_or(0, |p| p.experiments.len() as u32);

    for repeat in (already_done + 1)..=repeat_count {
        let child_id = group.child_id(qps, repeat);

        // A child file left over from an interrupted run counts as done.
        if !manager.exists(&child_id).await {
            let params = OrchestrationParams {
                experiment_id: child_id.clone(),
                qps,
                timeout_secs,
            };
            let description = format!("group {} qps {} repeat {}", group.group_id, qps, repeat);
            match manager
                .start(&child_id, timeout_secs, Some(description), params)
                .await
            {
                Ok(()) => manager.wait_until_idle().await,
                Err(err) => {
                    warn!(child = %child_id, error = %err, "child experiment failed to start");
                    if let Some(point) = group.point_mut(qps) {
                        point.errors.push(format!("{child_id}: {err}"));
                    }
                    persist_group(store, group).await;
                    continue;
                }
            }
        }

        match manager.get(&child_id).await {
            Ok(record) => {
                if let Some(point) = group.point_mut(qps) {
                    point.experiments.push(child_id.clone());
                    if record.data.status != RunStatus::Completed {
                        point
                            .errors
                            .push(format!("{child_id}: finished {:?}", record.data.status));
                    }
                }
            }
            Err(err) => {
                warn!(child = %child_id, error = %err, "child experiment left no result");
                if let Some(point) = group.point_mut(qps) {
                    point.errors.push(format!("{child_id}: {err}"));
                }
            }
        }
        persist_group(store, group).await;

        if delay_between_secs > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(delay_between_secs)).await;
        }
    }

    compute_point_stats(manager, group, qps).await;
    if let Some(point) = group.point_mut(qps) {
        point.status = if point.errors.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
    }
    persist_group(store, group).await;
}

/// Steady-state stats per target host over the point's children: the
/// per-child sample is that child's mean CPU on the host.
async fn compute_point_stats(
    manager: &ExperimentManager<Orchestration>,
    group: &mut ExperimentGroup,
    qps: u32,
) {
    let child_ids: Vec<String> = group
        .point_mut(qps)
        .map(|p| p.experiments.clone())
        .unwrap_or_default();

    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for child_id in child_ids {
        let Ok(record) = manager.get(&child_id).await else {
            continue;
        };
        for (host, result) in &record.data.collector_results {
            if let Some(metrics) = &result.data {
                if let Some(mean_cpu) = metrics.mean_cpu_percent() {
                    samples.entry(host.clone()).or_default().push(mean_cpu);
                }
            }
        }
    }

    if let Some(point) = group.point_mut(qps) {
        for (host, host_samples) in samples {
            if let Some(stats) = steady_state(&host_samples) {
                point.host_stats.insert(host, stats);
            }
        }
    }
}

/// Persistence failures are logged and the in-memory sweep continues;
/// the group is then lost on restart.
async fn persist_group(store: &FileStorage<ExperimentGroup>, group: &ExperimentGroup) {
    if let Err(err) = store.save(&group.group_id, group).await {
        error!(group = %group.group_id, error = %err, "failed to persist group");
    }
}
