use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use perflab_client::{CollectorClient, RequesterClient};
use perflab_core::{CoreError, CoreResult, ExperimentData, HostsConfig, RunStatus};
use perflab_runtime::{Collect, RunContext, StartRequest};

/// Detached-scope budget for the stop fan-in. Cleanup must not inherit
/// the already-cancelled experiment scope.
pub const STOP_SCOPE: Duration = Duration::from_secs(30);

/// Detached-scope budget for result collection.
pub const COLLECT_SCOPE: Duration = Duration::from_secs(10);

pub const PHASE_COLLECTOR_START: &str = "collector_start";
pub const PHASE_REQUESTER_START: &str = "requester_start";
pub const PHASE_COLLECTOR_STOP: &str = "collector_stop";
pub const PHASE_REQUESTER_STOP: &str = "requester_stop";
pub const PHASE_COLLECTOR_COLLECT: &str = "collector_collect";
pub const PHASE_REQUESTER_COLLECT: &str = "requester_collect";

/// Remote service handles, keyed by host name. Built once from the host
/// inventory; read-only during experiments.
pub struct HostClients {
    pub hosts: HostsConfig,
    pub collectors: HashMap<String, CollectorClient>,
    pub requester: RequesterClient,
}

impl HostClients {
    #[must_use]
    pub fn from_config(hosts: HostsConfig) -> Self {
        let collectors = hosts
            .target_hosts
            .iter()
            .map(|host| {
                (
                    host.name.clone(),
                    CollectorClient::new(host.name.clone(), host.collector_service_url.clone()),
                )
            })
            .collect();
        let requester = RequesterClient::new(hosts.client_host.requester_service_url.clone());
        Self {
            hosts,
            collectors,
            requester,
        }
    }
}

/// Per-run parameters for one orchestrated experiment.
#[derive(Debug, Clone)]
pub struct OrchestrationParams {
    pub experiment_id: String,
    pub qps: u32,
    pub timeout_secs: u64,
}

/// The dashboard's collection function: phased fan-out/fan-in over the
/// collectors and the requester. The orchestrator itself runs as a plain
/// experiment-runtime instance with this capability plugged in.
pub struct Orchestration {
    clients: Arc<HostClients>,
    default_qps: u32,
}

impl Orchestration {
    #[must_use]
    pub fn new(clients: Arc<HostClients>, default_qps: u32) -> Self {
        Self {
            clients,
            default_qps,
        }
    }

    /// Best-effort, idempotent stop of every sub-experiment on a fresh
    /// scope, then cancellation of the orchestrator's own run.
    pub async fn stop_all(&self, ctx: &RunContext, experiment_id: &str) {
        info!(experiment = %experiment_id, "rolling back sub-experiments");
        let collector_stops = self.clients.collectors.values().map(|client| {
            let id = experiment_id.to_string();
            async move {
                if let Err(err) = client.stop_experiment(&id, STOP_SCOPE).await {
                    debug!(host = client.host_name(), error = %err, "rollback stop failed");
                }
            }
        });
        let requester_stop = async {
            if let Err(err) = self
                .clients
                .requester
                .stop_experiment(experiment_id, STOP_SCOPE)
                .await
            {
                debug!(error = %err, "rollback requester stop failed");
            }
        };
        tokio::join!(join_all(collector_stops), requester_stop);
        ctx.cancel();
    }

    /// Phase 1: start a collector on every target host in parallel.
    /// Returns `false` when any start failed (after recording errors).
    async fn start_collectors(
        &self,
        ctx: &RunContext,
        params: &OrchestrationParams,
        data: &mut ExperimentData,
    ) -> bool {
        let call_timeout = start_call_timeout(ctx);
        let starts = self.clients.collectors.values().map(|client| {
            let id = params.experiment_id.clone();
            async move {
                let result = client
                    .start_experiment(&id, params.timeout_secs, None, call_timeout)
                    .await;
                (client.host_name().to_string(), result)
            }
        });

        let results = tokio::select! {
            () = ctx.cancelled() => return true,
            results = join_all(starts) => results,
        };

        let mut ok = true;
        for (host, result) in results {
            if let Err(err) = result {
                warn!(%host, error = %err, "collector start failed");
                data.record_error(PHASE_COLLECTOR_START, &host, err.to_string());
                if let Some(entry) = data.collector_results.get_mut(&host) {
                    entry.status = RunStatus::Failed;
                    entry.error = Some(err.to_string());
                }
                ok = false;
            }
        }
        ok
    }

    /// Phase 2: start the load generator on the client host.
    async fn start_requester(
        &self,
        ctx: &RunContext,
        params: &OrchestrationParams,
        data: &mut ExperimentData,
    ) -> bool {
        let call_timeout = start_call_timeout(ctx);
        let start = self.clients.requester.start_experiment(
            &params.experiment_id,
            params.timeout_secs,
            params.qps,
            call_timeout,
        );

        let result = tokio::select! {
            () = ctx.cancelled() => return true,
            result = start => result,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "requester start failed");
                data.record_error(
                    PHASE_REQUESTER_START,
                    &self.clients.hosts.client_host.name,
                    err.to_string(),
                );
                data.requester_result.status = RunStatus::Failed;
                data.requester_result.error = Some(err.to_string());
                false
            }
        }
    }

    /// Phase 4: stop fan-in on a fresh scope. Failures degrade only the
    /// affected sub-result.
    async fn stop_fan_in(&self, experiment_id: &str, data: &mut ExperimentData) {
        let collector_stops = self.clients.collectors.values().map(|client| {
            let id = experiment_id.to_string();
            async move {
                let result = client.stop_experiment(&id, STOP_SCOPE).await;
                (client.host_name().to_string(), result)
            }
        });
        let requester_stop = self
            .clients
            .requester
            .stop_experiment(experiment_id, STOP_SCOPE);

        let (collector_results, requester_result) =
            tokio::join!(join_all(collector_stops), requester_stop);

        for (host, result) in collector_results {
            if let Err(err) = result {
                warn!(%host, error = %err, "collector stop failed");
                data.record_error(PHASE_COLLECTOR_STOP, &host, err.to_string());
                if let Some(entry) = data.collector_results.get_mut(&host) {
                    entry.status = RunStatus::Failed;
                    entry.error = Some(err.to_string());
                }
            }
        }
        if let Err(err) = requester_result {
            warn!(error = %err, "requester stop failed");
            data.record_error(
                PHASE_REQUESTER_STOP,
                &self.clients.hosts.client_host.name,
                err.to_string(),
            );
            data.requester_result.status = RunStatus::Failed;
            data.requester_result.error = Some(err.to_string());
        }
    }

    /// Phase 5: fetch sub-results on another fresh scope.
    async fn collect_results(&self, experiment_id: &str, data: &mut ExperimentData) {
        let fetches = self.clients.collectors.values().map(|client| {
            let id = experiment_id.to_string();
            async move {
                let result = client.fetch_result(&id, COLLECT_SCOPE).await;
                (client.host_name().to_string(), result)
            }
        });
        let requester_fetch = self
            .clients
            .requester
            .fetch_result(experiment_id, COLLECT_SCOPE);

        let (collector_fetches, requester_result) =
            tokio::join!(join_all(fetches), requester_fetch);

        for (host, result) in collector_fetches {
            match result {
                Ok(record) => {
                    if let Some(entry) = data.collector_results.get_mut(&host) {
                        entry.data = Some(record.data);
                        if entry.status == RunStatus::Running {
                            entry.status = RunStatus::Completed;
                        }
                    }
                }
                Err(err) => {
                    warn!(%host, error = %err, "collector result fetch failed");
                    data.record_error(PHASE_COLLECTOR_COLLECT, &host, err.to_string());
                    if let Some(entry) = data.collector_results.get_mut(&host) {
                        entry.status = RunStatus::Failed;
                        entry.error = Some(err.to_string());
                    }
                }
            }
        }
        match requester_result {
            Ok(record) => {
                data.requester_result.stats = Some(record.data);
                if data.requester_result.status == RunStatus::Running {
                    data.requester_result.status = RunStatus::Completed;
                }
            }
            Err(err) => {
                warn!(error = %err, "requester result fetch failed");
                data.record_error(
                    PHASE_REQUESTER_COLLECT,
                    &self.clients.hosts.client_host.name,
                    err.to_string(),
                );
                data.requester_result.status = RunStatus::Failed;
                data.requester_result.error = Some(err.to_string());
            }
        }
    }
}

/// Start calls are bounded by the experiment scope, clamped to a sane
/// window so an expired scope still yields a usable request timeout.
fn start_call_timeout(ctx: &RunContext) -> Duration {
    ctx.remaining()
        .min(STOP_SCOPE)
        .max(Duration::from_secs(1))
}

#[async_trait]
impl Collect for Orchestration {
    type Payload = ExperimentData;
    type Params = OrchestrationParams;

    fn make_params(&self, request: &StartRequest) -> CoreResult<OrchestrationParams> {
        let qps = request.qps.unwrap_or(self.default_qps);
        if qps == 0 {
            return Err(CoreError::validation("qps must be > 0"));
        }
        Ok(OrchestrationParams {
            experiment_id: request.experiment_id.clone(),
            qps,
            timeout_secs: request.timeout,
        })
    }

    async fn collect(
        &self,
        ctx: RunContext,
        params: OrchestrationParams,
    ) -> CoreResult<ExperimentData> {
        let target_names: Vec<String> = self
            .clients
            .hosts
            .target_hosts
            .iter()
            .map(|h| h.name.clone())
            .collect();
        let mut data = ExperimentData::new(
            params.qps,
            target_names,
            self.clients.hosts.client_host.name.clone(),
        );
        info!(
            experiment = %params.experiment_id,
            qps = params.qps,
            targets = data.target_hosts.len(),
            "orchestrated experiment starting"
        );

        // Phases 1-2: fan out the sub-experiment starts. A fatal start
        // failure rolls everything back and freezes the record.
        if !self.start_collectors(&ctx, &params, &mut data).await {
            self.stop_all(&ctx, &params.experiment_id).await;
            data.finalize();
            return Ok(data);
        }
        if !self.start_requester(&ctx, &params, &mut data).await {
            self.stop_all(&ctx, &params.experiment_id).await;
            data.finalize();
            return Ok(data);
        }

        // Phase 3: wait out the experiment window (timeout or stop).
        ctx.cancelled().await;

        // Phases 4-5 run on fresh scopes: the experiment scope is already
        // cancelled and must not abort cleanup.
        self.stop_fan_in(&params.experiment_id, &mut data).await;
        self.collect_results(&params.experiment_id, &mut data).await;

        data.finalize();
        info!(
            experiment = %params.experiment_id,
            status = ?data.status,
            errors = data.errors.len(),
            "orchestrated experiment finished"
        );
        Ok(data)
    }
}
