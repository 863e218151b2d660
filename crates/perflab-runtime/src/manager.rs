use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use perflab_core::{validate_experiment_id, CoreError, CoreResult, Experiment, ServiceStatus};

use crate::api::StartRequest;
use crate::storage::{FileStorage, StoredExperiment};

/// How long `stop` waits for the background task to yield after
/// cancelling its scope.
pub const STOP_GRACE: Duration = Duration::from_secs(15);

/// Cancellable scope handed to a collection function.
///
/// The scope is cancelled either by an external `stop` or by the deadline
/// watchdog; collection functions must select against [`RunContext::cancelled`]
/// at every suspension point and return whatever partial data they hold.
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Instant,
}

impl RunContext {
    #[must_use]
    pub fn new(token: CancellationToken, deadline: Instant) -> Self {
        Self { token, deadline }
    }

    /// Resolves once the scope is cancelled or expired.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the scope from within the collection function.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left until the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The collection capability a service plugs into the runtime.
///
/// The runtime is generic over the payload: the collector produces
/// `MetricsData`, the requester `RequestData` and the dashboard the
/// composite `ExperimentData`.
#[async_trait]
pub trait Collect: Send + Sync + 'static {
    type Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Params: Send + 'static;

    /// Builds run parameters from a lifecycle start request, applying
    /// service defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the request is unusable.
    fn make_params(&self, request: &StartRequest) -> CoreResult<Self::Params>;

    /// Runs one collection to completion, honouring scope cancellation.
    async fn collect(&self, ctx: RunContext, params: Self::Params) -> CoreResult<Self::Payload>;
}

struct ActiveRun {
    id: String,
    cancel: CancellationToken,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Single-active-experiment state machine over a [`Collect`] capability.
///
/// At most one background task runs at a time; completed experiments live
/// only on disk. A persisted ID is never reused.
pub struct ExperimentManager<C: Collect> {
    collector: Arc<C>,
    storage: FileStorage<Experiment<C::Payload>>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl<C: Collect> ExperimentManager<C> {
    pub fn new(collector: C, storage: FileStorage<Experiment<C::Payload>>) -> Self {
        Self {
            collector: Arc::new(collector),
            storage,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// The collection capability, for parameter construction.
    #[must_use]
    pub fn collector(&self) -> &C {
        &self.collector
    }

    /// Starts a background collection under `id` with the given deadline.
    ///
    /// # Errors
    ///
    /// - `CoreError::Validation` for a malformed ID or zero timeout.
    /// - `CoreError::AlreadyRunning` while a task is live.
    /// - `CoreError::AlreadyExists` when `{id}.json` is already persisted.
    pub async fn start(
        &self,
        id: &str,
        timeout_secs: u64,
        description: Option<String>,
        params: C::Params,
    ) -> CoreResult<()> {
        validate_experiment_id(id)?;
        if timeout_secs == 0 {
            return Err(CoreError::validation("timeout must be > 0"));
        }

        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.handle.is_finished() {
                return Err(CoreError::AlreadyRunning { id: run.id.clone() });
            }
        }
        if self.storage.exists(id).await {
            return Err(CoreError::already_exists("experiment", id));
        }

        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let ctx = RunContext::new(cancel.clone(), deadline);

        let watchdog = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = watchdog.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => watchdog.cancel(),
            }
        });

        let storage = self.storage.clone();
        let collector = Arc::clone(&self.collector);
        let experiment_id = id.to_string();
        let start_time = Utc::now();
        let handle = tokio::spawn(async move {
            match collector.collect(ctx, params).await {
                Ok(data) => {
                    let record = Experiment {
                        id: experiment_id.clone(),
                        description,
                        start_time,
                        end_time: Some(Utc::now()),
                        duration_secs: timeout_secs,
                        data,
                    };
                    if let Err(err) = storage.save(&experiment_id, &record).await {
                        error!(experiment = %experiment_id, error = %err, "failed to persist experiment result");
                    }
                }
                Err(err) => {
                    warn!(experiment = %experiment_id, error = %err, "collection aborted, result discarded");
                }
            }
        });

        *active = Some(ActiveRun {
            id: id.to_string(),
            cancel,
            deadline,
            handle,
        });
        Ok(())
    }

    /// Cancels the running experiment and waits for the task to finish,
    /// bounded by [`STOP_GRACE`]. Returns the stopped experiment ID.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotRunning` when no task is live.
    /// - `CoreError::Internal` when the task overruns the grace period or
    ///   panicked; no dangling state is left behind either way.
    pub async fn stop(&self) -> CoreResult<String> {
        let run = {
            let mut active = self.active.lock().await;
            match active.take() {
                Some(run) if !run.handle.is_finished() => run,
                _ => return Err(CoreError::NotRunning),
            }
        };

        run.cancel.cancel();
        let id = run.id;
        match tokio::time::timeout(STOP_GRACE, run.handle).await {
            Ok(Ok(())) => Ok(id),
            Ok(Err(join_err)) => Err(CoreError::internal(format!(
                "experiment `{id}` task failed: {join_err}"
            ))),
            Err(_) => Err(CoreError::internal(format!(
                "experiment `{id}` did not stop within {}s",
                STOP_GRACE.as_secs()
            ))),
        }
    }

    /// `Running` iff a background task exists and its scope is neither
    /// cancelled nor past its deadline.
    pub async fn status(&self) -> ServiceStatus {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run)
                if !run.handle.is_finished()
                    && !run.cancel.is_cancelled()
                    && Instant::now() < run.deadline =>
            {
                ServiceStatus::Running
            }
            _ => ServiceStatus::Pending,
        }
    }

    /// ID of the running experiment, if any.
    pub async fn current_id(&self) -> Option<String> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|run| !run.handle.is_finished())
            .map(|run| run.id.clone())
    }

    /// Blocks until no background task is live. Used by sequential
    /// drivers (the group controller) to serialise children.
    pub async fn wait_until_idle(&self) {
        loop {
            {
                let active = self.active.lock().await;
                if active.as_ref().is_none_or(|run| run.handle.is_finished()) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Loads a persisted experiment.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when `id` has no file.
    pub async fn get(&self, id: &str) -> CoreResult<Experiment<C::Payload>> {
        self.storage.load(id).await
    }

    /// Whether a persisted file exists for `id`.
    pub async fn exists(&self, id: &str) -> bool {
        self.storage.exists(id).await
    }

    /// Lists persisted experiments, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` when the storage directory is unreadable.
    pub async fn list(&self) -> CoreResult<Vec<StoredExperiment>> {
        self.storage.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test collector: ticks until cancelled, returning the tick count.
    struct Counter {
        tick: Duration,
    }

    #[async_trait]
    impl Collect for Counter {
        type Payload = u64;
        type Params = ();

        fn make_params(&self, _request: &StartRequest) -> CoreResult<()> {
            Ok(())
        }

        async fn collect(&self, ctx: RunContext, _params: ()) -> CoreResult<u64> {
            let mut ticks = 0;
            let mut interval = tokio::time::interval(self.tick);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = ctx.cancelled() => return Ok(ticks),
                    _ = interval.tick() => ticks += 1,
                }
            }
        }
    }

    async fn manager(tick: Duration) -> (tempfile::TempDir, ExperimentManager<Counter>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::init(dir.path()).await.unwrap();
        (dir, ExperimentManager::new(Counter { tick }, storage))
    }

    #[tokio::test]
    async fn start_stop_persists_partial_result() {
        let (_dir, mgr) = manager(Duration::from_millis(10)).await;

        mgr.start("exp-1", 60, None, ()).await.unwrap();
        assert_eq!(mgr.status().await, ServiceStatus::Running);
        assert_eq!(mgr.current_id().await.as_deref(), Some("exp-1"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let stopped = mgr.stop().await.unwrap();
        assert_eq!(stopped, "exp-1");
        assert_eq!(mgr.status().await, ServiceStatus::Pending);

        let record = mgr.get("exp-1").await.unwrap();
        assert!(record.data > 0, "accumulated ticks survive the stop");
        assert!(record.end_time.is_some());
    }

    #[tokio::test]
    async fn deadline_expiry_persists_and_returns_to_pending() {
        let (_dir, mgr) = manager(Duration::from_millis(10)).await;

        mgr.start("exp-t", 1, None, ()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert_eq!(mgr.status().await, ServiceStatus::Pending);
        assert!(mgr.get("exp-t").await.is_ok());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let (_dir, mgr) = manager(Duration::from_millis(10)).await;

        mgr.start("exp-a", 60, None, ()).await.unwrap();
        let err = mgr.start("exp-b", 60, None, ()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning { .. }));

        mgr.stop().await.unwrap();
    }

    #[tokio::test]
    async fn persisted_id_is_never_reused() {
        let (_dir, mgr) = manager(Duration::from_millis(5)).await;

        mgr.start("exp-x", 60, None, ()).await.unwrap();
        mgr.stop().await.unwrap();

        let err = mgr.start("exp-x", 60, None, ()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stop_when_idle_fails_without_state_change() {
        let (_dir, mgr) = manager(Duration::from_millis(5)).await;

        let err = mgr.stop().await.unwrap_err();
        assert!(matches!(err, CoreError::NotRunning));
        assert_eq!(mgr.status().await, ServiceStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected_before_any_spawn() {
        let (_dir, mgr) = manager(Duration::from_millis(5)).await;

        for id in ["", "Bad-Case", "trailing-"] {
            assert!(mgr.start(id, 10, None, ()).await.is_err(), "{id}");
        }
        assert_eq!(mgr.status().await, ServiceStatus::Pending);
    }

    #[tokio::test]
    async fn wait_until_idle_returns_after_deadline() {
        let (_dir, mgr) = manager(Duration::from_millis(10)).await;

        mgr.start("exp-w", 1, None, ()).await.unwrap();
        mgr.wait_until_idle().await;
        assert_eq!(mgr.status().await, ServiceStatus::Pending);
    }
}
