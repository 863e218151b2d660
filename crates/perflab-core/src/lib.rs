//! Core domain types for the Perflab experiment orchestrator.

pub mod error;
pub mod experiment;
pub mod group;
pub mod hosts;
pub mod metrics;
pub mod orchestrator;
pub mod request;

pub use error::{CoreError, CoreResult};
pub use experiment::{validate_experiment_id, Experiment, ServiceStatus};
pub use group::{
    EnvironmentSnapshot, ExperimentGroup, GroupConfig, QpsPoint, SteadyStateStats,
};
pub use hosts::{ClientHost, HostsConfig, TargetHost};
pub use metrics::{CollectorConfigSnapshot, MetricPoint, MetricsData, NetworkIo};
pub use orchestrator::{
    CollectorResult, ExperimentData, ExperimentError, RequesterResult, RunStatus,
};
pub use request::{
    ArrivalPattern, ConnectionMode, LatencyBucket, RequestData, RequestSample, RequestStats,
    RequesterConfigSnapshot, LATENCY_BUCKET_EDGES_MS,
};
