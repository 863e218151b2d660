//! Generic single-active-experiment runtime.
//!
//! Every Perflab service (collector, requester, dashboard) is an instance
//! of the same machinery: an [`ExperimentManager`] guarding one background
//! collection task, a [`FileStorage`] persisting one JSON file per
//! experiment, and the shared lifecycle HTTP surface in [`api`].

pub mod api;
pub mod manager;
pub mod storage;

pub use api::{lifecycle_router, ApiError, ApiState, StartRequest};
pub use manager::{Collect, ExperimentManager, RunContext, STOP_GRACE};
pub use storage::{FileStorage, StoredExperiment};
