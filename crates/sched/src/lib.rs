//! Resource-aware task scheduler for sealing workers.
//!
//! Callers submit tasks with [`Scheduler::schedule`]. A single arbitration
//! loop matches queued requests, in priority order, against windows offered
//! by connected workers; each worker's execution loop then runs the tasks of
//! a window in order, reserving capacity first in a preparing pool and then
//! in an active pool.

pub mod config;
pub mod error;
pub mod metrics;
pub mod request;
pub mod request_queue;
pub mod resources;
pub mod scheduler;
pub mod selector;
pub mod sim;
pub mod stats;
pub mod worker;

pub use config::SchedConfig;
pub use error::SchedError;
pub use metrics::SchedulerMetrics;
pub use request::{action, ActionFuture, RequestId, WorkerAction};
pub use request_queue::{Queued, RequestQueue};
pub use resources::{with_resources, ActiveResources, Claim, Pool, WorkerLedgers};
pub use scheduler::Scheduler;
pub use selector::{AnyWorkerSelector, TaskSelector, WorkerSelector};
pub use sim::SimWorker;
pub use stats::{WorkerJob, WorkerStats};
pub use worker::{Worker, WorkerHandle, WorkerId};
