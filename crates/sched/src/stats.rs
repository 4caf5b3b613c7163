//! Read-only diagnostics snapshots for operational tooling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sealer_core::{SectorId, TaskType, WorkerInfo};

use crate::request::RequestId;

/// A worker's advertised hardware plus what its active pool has claimed.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub info: WorkerInfo,
    pub mem_used_min: u64,
    pub mem_used_max: u64,
    pub gpu_used: bool,
    pub cpu_use: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerJob {
    pub id: RequestId,
    pub sector: SectorId,
    pub task: TaskType,
    /// 0 while running; n when waiting in the worker's n-th pending window.
    pub run_wait: usize,
    pub start: DateTime<Utc>,
}
