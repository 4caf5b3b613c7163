//! Worker connection seam and the scheduler's per-worker state.
//!
//! The [`Worker`] trait is what the worker-connection layer implements; a
//! [`WorkerHandle`] wraps one connection together with its advertised
//! hardware, its preparing/active ledgers and the jobs it is carrying.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use sealer_core::{TaskType, WorkerInfo};

use crate::error::SchedError;
use crate::request::RequestId;
use crate::resources::WorkerLedgers;
use crate::scheduler::SchedWindow;
use crate::stats::{WorkerJob, WorkerStats};

// ── Worker trait ─────────────────────────────────────────────────────

/// A connected compute worker, as seen by the scheduler.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Advertised hostname and hardware.
    async fn info(&self) -> Result<WorkerInfo, SchedError>;

    /// Task kinds this worker accepts.
    async fn task_types(&self) -> Result<HashSet<TaskType>, SchedError>;

    /// Cancelled once the connection goes away.
    fn closing(&self) -> CancellationToken;

    /// Tear down the connection.
    async fn close(&self) -> Result<(), SchedError>;
}

// ── WorkerId ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── WorkerHandle ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct JobBoard {
    running: HashMap<RequestId, WorkerJob>,
    queued: Vec<WorkerJob>,
}

pub struct WorkerHandle {
    id: WorkerId,
    worker: Arc<dyn Worker>,
    info: WorkerInfo,
    pub(crate) ledgers: Mutex<WorkerLedgers>,
    task_types: OnceCell<HashSet<TaskType>>,
    closing: CancellationToken,
    jobs: StdMutex<JobBoard>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    pub fn new(id: WorkerId, worker: Arc<dyn Worker>, info: WorkerInfo) -> Self {
        let closing = worker.closing().child_token();
        Self {
            id,
            worker,
            info,
            ledgers: Mutex::new(WorkerLedgers::default()),
            task_types: OnceCell::new(),
            closing,
            jobs: StdMutex::new(JobBoard::default()),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Task kinds the worker accepts, fetched once and then cached.
    pub async fn task_types(&self) -> Result<&HashSet<TaskType>, SchedError> {
        self.task_types
            .get_or_try_init(|| self.worker.task_types())
            .await
    }

    /// Load of the active pool; see [`ActiveResources::utilization`](crate::resources::ActiveResources::utilization).
    pub async fn utilization(&self) -> f64 {
        self.ledgers
            .lock()
            .await
            .active
            .utilization(&self.info.resources)
    }

    /// Cancelled when the connection closes or the scheduler drops the worker.
    pub fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    pub(crate) fn mark_closing(&self) {
        self.closing.cancel();
    }

    pub async fn stats(&self) -> WorkerStats {
        let ledgers = self.ledgers.lock().await;
        WorkerStats {
            info: self.info.clone(),
            mem_used_min: ledgers.active.mem_used_min,
            mem_used_max: ledgers.active.mem_used_max,
            gpu_used: ledgers.active.gpu_used(),
            cpu_use: ledgers.active.cpu_use,
        }
    }

    /// Running jobs first, then queued jobs in window order.
    pub fn jobs(&self) -> Vec<WorkerJob> {
        let board = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut running: Vec<WorkerJob> = board.running.values().cloned().collect();
        running.sort_by_key(|job| job.start);
        running.extend(board.queued.iter().cloned());
        running
    }

    pub(crate) fn job_started(&self, job: WorkerJob) {
        let mut board = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        board.running.insert(job.id, job);
    }

    pub(crate) fn job_finished(&self, id: &RequestId) {
        let mut board = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        board.running.remove(id);
    }

    /// Replace the queued-job snapshot with the worker loop's pending windows.
    pub(crate) fn publish_windows(&self, windows: &VecDeque<SchedWindow>) {
        let queued = windows
            .iter()
            .enumerate()
            .flat_map(|(wi, window)| {
                window.todo.iter().map(move |req| WorkerJob {
                    id: req.id,
                    sector: req.sector,
                    task: req.task_type,
                    run_wait: wi + 1,
                    start: req.start,
                })
            })
            .collect();
        let mut board = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        board.queued = queued;
    }
}
