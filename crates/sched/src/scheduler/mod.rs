//! Task scheduler: matches queued requests to worker windows.
//!
//! Split into focused submodules:
//! - `core`: public `Scheduler` handle, request submission and diagnostics
//! - `scheduling`: the single-threaded arbitration loop and `try_sched`
//! - `execution`: per-worker loop that requests windows and dispatches tasks

mod core;
mod execution;
mod scheduling;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::request::WorkerRequest;
use crate::resources::ActiveResources;
use crate::worker::{WorkerHandle, WorkerId};

pub use self::core::Scheduler;

/// A batch of requests assigned to one worker by one arbitration pass.
pub(crate) struct SchedWindow {
    /// Capacity of the owning worker the batch was sized against.
    pub allocated: ActiveResources,
    pub todo: VecDeque<WorkerRequest>,
}

impl SchedWindow {
    fn new() -> Self {
        Self {
            allocated: ActiveResources::new(),
            todo: VecDeque::new(),
        }
    }
}

/// A worker's standing offer to take one window.
pub(crate) struct SchedWindowRequest {
    pub worker: WorkerId,
    pub done: mpsc::Sender<SchedWindow>,
}

/// Everything the arbitration loop consumes.
pub(crate) enum SchedMsg {
    NewWorker(Arc<WorkerHandle>),
    DropWorker(WorkerId),
    Schedule(WorkerRequest),
    /// Requests that reached a worker loop only after it stopped.
    Requeue(Vec<WorkerRequest>),
    WindowRequest(SchedWindowRequest),
    Workers(oneshot::Sender<Vec<Arc<WorkerHandle>>>),
}
