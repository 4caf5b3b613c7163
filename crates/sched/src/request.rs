//! A queued task request and the one-shot channel its caller waits on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use sealer_core::{RequestContext, SectorId, TaskType};

use crate::error::SchedError;
use crate::request_queue::Queued;
use crate::selector::WorkerSelector;
use crate::worker::Worker;

pub type RequestId = Uuid;

/// Future returned by a prepare or execute action.
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Boxed prepare or execute step, run once against the assigned worker.
pub type WorkerAction = Box<dyn FnOnce(RequestContext, Arc<dyn Worker>) -> ActionFuture + Send + Sync>;

/// Box a closure into a [`WorkerAction`].
pub fn action<F, Fut>(f: F) -> WorkerAction
where
    F: FnOnce(RequestContext, Arc<dyn Worker>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |ctx, worker| Box::pin(f(ctx, worker)))
}

/// Delivers exactly one result to the caller of `schedule`.
#[derive(Debug)]
pub(crate) struct Responder {
    ret: oneshot::Sender<Result<(), SchedError>>,
    sector: SectorId,
    task: TaskType,
}

impl Responder {
    pub(crate) fn new(ret: oneshot::Sender<Result<(), SchedError>>, sector: SectorId, task: TaskType) -> Self {
        Self { ret, sector, task }
    }

    /// Tell the caller the scheduler is shutting down. The caller usually
    /// observes that first, so a dropped receiver is expected here.
    pub(crate) fn close(self) {
        let _ = self.ret.send(Err(SchedError::Closing));
    }

    pub(crate) fn respond(self, res: Result<(), SchedError>) {
        if let Err(unsent) = self.ret.send(res) {
            warn!(
                sector = %self.sector,
                task = %self.task,
                result = ?unsent.err(),
                "request got cancelled before we could respond"
            );
        }
    }
}

pub(crate) struct WorkerRequest {
    pub id: RequestId,
    pub sector: SectorId,
    pub task_type: TaskType,
    pub priority: i32,
    pub sel: Arc<dyn WorkerSelector>,
    pub prepare: WorkerAction,
    pub work: WorkerAction,
    pub start: DateTime<Utc>,
    pub ret: Responder,
    pub ctx: RequestContext,
}

impl WorkerRequest {
    pub(crate) fn respond(self, res: Result<(), SchedError>) {
        self.ret.respond(res);
    }
}

impl Queued for WorkerRequest {
    type Id = RequestId;

    fn id(&self) -> RequestId {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
