//! Worker eligibility and preference policies.

use async_trait::async_trait;

use sealer_core::{ProofType, RequestContext, TaskType};

use crate::error::SchedError;
use crate::worker::WorkerHandle;

/// Decides which workers may run a task and which of them to prefer.
#[async_trait]
pub trait WorkerSelector: Send + Sync {
    /// Whether `worker` is eligible to run `task`.
    async fn ok(
        &self,
        ctx: &RequestContext,
        task: TaskType,
        spt: ProofType,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedError>;

    /// Whether `a` should be preferred over `b`.
    async fn cmp(
        &self,
        ctx: &RequestContext,
        task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SchedError>;
}

/// Accepts workers advertising the task kind, preferring specialised ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSelector;

#[async_trait]
impl WorkerSelector for TaskSelector {
    async fn ok(
        &self,
        _ctx: &RequestContext,
        task: TaskType,
        _spt: ProofType,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedError> {
        Ok(worker.task_types().await?.contains(&task))
    }

    async fn cmp(
        &self,
        _ctx: &RequestContext,
        _task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SchedError> {
        let a_tasks = a.task_types().await?.len();
        let b_tasks = b.task_types().await?.len();
        if a_tasks != b_tasks {
            return Ok(a_tasks < b_tasks);
        }
        Ok(a.utilization().await < b.utilization().await)
    }
}

/// Accepts every worker, preferring the least loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyWorkerSelector;

#[async_trait]
impl WorkerSelector for AnyWorkerSelector {
    async fn ok(
        &self,
        _ctx: &RequestContext,
        _task: TaskType,
        _spt: ProofType,
        _worker: &WorkerHandle,
    ) -> Result<bool, SchedError> {
        Ok(true)
    }

    async fn cmp(
        &self,
        _ctx: &RequestContext,
        _task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SchedError> {
        Ok(a.utilization().await < b.utilization().await)
    }
}
