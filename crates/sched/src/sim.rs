//! In-process worker used by `sched-sim` and by tests.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sealer_core::{TaskType, WorkerInfo, WorkerResources};

use crate::error::SchedError;
use crate::worker::Worker;

/// A worker with fixed hardware that runs task actions in-process.
#[derive(Debug, Clone)]
pub struct SimWorker {
    info: WorkerInfo,
    task_types: HashSet<TaskType>,
    closing: CancellationToken,
}

impl SimWorker {
    pub fn new(
        hostname: impl Into<String>,
        resources: WorkerResources,
        task_types: impl IntoIterator<Item = TaskType>,
    ) -> Self {
        Self {
            info: WorkerInfo {
                hostname: hostname.into(),
                resources,
            },
            task_types: task_types.into_iter().collect(),
            closing: CancellationToken::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    /// Simulate the connection dropping.
    pub fn disconnect(&self) {
        self.closing.cancel();
    }
}

#[async_trait]
impl Worker for SimWorker {
    async fn info(&self) -> Result<WorkerInfo, SchedError> {
        Ok(self.info.clone())
    }

    async fn task_types(&self) -> Result<HashSet<TaskType>, SchedError> {
        Ok(self.task_types.clone())
    }

    fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    async fn close(&self) -> Result<(), SchedError> {
        if !self.closing.is_cancelled() {
            info!(hostname = %self.info.hostname, "closing sim worker");
        }
        self.closing.cancel();
        Ok(())
    }
}
