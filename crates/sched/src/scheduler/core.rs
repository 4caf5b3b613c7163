use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sealer_core::{ProofType, RequestContext, SectorId, TaskType};

use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::metrics::SchedulerMetrics;
use crate::request::{action, Responder, WorkerRequest};
use crate::selector::WorkerSelector;
use crate::stats::{WorkerJob, WorkerStats};
use crate::worker::{Worker, WorkerHandle, WorkerId};

use super::scheduling::SchedCore;
use super::SchedMsg;

/// Handle to a running scheduler. Cheap to clone; every clone talks to the
/// same arbitration loop.
#[derive(Clone)]
pub struct Scheduler {
    spt: ProofType,
    tx: mpsc::Sender<SchedMsg>,
    closing: CancellationToken,
    closed: CancellationToken,
    next_worker: Arc<AtomicU64>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl Scheduler {
    /// Validate `config` and spawn the arbitration loop on the current runtime.
    pub fn start(config: SchedConfig) -> Result<Self, SchedError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let closing = CancellationToken::new();
        let closed = CancellationToken::new();
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));

        let core = SchedCore::new(&config, tx.clone(), closing.clone(), metrics.clone());
        tokio::spawn(core.run(rx, closed.clone()));

        info!(
            seal_proof = %config.seal_proof,
            windows = config.sched_windows,
            "scheduler started"
        );

        Ok(Self {
            spt: config.seal_proof,
            tx,
            closing,
            closed,
            next_worker: Arc::new(AtomicU64::new(1)),
            metrics,
        })
    }

    pub fn seal_proof(&self) -> ProofType {
        self.spt
    }

    /// Register a connected worker and start its execution loop.
    pub async fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<WorkerId, SchedError> {
        let info = worker.info().await?;
        let wid = WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(WorkerHandle::new(wid, worker, info));
        self.send(SchedMsg::NewWorker(handle)).await?;
        Ok(wid)
    }

    /// Deregister a worker and close its connection.
    pub async fn drop_worker(&self, wid: WorkerId) -> Result<(), SchedError> {
        self.send(SchedMsg::DropWorker(wid)).await
    }

    /// Queue a task and wait for its result.
    ///
    /// Returns once `work` has finished on some worker, once `prepare` or
    /// `work` has failed, when `ctx` is cancelled, or when the scheduler
    /// closes. The request's priority is taken from `ctx`.
    pub async fn schedule<P, PF, W, WF>(
        &self,
        ctx: &RequestContext,
        sector: SectorId,
        task_type: TaskType,
        sel: Arc<dyn WorkerSelector>,
        prepare: P,
        work: W,
    ) -> Result<(), SchedError>
    where
        P: FnOnce(RequestContext, Arc<dyn Worker>) -> PF + Send + Sync + 'static,
        PF: Future<Output = anyhow::Result<()>> + Send + 'static,
        W: FnOnce(RequestContext, Arc<dyn Worker>) -> WF + Send + Sync + 'static,
        WF: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (ret, rx) = oneshot::channel();
        let req = WorkerRequest {
            id: Uuid::new_v4(),
            sector,
            task_type,
            priority: ctx.priority(),
            sel,
            prepare: action(prepare),
            work: action(work),
            start: Utc::now(),
            ret: Responder::new(ret, sector, task_type),
            ctx: ctx.clone(),
        };

        tokio::select! {
            sent = self.tx.send(SchedMsg::Schedule(req)) => {
                if sent.is_err() {
                    return Err(SchedError::Closing);
                }
            }
            _ = self.closing.cancelled() => return Err(SchedError::Closing),
            _ = ctx.cancelled() => return Err(SchedError::Cancelled),
        }

        tokio::select! {
            biased;
            resp = rx => resp.unwrap_or(Err(SchedError::Abandoned)),
            _ = ctx.cancelled() => Err(SchedError::Cancelled),
            _ = self.closing.cancelled() => Err(SchedError::Closing),
        }
    }

    /// Claimed resources of every connected worker.
    pub async fn worker_stats(&self) -> HashMap<WorkerId, WorkerStats> {
        let mut out = HashMap::new();
        for handle in self.workers().await {
            out.insert(handle.id(), handle.stats().await);
        }
        out
    }

    /// Running and queued jobs of every connected worker.
    pub async fn worker_jobs(&self) -> HashMap<WorkerId, Vec<WorkerJob>> {
        self.workers()
            .await
            .into_iter()
            .map(|handle| (handle.id(), handle.jobs()))
            .collect()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop accepting work, fail queued requests and close every worker.
    /// Resolves once the arbitration loop has shut down.
    pub async fn close(&self) {
        info!("scheduler close requested");
        self.closing.cancel();
        self.closed.cancelled().await;
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    async fn workers(&self) -> Vec<Arc<WorkerHandle>> {
        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.send(SchedMsg::Workers(reply)).await {
            warn!(error = %e, "listing workers");
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    async fn send(&self, msg: SchedMsg) -> Result<(), SchedError> {
        tokio::select! {
            sent = self.tx.send(msg) => sent.map_err(|_| SchedError::Closing),
            _ = self.closing.cancelled() => Err(SchedError::Closing),
        }
    }
}
