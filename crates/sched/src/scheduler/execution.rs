use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sealer_core::{resource_table, ProofType, Resources};

use crate::error::SchedError;
use crate::metrics::SchedulerMetrics;
use crate::request::WorkerRequest;
use crate::resources::{with_resources, Claim, Pool};
use crate::stats::WorkerJob;
use crate::worker::{WorkerHandle, WorkerId};

use super::{SchedMsg, SchedWindow, SchedWindowRequest};

/// Per-worker control loop: keeps window requests outstanding, receives
/// filled windows and dispatches their tasks in order.
pub(super) struct WorkerLoop {
    wid: WorkerId,
    handle: Arc<WorkerHandle>,
    spt: ProofType,
    sched_windows: usize,
    sched_tx: mpsc::Sender<SchedMsg>,
    closing: CancellationToken,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl WorkerLoop {
    pub(super) fn new(
        handle: Arc<WorkerHandle>,
        spt: ProofType,
        sched_windows: usize,
        sched_tx: mpsc::Sender<SchedMsg>,
        closing: CancellationToken,
        metrics: Arc<RwLock<SchedulerMetrics>>,
    ) -> Self {
        Self {
            wid: handle.id(),
            handle,
            spt,
            sched_windows,
            sched_tx,
            closing,
            metrics,
        }
    }

    pub(super) async fn run(self) {
        let (window_tx, mut window_rx) = mpsc::channel::<SchedWindow>(self.sched_windows);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let worker_closing = self.handle.closing().clone();

        let mut windows_requested = 0usize;
        let mut active_windows: VecDeque<SchedWindow> = VecDeque::new();

        'run: loop {
            while windows_requested < self.sched_windows {
                let req = SchedMsg::WindowRequest(SchedWindowRequest {
                    worker: self.wid,
                    done: window_tx.clone(),
                });
                tokio::select! {
                    sent = self.sched_tx.send(req) => {
                        if sent.is_err() {
                            break 'run;
                        }
                    }
                    _ = self.closing.cancelled() => break 'run,
                    _ = worker_closing.cancelled() => break 'run,
                }
                windows_requested += 1;
            }

            tokio::select! {
                biased;
                _ = self.closing.cancelled() => break 'run,
                _ = worker_closing.cancelled() => break 'run,
                Some(window) = window_rx.recv() => {
                    debug!(worker = %self.wid, tasks = window.todo.len(), "received window");
                    active_windows.push_back(window);
                }
                Some(()) = done_rx.recv() => {}
            }

            self.assign_ready(&mut active_windows, &mut windows_requested, &done_tx)
                .await;
            self.handle.publish_windows(&active_windows);
        }

        warn!(worker = %self.wid, pending_windows = active_windows.len(), "worker loop exiting");

        // Accepted windows belong to this worker and fail with it.
        for window in active_windows {
            for req in window.todo {
                req.respond(Err(SchedError::WorkerClosing));
            }
        }
        self.handle.publish_windows(&VecDeque::new());

        // Windows delivered after the loop stopped never reached the worker.
        window_rx.close();
        let mut undelivered = Vec::new();
        while let Ok(window) = window_rx.try_recv() {
            undelivered.extend(window.todo);
        }
        self.requeue(undelivered).await;
    }

    async fn requeue(&self, reqs: Vec<WorkerRequest>) {
        if reqs.is_empty() {
            return;
        }
        debug!(worker = %self.wid, count = reqs.len(), "returning undelivered requests to the scheduler");

        if let Err(mpsc::error::SendError(msg)) = self.sched_tx.send(SchedMsg::Requeue(reqs)).await {
            let SchedMsg::Requeue(reqs) = msg else {
                return;
            };
            for req in reqs {
                req.ret.close();
            }
        }
    }

    /// Dispatch tasks from the head of the pending windows while the
    /// preparing pool admits them. Stops at the first task that does not fit.
    async fn assign_ready(
        &self,
        active_windows: &mut VecDeque<SchedWindow>,
        windows_requested: &mut usize,
        done_tx: &mpsc::Sender<()>,
    ) {
        let wr = &self.handle.info().resources;

        while let Some(window) = active_windows.front_mut() {
            while let Some(head) = window.todo.front() {
                let need = resource_table(head.task_type, self.spt);

                let mut ledgers = self.handle.ledgers.lock().await;
                if !ledgers.preparing.can_handle_request(&need, self.wid, wr) {
                    return;
                }
                let Some(req) = window.todo.pop_front() else {
                    break;
                };
                ledgers.preparing.add(wr, &need);
                drop(ledgers);

                debug!(worker = %self.wid, sector = %req.sector, task = %req.task_type, "assign worker sector");
                self.assign_worker(req, need, done_tx.clone());
            }

            active_windows.pop_front();
            *windows_requested -= 1;
        }
    }

    /// Run prepare, move the claim from preparing to active, then execute.
    fn assign_worker(&self, req: WorkerRequest, need: Resources, done: mpsc::Sender<()>) {
        let wid = self.wid;
        let handle = self.handle.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let WorkerRequest {
                id,
                sector,
                task_type,
                prepare,
                work,
                start,
                ret,
                ctx,
                ..
            } = req;

            handle.job_started(WorkerJob {
                id,
                sector,
                task: task_type,
                run_wait: 0,
                start,
            });

            let began = Instant::now();
            let wr = handle.info().resources.clone();
            let worker = handle.worker().clone();

            let prepared = prepare(ctx.clone(), worker.clone()).await;

            let ledgers = handle.ledgers.lock().await;
            let result = match prepared {
                Err(err) => {
                    let mut ledgers = ledgers;
                    ledgers.preparing.free(&wr, &need);
                    drop(ledgers);
                    let _ = done.try_send(());
                    Err(SchedError::Task(err))
                }
                Ok(()) => {
                    let claim = Claim {
                        worker: wid,
                        resources: &wr,
                        need,
                    };
                    let signal = done.clone();
                    let exec_ctx = ctx.clone();
                    let (mut ledgers, out) = with_resources(
                        &handle.ledgers,
                        ledgers,
                        Pool::Active,
                        &claim,
                        ctx.token(),
                        |ledgers| {
                            ledgers.preparing.free(&wr, &need);
                            let _ = signal.try_send(());
                            work(exec_ctx, worker)
                        },
                    )
                    .await;

                    match out {
                        Ok(res) => res.map_err(SchedError::Task),
                        Err(err) => {
                            // Never admitted to the active pool.
                            ledgers.preparing.free(&wr, &need);
                            drop(ledgers);
                            let _ = done.try_send(());
                            Err(err)
                        }
                    }
                }
            };

            {
                let mut m = metrics.write().unwrap_or_else(PoisonError::into_inner);
                match &result {
                    Ok(()) => m.record_execution(task_type, began.elapsed()),
                    Err(_) => m.record_failure(task_type),
                }
            }
            handle.job_finished(&id);

            if ctx.is_cancelled() {
                warn!(worker = %wid, sector = %sector, task = %task_type, "caller cancelled while task was running");
            }
            ret.respond(result);
        });
    }
}
