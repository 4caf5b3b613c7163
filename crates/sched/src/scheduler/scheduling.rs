use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sealer_core::{resource_table, ProofType, RequestContext, TaskType};

use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::metrics::SchedulerMetrics;
use crate::request::WorkerRequest;
use crate::request_queue::RequestQueue;
use crate::selector::WorkerSelector;
use crate::worker::{WorkerHandle, WorkerId};

use super::execution::WorkerLoop;
use super::{SchedMsg, SchedWindow, SchedWindowRequest};

/// State owned by the arbitration loop. Only the loop task touches it.
pub(crate) struct SchedCore {
    pub(super) spt: ProofType,
    pub(super) sched_windows: usize,
    pub(super) selector_timeout: Duration,
    pub(super) workers: HashMap<WorkerId, Arc<WorkerHandle>>,
    pub(super) open_windows: Vec<SchedWindowRequest>,
    pub(super) sched_queue: RequestQueue<WorkerRequest>,
    pub(super) tx: mpsc::Sender<SchedMsg>,
    pub(super) closing: CancellationToken,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl SchedCore {
    pub(super) fn new(
        config: &SchedConfig,
        tx: mpsc::Sender<SchedMsg>,
        closing: CancellationToken,
        metrics: Arc<RwLock<SchedulerMetrics>>,
    ) -> Self {
        Self {
            spt: config.seal_proof,
            sched_windows: config.sched_windows,
            selector_timeout: config.selector_timeout(),
            workers: HashMap::new(),
            open_windows: Vec::new(),
            sched_queue: RequestQueue::new(),
            tx,
            closing,
            metrics,
        }
    }

    /// Consume control messages until the scheduler closes, then shut down.
    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<SchedMsg>, closed: CancellationToken) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                _ = self.closing.cancelled() => break,
            }
        }

        rx.close();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                SchedMsg::Schedule(req) => req.ret.close(),
                SchedMsg::Requeue(reqs) => reqs.into_iter().for_each(|req| req.ret.close()),
                _ => {}
            }
        }
        self.close().await;
        closed.cancel();
    }

    pub(super) async fn handle(&mut self, msg: SchedMsg) {
        match msg {
            SchedMsg::NewWorker(handle) => self.new_worker(handle),
            SchedMsg::DropWorker(wid) => self.drop_worker(wid),
            SchedMsg::Schedule(req) => {
                debug!(sector = %req.sector, task = %req.task_type, priority = req.priority, "queued request");
                self.sched_queue.push(req);
                self.try_sched().await;
            }
            SchedMsg::Requeue(reqs) => {
                for req in reqs {
                    debug!(sector = %req.sector, task = %req.task_type, "requeued undelivered request");
                    self.sched_queue.push(req);
                }
                self.try_sched().await;
            }
            SchedMsg::WindowRequest(req) => {
                if self.workers.contains_key(&req.worker) {
                    self.open_windows.push(req);
                    self.try_sched().await;
                } else {
                    debug!(worker = %req.worker, "ignoring window request from dropped worker");
                }
            }
            SchedMsg::Workers(reply) => {
                let _ = reply.send(self.workers.values().cloned().collect());
            }
        }
        self.update_gauges();
    }

    fn new_worker(&mut self, handle: Arc<WorkerHandle>) {
        let wid = handle.id();
        info!(
            worker = %wid,
            hostname = %handle.info().hostname,
            cpus = handle.info().resources.cpus,
            gpus = handle.info().resources.gpus.len(),
            "worker connected"
        );
        self.workers.insert(wid, handle.clone());

        let tx = self.tx.clone();
        let closing = self.closing.clone();
        let watched = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watched.closing().cancelled() => {
                    let _ = tx.send(SchedMsg::DropWorker(wid)).await;
                }
                _ = closing.cancelled() => {}
            }
        });

        let worker_loop = WorkerLoop::new(
            handle,
            self.spt,
            self.sched_windows,
            self.tx.clone(),
            self.closing.clone(),
            self.metrics.clone(),
        );
        tokio::spawn(worker_loop.run());
    }

    /// Forget a worker: discard its open windows and close its connection.
    ///
    /// Tasks it is already running finish on their own and still respond.
    pub(super) fn drop_worker(&mut self, wid: WorkerId) {
        let Some(handle) = self.workers.remove(&wid) else {
            return;
        };
        warn!(worker = %wid, hostname = %handle.info().hostname, "dropping worker");

        handle.mark_closing();
        self.open_windows.retain(|w| w.worker != wid);

        tokio::spawn(async move {
            if let Err(e) = handle.worker().close().await {
                warn!(worker = %wid, error = %e, "closing dropped worker");
            }
        });
    }

    async fn close(&mut self) {
        info!(queued = self.sched_queue.len(), workers = self.workers.len(), "scheduler closing");

        while let Some(req) = self.sched_queue.pop() {
            req.ret.close();
        }
        self.open_windows.clear();

        for (wid, handle) in self.workers.drain() {
            handle.mark_closing();
            if let Err(e) = handle.worker().close().await {
                warn!(worker = %wid, error = %e, "closing worker");
            }
        }
        self.update_gauges();
    }

    /// Drop requests whose callers have already given up.
    fn prune_cancelled(&mut self) {
        for req in self.sched_queue.extract_if(|req| req.ctx.is_cancelled()) {
            debug!(sector = %req.sector, task = %req.task_type, "removing cancelled request");
            req.respond(Err(SchedError::Cancelled));
        }
    }

    /// Arbitrate until no assigned request bounces off a dead window.
    pub(super) async fn try_sched(&mut self) {
        while self.sched_pass().await {}
    }

    /// One arbitration pass over the queue and the open windows.
    ///
    /// Returns true if requests had to be put back in the queue because
    /// their window could not be delivered.
    async fn sched_pass(&mut self) -> bool {
        self.prune_cancelled();

        let queue_len = self.sched_queue.len();
        let window_count = self.open_windows.len();
        debug!(queued = queue_len, open_windows = window_count, "trySched");
        if queue_len == 0 || window_count == 0 {
            return false;
        }

        let mut windows: Vec<SchedWindow> = (0..window_count).map(|_| SchedWindow::new()).collect();
        let order = self.sched_queue.priority_order();
        let mut acceptable: Vec<Vec<usize>> = vec![Vec::new(); queue_len];

        // Step 1: which windows could take each request, best first.
        for &sqi in &order {
            let (sel, ctx, task_type) = {
                let Some(task) = self.sched_queue.get(sqi) else {
                    continue;
                };
                (task.sel.clone(), task.ctx.clone(), task.task_type)
            };
            let need = resource_table(task_type, self.spt);

            for (wnd, window_req) in self.open_windows.iter().enumerate() {
                let Some(worker) = self.workers.get(&window_req.worker) else {
                    continue;
                };
                // Disconnected, its drop is still in flight.
                if worker.closing().is_cancelled() {
                    continue;
                }

                // Simulated ledgers are all empty here; this only filters out
                // workers too small for the task at all.
                if !windows[wnd]
                    .allocated
                    .can_handle_request(&need, window_req.worker, &worker.info().resources)
                {
                    continue;
                }

                match sel.ok(&ctx, task_type, self.spt, worker).await {
                    Ok(true) => acceptable[sqi].push(wnd),
                    Ok(false) => {}
                    Err(e) => error!(worker = %window_req.worker, error = %e, "trySched(1) req.sel.ok error"),
                }
            }

            if acceptable[sqi].is_empty() {
                continue;
            }

            acceptable[sqi].shuffle(&mut rand::thread_rng());
            self.sort_by_preference(&sel, &ctx, task_type, &mut acceptable[sqi]).await;
        }

        // Step 2: walk the queue again and fill windows.
        let mut assigned = Vec::new();
        for &sqi in &order {
            let Some(task) = self.sched_queue.get(sqi) else {
                continue;
            };
            let need = resource_table(task.task_type, self.spt);

            for &wnd in &acceptable[sqi] {
                let wid = self.open_windows[wnd].worker;
                let Some(worker) = self.workers.get(&wid) else {
                    continue;
                };
                let wr = &worker.info().resources;

                debug!(sector = %task.sector, task = %task.task_type, worker = %wid, window = wnd, "trySched try assign");

                if !windows[wnd].allocated.can_handle_request(&need, wid, wr) {
                    continue;
                }

                debug!(sector = %task.sector, task = %task.task_type, worker = %wid, window = wnd, "assigned");
                windows[wnd].allocated.add(wr, &need);
                assigned.push((task.id, wnd));
                break;
            }
        }

        if assigned.is_empty() {
            return false;
        }

        for (id, wnd) in assigned {
            if let Some(req) = self.sched_queue.remove_by_id(&id) {
                windows[wnd].todo.push_back(req);
            }
        }

        // Step 3: hand out filled windows and retire their requests.
        let mut scheduled = HashSet::new();
        let mut dead = HashSet::new();
        let mut requeue = Vec::new();
        for (wnd, window) in windows.into_iter().enumerate() {
            if window.todo.is_empty() {
                continue;
            }
            scheduled.insert(wnd);

            let window_req = &self.open_windows[wnd];
            if dead.contains(&window_req.worker) {
                requeue.extend(window.todo);
                continue;
            }
            match window_req.done.try_send(window) {
                Ok(()) => {}
                Err(TrySendError::Full(window)) => {
                    error!(worker = %window_req.worker, "expected sched window channel to have free capacity");
                    requeue.extend(window.todo);
                }
                Err(TrySendError::Closed(window)) => {
                    debug!(worker = %window_req.worker, "worker loop gone before window delivery");
                    dead.insert(window_req.worker);
                    requeue.extend(window.todo);
                }
            }
        }

        let open = std::mem::take(&mut self.open_windows);
        self.open_windows = open
            .into_iter()
            .enumerate()
            .filter(|(wnd, window_req)| !scheduled.contains(wnd) && !dead.contains(&window_req.worker))
            .map(|(_, window_req)| window_req)
            .collect();

        let retry = !requeue.is_empty();
        for req in requeue {
            self.sched_queue.push(req);
        }
        retry
    }

    /// Stable insertion sort of candidate windows by selector preference.
    ///
    /// Windows of the same worker keep their age order (older first).
    async fn sort_by_preference(
        &self,
        sel: &Arc<dyn WorkerSelector>,
        ctx: &RequestContext,
        task_type: TaskType,
        wnds: &mut [usize],
    ) {
        for i in 1..wnds.len() {
            let mut j = i;
            while j > 0 && self.prefer(sel, ctx, task_type, wnds[j], wnds[j - 1]).await {
                wnds.swap(j, j - 1);
                j -= 1;
            }
        }
    }

    async fn prefer(
        &self,
        sel: &Arc<dyn WorkerSelector>,
        ctx: &RequestContext,
        task_type: TaskType,
        a: usize,
        b: usize,
    ) -> bool {
        let wa = self.open_windows[a].worker;
        let wb = self.open_windows[b].worker;
        if wa == wb {
            return a < b;
        }
        let (Some(ha), Some(hb)) = (self.workers.get(&wa), self.workers.get(&wb)) else {
            return false;
        };

        let cmp = sel.cmp(ctx, task_type, ha, hb);
        match tokio::time::timeout(self.selector_timeout, cmp).await {
            Ok(Ok(preferred)) => preferred,
            Ok(Err(e)) => {
                error!(error = %e, "selecting best worker");
                false
            }
            Err(_) => {
                error!(timeout = ?self.selector_timeout, "selector cmp timed out");
                false
            }
        }
    }

    pub(super) fn update_gauges(&self) {
        let mut m = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        m.queue_depth = self.sched_queue.len();
        m.open_windows = self.open_windows.len();
        m.workers = self.workers.len();
    }
}
