//! Per-worker resource accounting and admission control.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sealer_core::{CtxCond, Resources, WorkerResources};

use crate::error::SchedError;
use crate::worker::WorkerId;

/// Claimed capacity on one worker.
#[derive(Debug, Default, Clone)]
pub struct ActiveResources {
    pub mem_used_min: u64,
    pub mem_used_max: u64,
    pub cpu_use: u64,
    gpu_tasks: u32,
    cond: Arc<CtxCond>,
}

impl ActiveResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gpu_used(&self) -> bool {
        self.gpu_tasks > 0
    }

    pub fn can_handle_request(&self, need: &Resources, wid: WorkerId, res: &WorkerResources) -> bool {
        let min_need = self.mem_used_min + need.min_memory + need.base_min_memory;
        if res.mem_reserved + min_need > res.mem_physical {
            debug!(
                worker = %wid,
                need = min_need,
                physical = res.mem_physical,
                reserved = res.mem_reserved,
                "not enough physical memory"
            );
            return false;
        }

        let max_need = self.mem_used_max + need.max_memory + need.base_min_memory;
        if res.mem_reserved + max_need > res.mem_physical + res.mem_swap {
            debug!(
                worker = %wid,
                need = max_need,
                physical = res.mem_physical,
                swap = res.mem_swap,
                reserved = res.mem_reserved,
                "not enough virtual memory"
            );
            return false;
        }

        let cpu_need = need.cpu_need(res.cpus);
        if self.cpu_use + cpu_need > res.cpus {
            debug!(
                worker = %wid,
                need = cpu_need,
                in_use = self.cpu_use,
                cpus = res.cpus,
                "not enough threads"
            );
            return false;
        }

        if !res.gpus.is_empty() && need.can_gpu && self.gpu_used() {
            debug!(worker = %wid, "GPU in use");
            return false;
        }

        true
    }

    pub fn add(&mut self, res: &WorkerResources, need: &Resources) {
        if need.can_gpu {
            self.gpu_tasks += 1;
        }
        self.cpu_use += need.cpu_need(res.cpus);
        self.mem_used_min += need.min_memory;
        self.mem_used_max += need.max_memory;
    }

    /// Return a claim made with [`add`](Self::add) and wake every waiter.
    pub fn free(&mut self, res: &WorkerResources, need: &Resources) {
        if need.can_gpu {
            self.gpu_tasks = self.gpu_tasks.saturating_sub(1);
        }
        self.cpu_use = self.cpu_use.saturating_sub(need.cpu_need(res.cpus));
        self.mem_used_min = self.mem_used_min.saturating_sub(need.min_memory);
        self.mem_used_max = self.mem_used_max.saturating_sub(need.max_memory);
        self.cond.broadcast();
    }

    /// Highest of the CPU, physical-memory and virtual-memory load ratios.
    pub fn utilization(&self, res: &WorkerResources) -> f64 {
        let mut max = 0.0_f64;

        if res.cpus > 0 {
            max = max.max(self.cpu_use as f64 / res.cpus as f64);
        }

        if res.mem_physical > 0 {
            let min = (self.mem_used_min + res.mem_reserved) as f64 / res.mem_physical as f64;
            max = max.max(min);
        }

        let virt = res.mem_physical + res.mem_swap;
        if virt > 0 {
            let peak = (self.mem_used_max + res.mem_reserved) as f64 / virt as f64;
            max = max.max(peak);
        }

        max
    }

    pub(crate) fn cond(&self) -> Arc<CtxCond> {
        self.cond.clone()
    }
}

/// Which of a worker's two ledgers a claim is made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Preparing,
    Active,
}

/// The ledger pair guarded by one lock per worker.
#[derive(Debug, Default)]
pub struct WorkerLedgers {
    pub preparing: ActiveResources,
    pub active: ActiveResources,
}

impl WorkerLedgers {
    pub fn pool(&self, pool: Pool) -> &ActiveResources {
        match pool {
            Pool::Preparing => &self.preparing,
            Pool::Active => &self.active,
        }
    }

    pub fn pool_mut(&mut self, pool: Pool) -> &mut ActiveResources {
        match pool {
            Pool::Preparing => &mut self.preparing,
            Pool::Active => &mut self.active,
        }
    }
}

/// One task's demand against one worker.
#[derive(Debug, Clone, Copy)]
pub struct Claim<'a> {
    pub worker: WorkerId,
    pub resources: &'a WorkerResources,
    pub need: Resources,
}

/// Hold a claim on `pool` for as long as the future produced by `body` runs.
///
/// Entered holding `guard` (taken from `lock`). While admission fails the
/// lock is released and the call waits for the pool to free capacity or for
/// `ctx` to be cancelled. Once admitted the claim is added and `body` is
/// invoked with the ledgers still locked; the lock is released while its
/// future runs and taken again to free the claim. The lock is held on
/// return on every path.
pub async fn with_resources<'a, F, Fut>(
    lock: &'a Mutex<WorkerLedgers>,
    mut guard: MutexGuard<'a, WorkerLedgers>,
    pool: Pool,
    claim: &Claim<'_>,
    ctx: &CancellationToken,
    body: F,
) -> (MutexGuard<'a, WorkerLedgers>, Result<Fut::Output, SchedError>)
where
    F: FnOnce(&mut WorkerLedgers) -> Fut,
    Fut: Future,
{
    while !guard
        .pool(pool)
        .can_handle_request(&claim.need, claim.worker, claim.resources)
    {
        let cond = guard.pool(pool).cond();
        let (relocked, waited) = cond.wait(lock, guard, ctx).await;
        guard = relocked;
        if let Err(err) = waited {
            return (guard, Err(err.into()));
        }
    }

    guard.pool_mut(pool).add(claim.resources, &claim.need);
    let fut = body(&mut guard);
    drop(guard);

    let out = fut.await;

    let mut guard = lock.lock().await;
    guard.pool_mut(pool).free(claim.resources, &claim.need);
    (guard, Ok(out))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sealer_core::{resource_table, ProofType, TaskType, MIB};

    use super::*;

    fn worker(physical: u64, swap: u64, cpus: u64, gpus: usize) -> WorkerResources {
        WorkerResources {
            mem_physical: physical,
            mem_swap: swap,
            mem_reserved: 0,
            cpus,
            gpus: (0..gpus).map(|i| format!("gpu-{i}")).collect(),
        }
    }

    fn need(task: TaskType) -> Resources {
        resource_table(task, ProofType::StackedDrg8MiB)
    }

    #[test]
    fn admits_up_to_memory_capacity() {
        // One 8MiB PC1 needs 8MiB + 8MiB base.
        let wr = worker(16 * MIB, 0, 8, 0);
        let pc1 = need(TaskType::PreCommit1);
        let mut ledger = ActiveResources::new();

        assert!(ledger.can_handle_request(&pc1, WorkerId(1), &wr));
        ledger.add(&wr, &pc1);
        assert!(!ledger.can_handle_request(&pc1, WorkerId(1), &wr));

        ledger.free(&wr, &pc1);
        assert_eq!(ledger.mem_used_max, 0);
        assert!(ledger.can_handle_request(&pc1, WorkerId(1), &wr));
    }

    #[test]
    fn reserved_memory_counts_against_capacity() {
        let mut wr = worker(16 * MIB, 0, 8, 0);
        wr.mem_reserved = MIB;
        let ledger = ActiveResources::new();
        assert!(!ledger.can_handle_request(&need(TaskType::PreCommit1), WorkerId(1), &wr));
    }

    #[test]
    fn swap_extends_peak_but_not_min() {
        let pc1 = need(TaskType::PreCommit1);
        let ledger = ActiveResources {
            mem_used_min: 0,
            mem_used_max: 8 * MIB,
            ..ActiveResources::default()
        };
        assert!(!ledger.can_handle_request(&pc1, WorkerId(1), &worker(16 * MIB, 0, 8, 0)));
        assert!(ledger.can_handle_request(&pc1, WorkerId(1), &worker(16 * MIB, 8 * MIB, 8, 0)));
    }

    #[test]
    fn multi_threaded_task_claims_every_core() {
        let wr = worker(1 << 30, 0, 4, 0);
        let pc2 = need(TaskType::PreCommit2);
        let ap = need(TaskType::AddPiece);
        let mut ledger = ActiveResources::new();

        ledger.add(&wr, &ap);
        assert!(!ledger.can_handle_request(&pc2, WorkerId(1), &wr));
        ledger.free(&wr, &ap);

        ledger.add(&wr, &pc2);
        assert_eq!(ledger.cpu_use, 4);
        assert!(!ledger.can_handle_request(&ap, WorkerId(1), &wr));
    }

    #[test]
    fn gpu_is_exclusive_on_gpu_workers() {
        let wr = worker(1 << 30, 0, 64, 1);
        let mut c2 = need(TaskType::Commit2);
        c2.threads = 1;
        let mut ledger = ActiveResources::new();

        ledger.add(&wr, &c2);
        assert!(ledger.gpu_used());
        assert!(!ledger.can_handle_request(&c2, WorkerId(1), &wr));
        assert!(ledger.can_handle_request(&need(TaskType::AddPiece), WorkerId(1), &wr));

        ledger.free(&wr, &c2);
        assert!(!ledger.gpu_used());
        assert!(ledger.can_handle_request(&c2, WorkerId(1), &wr));
    }

    #[test]
    fn utilization_takes_the_busiest_dimension() {
        let wr = worker(100 * MIB, 100 * MIB, 10, 0);
        let ledger = ActiveResources {
            mem_used_min: 50 * MIB,
            mem_used_max: 20 * MIB,
            cpu_use: 2,
            ..ActiveResources::default()
        };
        assert!((ledger.utilization(&wr) - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn with_resources_waits_for_free() {
        let wr = worker(16 * MIB, 0, 8, 0);
        let pc1 = need(TaskType::PreCommit1);
        let lock = Arc::new(Mutex::new(WorkerLedgers::default()));
        lock.lock().await.active.add(&wr, &pc1);

        let waiter = {
            let lock = lock.clone();
            let wr = wr.clone();
            tokio::spawn(async move {
                let claim = Claim {
                    worker: WorkerId(1),
                    resources: &wr,
                    need: pc1,
                };
                let guard = lock.lock().await;
                let (guard, out) = with_resources(
                    &lock,
                    guard,
                    Pool::Active,
                    &claim,
                    &CancellationToken::new(),
                    |ledgers| {
                        let used = ledgers.active.mem_used_max;
                        async move { used }
                    },
                )
                .await;
                (guard.active.mem_used_max, out.unwrap())
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        lock.lock().await.active.free(&wr, &pc1);

        let (after, during) = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(during, 8 * MIB);
        assert_eq!(after, 0);
    }

    #[tokio::test]
    async fn with_resources_cancelled_wait_keeps_lock() {
        let wr = worker(16 * MIB, 0, 8, 0);
        let pc1 = need(TaskType::PreCommit1);
        let lock = Mutex::new(WorkerLedgers::default());
        lock.lock().await.active.add(&wr, &pc1);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let claim = Claim {
            worker: WorkerId(1),
            resources: &wr,
            need: pc1,
        };
        let guard = lock.lock().await;
        let (guard, out) = with_resources(&lock, guard, Pool::Active, &claim, &ctx, |_| async {}).await;

        assert!(matches!(out, Err(SchedError::Cancelled)));
        assert_eq!(guard.active.mem_used_max, 8 * MIB);
    }
}
