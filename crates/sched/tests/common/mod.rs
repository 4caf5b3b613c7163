//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sealer_core::{ProofType, WorkerResources, MIB};
use sealer_sched::{SchedConfig, Scheduler};

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const SETTLE: Duration = Duration::from_millis(100);

pub fn start(seal_proof: ProofType, sched_windows: usize) -> Scheduler {
    Scheduler::start(SchedConfig {
        seal_proof,
        sched_windows,
        ..SchedConfig::default()
    })
    .unwrap()
}

pub fn resources(mem_physical: u64, cpus: u64, gpus: usize) -> WorkerResources {
    WorkerResources {
        mem_physical,
        mem_swap: 0,
        mem_reserved: 0,
        cpus,
        gpus: (0..gpus).map(|i| format!("gpu-{i}")).collect(),
    }
}

/// Room for exactly one 8MiB-class PC1 (8MiB claimed + 8MiB base).
pub fn one_pc1_8mib() -> WorkerResources {
    resources(16 * MIB, 8, 0)
}

/// Wait until `n` requests sit in the scheduler queue.
pub async fn wait_queued(sched: &Scheduler, n: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while sched.metrics().queue_depth != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("queue never reached {n} requests"));
}

/// Tracks how many tasks are inside a section and the most seen at once.
#[derive(Debug, Default)]
pub struct Gauge {
    current: std::sync::Mutex<(u64, u64)>,
}

impl Gauge {
    pub fn enter(&self, amount: u64) {
        let mut g = self.current.lock().unwrap();
        g.0 += amount;
        g.1 = g.1.max(g.0);
    }

    pub fn leave(&self, amount: u64) {
        self.current.lock().unwrap().0 -= amount;
    }

    pub fn peak(&self) -> u64 {
        self.current.lock().unwrap().1
    }
}

pub fn gauge() -> Arc<Gauge> {
    Arc::new(Gauge::default())
}
