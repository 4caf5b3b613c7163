//! Worker hardware model and the static per-task resource requirements.

use serde::{Deserialize, Serialize};

use crate::task::{ProofType, TaskType};

pub const MIB: u64 = 1 << 20;

/// Hardware a worker advertises when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResources {
    pub mem_physical: u64,
    pub mem_swap: u64,
    /// Used by the system / other processes.
    #[serde(default)]
    pub mem_reserved: u64,
    /// Logical cores.
    pub cpus: u64,
    #[serde(default)]
    pub gpus: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub hostname: String,
    pub resources: WorkerResources,
}

/// What a single task of some kind needs from the worker running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub min_memory: u64,
    pub max_memory: u64,
    /// Threads used; -1 means the task will use every core.
    pub threads: i32,
    pub can_gpu: bool,
    /// Fixed overhead of the task kind, counted on admission only.
    pub base_min_memory: u64,
}

impl Resources {
    pub fn multi_thread(&self) -> bool {
        self.threads == -1
    }

    /// CPU share claimed on a worker with `cpus` cores.
    pub fn cpu_need(&self, cpus: u64) -> u64 {
        if self.multi_thread() {
            cpus
        } else {
            self.threads.max(0) as u64
        }
    }
}

const fn res(max_memory: u64, min_memory: u64, threads: i32, can_gpu: bool, base_min_memory: u64) -> Resources {
    Resources {
        min_memory,
        max_memory,
        threads,
        can_gpu,
        base_min_memory,
    }
}

/// Static resource table keyed by task kind and seal proof.
pub fn resource_table(task: TaskType, proof: ProofType) -> Resources {
    use ProofType::*;

    match task {
        TaskType::AddPiece => match proof {
            StackedDrg64GiB => res(8 << 30, 8 << 30, 1, false, 1 << 30),
            StackedDrg32GiB => res(4 << 30, 4 << 30, 1, false, 1 << 30),
            StackedDrg512MiB => res(1 << 30, 1 << 30, 1, false, 1 << 30),
            StackedDrg2KiB => res(2 << 10, 2 << 10, 1, false, 2 << 10),
            StackedDrg8MiB => res(8 << 20, 8 << 20, 1, false, 8 << 20),
        },
        TaskType::PreCommit1 | TaskType::Unseal => match proof {
            StackedDrg64GiB => res(128 << 30, 112 << 30, 1, false, 10 << 20),
            StackedDrg32GiB => res(64 << 30, 56 << 30, 1, false, 10 << 20),
            StackedDrg512MiB => res(768 << 20, 768 << 20, 1, false, 1 << 20),
            StackedDrg2KiB => res(2 << 10, 2 << 10, 1, false, 2 << 10),
            StackedDrg8MiB => res(8 << 20, 8 << 20, 1, false, 8 << 20),
        },
        TaskType::PreCommit2 => match proof {
            StackedDrg64GiB => res(64 << 30, 64 << 30, -1, true, 60 << 30),
            StackedDrg32GiB => res(32 << 30, 32 << 30, -1, true, 30 << 30),
            StackedDrg512MiB => res(3 << 29, 3 << 29, -1, true, 3 << 29),
            StackedDrg2KiB => res(2 << 10, 2 << 10, -1, true, 2 << 10),
            StackedDrg8MiB => res(8 << 20, 8 << 20, -1, true, 8 << 20),
        },
        TaskType::Commit1 => match proof {
            StackedDrg64GiB | StackedDrg32GiB | StackedDrg512MiB => res(1 << 30, 1 << 30, 0, false, 1 << 30),
            StackedDrg2KiB => res(2 << 10, 2 << 10, 0, false, 2 << 10),
            StackedDrg8MiB => res(8 << 20, 8 << 20, 0, false, 8 << 20),
        },
        TaskType::Commit2 => match proof {
            StackedDrg64GiB => res(190 << 30, 60 << 30, -1, true, 64 << 30),
            StackedDrg32GiB => res(150 << 30, 30 << 30, -1, true, 32 << 30),
            StackedDrg512MiB => res(3 << 29, 1 << 30, -1, true, 1 << 30),
            StackedDrg2KiB => res(2 << 10, 2 << 10, -1, true, 2 << 10),
            StackedDrg8MiB => res(8 << 20, 8 << 20, -1, true, 8 << 20),
        },
        TaskType::Fetch | TaskType::Finalize | TaskType::ReadUnsealed => res(MIB, MIB, 0, false, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_task_and_proof_has_an_entry() {
        let proofs = [
            ProofType::StackedDrg2KiB,
            ProofType::StackedDrg8MiB,
            ProofType::StackedDrg512MiB,
            ProofType::StackedDrg32GiB,
            ProofType::StackedDrg64GiB,
        ];
        for task in TaskType::ALL {
            for proof in proofs {
                let r = resource_table(task, proof);
                assert!(r.max_memory >= r.min_memory, "{task} {proof}");
            }
        }
    }

    #[test]
    fn unseal_mirrors_precommit1() {
        let p = ProofType::StackedDrg32GiB;
        assert_eq!(resource_table(TaskType::Unseal, p), resource_table(TaskType::PreCommit1, p));
        assert_eq!(resource_table(TaskType::Finalize, p), resource_table(TaskType::Fetch, p));
    }

    #[test]
    fn cpu_need_for_multi_thread_claims_every_core() {
        let pc2 = resource_table(TaskType::PreCommit2, ProofType::StackedDrg2KiB);
        assert!(pc2.multi_thread());
        assert_eq!(pc2.cpu_need(16), 16);

        let ap = resource_table(TaskType::AddPiece, ProofType::StackedDrg2KiB);
        assert_eq!(ap.cpu_need(16), 1);

        let fetch = resource_table(TaskType::Fetch, ProofType::StackedDrg2KiB);
        assert_eq!(fetch.cpu_need(16), 0);
    }
}
