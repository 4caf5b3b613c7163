//! Run a scheduling scenario against in-process simulated workers.
//!
//! The scenario (TOML) lists scheduler settings, workers with their hardware
//! and accepted task kinds, and tasks with priorities and durations. Every
//! task goes through the real scheduler; the report is printed as JSON.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sealer_core::{RequestContext, SectorId, TaskType, WorkerResources};
use sealer_sched::{
    SchedConfig, Scheduler, SchedulerMetrics, SimWorker, TaskSelector, WorkerId, WorkerStats,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Scheduler simulator for sealing workloads.
#[derive(Parser, Debug)]
#[command(name = "sched-sim", version, about)]
struct Cli {
    /// Scenario TOML file. A built-in scenario runs when omitted.
    #[arg(long, env = "SEALER_SIM_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Miner id used for sector ids.
    #[arg(long, env = "SEALER_SIM_MINER", default_value_t = 1000)]
    miner: u64,

    /// Give up on tasks still unfinished after this many seconds.
    #[arg(long, env = "SEALER_SIM_DEADLINE", default_value_t = 60)]
    deadline: u64,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,
}

// ── Scenario ────────────────────────────────────────────────────────

const BUILTIN_SCENARIO: &str = r#"
[sched]
seal_proof = "8MiB"
sched_windows = 2

[[workers]]
hostname = "pc1-box"
task_types = ["AP", "PC1", "FIN"]
[workers.resources]
mem_physical = 67108864
mem_swap = 0
cpus = 8

[[workers]]
hostname = "gpu-box"
task_types = ["PC2", "C1", "C2"]
[workers.resources]
mem_physical = 134217728
mem_swap = 0
cpus = 16
gpus = ["RTX 3090"]

[[tasks]]
sector = 1
task = "PC1"
count = 6
work_ms = 40

[[tasks]]
sector = 100
task = "PC1"
priority = 10
count = 2
work_ms = 40

[[tasks]]
sector = 200
task = "C2"
count = 3
work_ms = 30

[[tasks]]
sector = 300
task = "AP"
count = 2
prepare_ms = 5
work_ms = 10
fail = true
"#;

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    sched: SchedConfig,
    workers: Vec<WorkerSpec>,
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct WorkerSpec {
    hostname: String,
    task_types: Vec<String>,
    resources: WorkerResources,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    /// First sector number; `count` tasks use consecutive numbers.
    sector: u64,
    task: String,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_count")]
    count: u64,
    #[serde(default)]
    prepare_ms: u64,
    #[serde(default)]
    work_ms: u64,
    /// Make the execute step fail.
    #[serde(default)]
    fail: bool,
}

fn default_count() -> u64 {
    1
}

impl Scenario {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let text = match path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading scenario {}", path.display()))?,
            None => BUILTIN_SCENARIO.to_string(),
        };
        let mut scenario: Scenario = toml::from_str(&text).context("parsing scenario")?;
        scenario.sched.apply_env_overrides();
        scenario.sched.validate()?;
        if scenario.workers.is_empty() {
            bail!("scenario has no workers");
        }
        Ok(scenario)
    }
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TaskOutcome {
    sector: String,
    task: TaskType,
    priority: i32,
    ok: bool,
    error: Option<String>,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct Report {
    seal_proof: String,
    outcomes: Vec<TaskOutcome>,
    workers: HashMap<WorkerId, WorkerStats>,
    metrics: SchedulerMetrics,
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sealer_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let scenario = Scenario::load(cli.scenario.as_ref())?;

    let sched = Scheduler::start(scenario.sched.clone())?;

    for spec in &scenario.workers {
        let task_types = spec
            .task_types
            .iter()
            .map(|t| t.parse::<TaskType>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("worker {}", spec.hostname))?;
        let worker = SimWorker::new(spec.hostname.clone(), spec.resources.clone(), task_types);
        let wid = sched.add_worker(Arc::new(worker)).await?;
        info!(worker = %wid, hostname = %spec.hostname, "added sim worker");
    }

    let mut calls = Vec::new();
    for spec in &scenario.tasks {
        let task_type: TaskType = spec.task.parse()?;
        for offset in 0..spec.count {
            let sector = SectorId::new(cli.miner, spec.sector + offset);
            let sched = sched.clone();
            let priority = spec.priority;
            let prepare_for = Duration::from_millis(spec.prepare_ms);
            let work_for = Duration::from_millis(spec.work_ms);
            let fail = spec.fail;

            calls.push(tokio::spawn(async move {
                let ctx = RequestContext::new().with_priority(priority);
                let began = Instant::now();
                let res = sched
                    .schedule(
                        &ctx,
                        sector,
                        task_type,
                        Arc::new(TaskSelector),
                        move |_, _| async move {
                            tokio::time::sleep(prepare_for).await;
                            anyhow::Ok(())
                        },
                        move |_, _| async move {
                            tokio::time::sleep(work_for).await;
                            if fail {
                                bail!("simulated {task_type} failure");
                            }
                            Ok(())
                        },
                    )
                    .await;
                TaskOutcome {
                    sector: sector.to_string(),
                    task: task_type,
                    priority,
                    ok: res.is_ok(),
                    error: res.err().map(|e| e.to_string()),
                    elapsed_ms: began.elapsed().as_millis(),
                }
            }));
        }
    }
    info!(tasks = calls.len(), "scheduled scenario tasks");

    let deadline = Duration::from_secs(cli.deadline);
    let mut outcomes = Vec::with_capacity(calls.len());
    for call in calls {
        match tokio::time::timeout(deadline, call).await {
            Ok(joined) => outcomes.push(joined?),
            Err(_) => {
                warn!(deadline = ?deadline, "task did not finish in time");
            }
        }
    }

    let report = Report {
        seal_proof: sched.seal_proof().to_string(),
        outcomes,
        workers: sched.worker_stats().await,
        metrics: sched.metrics(),
    };
    sched.close().await;

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");

    Ok(())
}
