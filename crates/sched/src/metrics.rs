use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sealer_core::TaskType;

/// Scheduler operational metrics exposed to tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks whose execute step succeeded, by task kind.
    pub tasks_executed: HashMap<TaskType, u64>,
    /// Tasks whose prepare or execute step failed, by task kind.
    pub tasks_failed: HashMap<TaskType, u64>,
    /// Average prepare-to-completion time of successful tasks.
    pub avg_task_duration: HashMap<TaskType, Duration>,
    /// Last completion time by task kind.
    pub last_run: HashMap<TaskType, DateTime<Utc>>,
    /// Requests waiting for a window.
    pub queue_depth: usize,
    /// Window requests not yet filled.
    pub open_windows: usize,
    /// Connected workers.
    pub workers: usize,
}

impl SchedulerMetrics {
    /// Record a successful task execution.
    pub fn record_execution(&mut self, task: TaskType, duration: Duration) {
        let count = {
            let executed = self.tasks_executed.entry(task).or_default();
            *executed += 1;
            *executed
        };
        self.last_run.insert(task, Utc::now());

        let prev_avg = self.avg_task_duration.get(&task).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task, new_avg);
    }

    pub fn record_failure(&mut self, task: TaskType) {
        *self.tasks_failed.entry(task).or_default() += 1;
        self.last_run.insert(task, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(TaskType::PreCommit1, Duration::from_millis(100));

        assert_eq!(m.tasks_executed[&TaskType::PreCommit1], 1);
        assert!(m.last_run.contains_key(&TaskType::PreCommit1));
        assert_eq!(
            m.avg_task_duration[&TaskType::PreCommit1],
            Duration::from_millis(100)
        );
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(TaskType::Commit2, Duration::from_millis(100));
        m.record_execution(TaskType::Commit2, Duration::from_millis(200));

        assert_eq!(m.tasks_executed[&TaskType::Commit2], 2);
        let avg = m.avg_task_duration[&TaskType::Commit2].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn failures_are_counted_separately() {
        let mut m = SchedulerMetrics::default();
        m.record_failure(TaskType::AddPiece);
        m.record_failure(TaskType::AddPiece);

        assert_eq!(m.tasks_failed[&TaskType::AddPiece], 2);
        assert!(!m.tasks_executed.contains_key(&TaskType::AddPiece));
        assert!(!m.avg_task_duration.contains_key(&TaskType::AddPiece));
    }

    #[test]
    fn serializes_task_kinds_as_map_keys() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(TaskType::Finalize, Duration::from_millis(5));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["tasks_executed"]["seal/v0/finalize"], 1);
        assert_eq!(json["queue_depth"], 0);
    }
}
