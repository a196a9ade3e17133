use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Priority;

/// Scheduler operational metrics.
///
/// Execution counters are updated by worker threads after each invocation;
/// the pending/utilization fields are filled in when a snapshot is taken
/// via [`Scheduler::metrics`](crate::Scheduler::metrics).
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Total invocations executed by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Invocations whose body returned an error.
    pub tasks_failed: u64,
    /// Invocations whose body panicked.
    pub tasks_panicked: u64,
    /// Invocations dequeued by cancellation without executing.
    pub tasks_canceled: u64,
    /// Number of invocations pending per priority bucket.
    pub tasks_pending: HashMap<Priority, usize>,
    /// Worker utilization ratio (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Average invocation duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last execution time by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Task groups that reached `Finished` or `Canceled`.
    pub groups_finished: u64,
    /// Frames completed via `finish_frame_tasks`.
    pub frames_finished: u64,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            tasks_executed: HashMap::new(),
            tasks_failed: 0,
            tasks_panicked: 0,
            tasks_canceled: 0,
            tasks_pending: HashMap::new(),
            worker_utilization: 0.0,
            avg_task_duration: HashMap::new(),
            last_run: HashMap::new(),
            groups_finished: 0,
            frames_finished: 0,
        }
    }
}

impl SchedulerMetrics {
    /// Record one successful invocation.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        // Update rolling average duration
        let count = self.tasks_executed[task_name];
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    pub fn record_panic(&mut self) {
        self.tasks_panicked += 1;
    }

    pub fn record_canceled(&mut self, count: usize) {
        self.tasks_canceled += count as u64;
    }

    pub fn record_groups_finished(&mut self, count: usize) {
        self.groups_finished += count as u64;
    }

    pub fn record_frame(&mut self) {
        self.frames_finished += 1;
    }
}
