//! Cooperative, multi-priority task scheduler for frame-based workloads.
//!
//! A [`Scheduler`] owns fixed worker pools (short tasks, long tasks, one
//! serialized file-access thread) plus main-thread-only buckets drained by
//! the owning thread. Work is submitted as [`Task`]s batched into task
//! groups; groups carry dependency edges on other groups, a priority
//! bucket, and a completion callback. Frame-relative priorities rotate by
//! one frame on every [`Scheduler::finish_frame_tasks`] call, and
//! [`Scheduler::parallel_for_range`] splits data-parallel ranges into
//! batched chunk tasks over the same machinery.

pub mod error;
pub mod group;
pub mod metrics;
pub mod parallel_for;
mod pool;
mod queues;
pub mod scheduler;
pub mod task;
pub mod types;

pub use error::{SchedError, TaskError};
pub use group::TaskGroupId;
pub use metrics::SchedulerMetrics;
pub use parallel_for::{determine_threading, ChunkPlan, ParallelForParams};
pub use scheduler::Scheduler;
pub use task::{ClosureTask, Task};
pub use types::{
    CancelOutcome, GroupState, NestingMode, OnTaskRunning, Priority, SchedulerConfig, WaitOutcome,
    WorkerKind, WorkerSnapshot, WorkerState,
};
