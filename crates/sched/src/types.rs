use std::path::Path;

use serde::{Deserialize, Serialize};

use taktwerk_core::{env_usize, TaktError};

// ── Priorities ────────────────────────────────────────────────

/// Scheduling class of a task group. Declaration order is scheduling order:
/// a worker always drains the lowest-indexed non-empty queue of its kind.
///
/// The frame-relative buckets (`EarlyThisFrame` through `In9Frames`) are
/// positions in a ring that [`finish_frame_tasks`] advances by one frame per
/// call: what was `NextFrame` becomes `ThisFrame`. The long-running,
/// file-access and main-thread buckets do not rotate.
///
/// [`finish_frame_tasks`]: crate::Scheduler::finish_frame_tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    EarlyThisFrame,
    ThisFrame,
    LateThisFrame,
    EarlyNextFrame,
    NextFrame,
    LateNextFrame,
    In2Frames,
    In3Frames,
    In4Frames,
    In5Frames,
    In6Frames,
    In7Frames,
    In8Frames,
    In9Frames,
    LongRunningHighPriority,
    LongRunning,
    FileAccessHighPriority,
    FileAccess,
    /// Must run on the main thread before the current frame ends.
    ThisFrameMainThread,
    /// Runs on the main thread whenever there is time left in a frame.
    SomeFrameMainThread,
}

impl Priority {
    /// Number of priority buckets (and queues).
    pub const COUNT: usize = 20;

    /// Index of this bucket's queue.
    pub(crate) fn queue_index(self) -> usize {
        self as usize
    }

    /// The worker pool that executes tasks of this priority.
    pub fn worker_kind(self) -> WorkerKind {
        match self {
            Priority::EarlyThisFrame
            | Priority::ThisFrame
            | Priority::LateThisFrame
            | Priority::EarlyNextFrame
            | Priority::NextFrame
            | Priority::LateNextFrame
            | Priority::In2Frames
            | Priority::In3Frames
            | Priority::In4Frames
            | Priority::In5Frames
            | Priority::In6Frames
            | Priority::In7Frames
            | Priority::In8Frames
            | Priority::In9Frames => WorkerKind::ShortTasks,
            Priority::LongRunningHighPriority | Priority::LongRunning => WorkerKind::LongTasks,
            Priority::FileAccessHighPriority | Priority::FileAccess => WorkerKind::FileAccess,
            Priority::ThisFrameMainThread | Priority::SomeFrameMainThread => WorkerKind::MainThread,
        }
    }

    /// Whether this bucket must be drained before the current frame ends.
    pub fn is_this_frame(self) -> bool {
        matches!(
            self,
            Priority::EarlyThisFrame
                | Priority::ThisFrame
                | Priority::LateThisFrame
                | Priority::ThisFrameMainThread
        )
    }

    /// The bucket this priority becomes after one frame rotation.
    ///
    /// `In2Frames` folds into `LateThisFrame` so that work submitted as
    /// "in K frames" is drained by the K-th `finish_frame_tasks` call.
    pub(crate) fn rotated(self) -> Priority {
        match self {
            Priority::EarlyNextFrame => Priority::EarlyThisFrame,
            Priority::NextFrame => Priority::ThisFrame,
            Priority::LateNextFrame => Priority::LateThisFrame,
            Priority::In2Frames => Priority::LateThisFrame,
            Priority::In3Frames => Priority::In2Frames,
            Priority::In4Frames => Priority::In3Frames,
            Priority::In5Frames => Priority::In4Frames,
            Priority::In6Frames => Priority::In5Frames,
            Priority::In7Frames => Priority::In6Frames,
            Priority::In8Frames => Priority::In7Frames,
            Priority::In9Frames => Priority::In8Frames,
            other => other,
        }
    }
}

// ── Worker classification ─────────────────────────────────────

/// Physical thread classification a task must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    /// A thread the scheduler knows nothing about. Cannot execute tasks.
    Unknown,
    /// The thread that created the scheduler. Drains main-thread buckets.
    MainThread,
    /// Pool for short, frame-bound tasks.
    ShortTasks,
    /// Pool for long-running background tasks.
    LongTasks,
    /// Single thread serializing file I/O.
    FileAccess,
}

impl WorkerKind {
    /// Pooled kinds, in signal index order.
    pub(crate) const POOLED: [WorkerKind; 3] =
        [WorkerKind::ShortTasks, WorkerKind::LongTasks, WorkerKind::FileAccess];

    /// Index into the per-kind condition variables; pooled kinds only.
    pub(crate) fn signal_index(self) -> Option<usize> {
        match self {
            WorkerKind::ShortTasks => Some(0),
            WorkerKind::LongTasks => Some(1),
            WorkerKind::FileAccess => Some(2),
            WorkerKind::Unknown | WorkerKind::MainThread => None,
        }
    }
}

/// Coarse worker thread state for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Executing a task.
    Active,
    /// Parked, waiting for work.
    Idle,
    /// Parked inside a helpful wait for another group.
    Blocked,
}

/// Snapshot of one worker thread, as returned by
/// [`Scheduler::worker_states`](crate::Scheduler::worker_states).
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub kind: WorkerKind,
    pub state: WorkerState,
}

// ── Task and group classification ─────────────────────────────

/// Declares whether a task may itself block waiting on other scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestingMode {
    /// The task may call `wait_for_group` while executing.
    Maybe,
    /// The task runs to completion without waiting on scheduler work.
    #[default]
    Never,
}

/// What a wait or cancel call does when the group is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTaskRunning {
    WaitTillFinished,
    ReturnWithoutBlocking,
}

/// Result of [`Scheduler::wait_for_group`](crate::Scheduler::wait_for_group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The group has finished (or was canceled, or the handle was stale).
    Finished,
    /// The group had started and `ReturnWithoutBlocking` was requested, or
    /// the scheduler shut down while waiting.
    StillRunning,
}

/// Result of [`Scheduler::cancel_group`](crate::Scheduler::cancel_group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The group had already finished; nothing to cancel.
    AlreadyFinished,
    /// Every invocation was either dequeued or has drained; the group is done.
    Canceled,
    /// Invocations were still executing and `ReturnWithoutBlocking` was
    /// requested; cancellation completes asynchronously.
    StillRunning,
}

/// Lifecycle state of a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    /// Accepting tasks and dependencies.
    Building,
    /// Started; dependencies are frozen. Tasks may be queued or parked
    /// behind unfinished predecessors.
    Scheduled,
    /// At least one invocation has begun executing.
    Running,
    Finished,
    Canceled,
}

// ── Scheduler configuration ───────────────────────────────────

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of short-task worker threads. 0 = derive from core count.
    #[serde(default = "default_short_task_threads")]
    pub short_task_threads: usize,

    /// Number of long-task worker threads.
    #[serde(default = "default_long_task_threads")]
    pub long_task_threads: usize,

    /// Maximum number of live task groups before `create_task_group` fails.
    #[serde(default = "default_max_task_groups")]
    pub max_task_groups: usize,
}

fn default_short_task_threads() -> usize { 0 }
fn default_long_task_threads() -> usize { 2 }
fn default_max_task_groups() -> usize { 4096 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            short_task_threads: default_short_task_threads(),
            long_task_threads: default_long_task_threads(),
            max_task_groups: default_max_task_groups(),
        }
    }
}

impl SchedulerConfig {
    /// The file-access pool always has exactly one thread, so that disk I/O
    /// stays serialized.
    pub const FILE_ACCESS_THREADS: usize = 1;

    /// Build config from `TAKT_*` environment variables
    /// (call `taktwerk_core::load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            short_task_threads: env_usize("TAKT_SHORT_TASK_THREADS", default_short_task_threads()),
            long_task_threads: env_usize("TAKT_LONG_TASK_THREADS", default_long_task_threads()),
            max_task_groups: env_usize("TAKT_MAX_TASK_GROUPS", default_max_task_groups()),
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load config from a TOML file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TaktError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content).map_err(|e| TaktError::Config(e.to_string()))
    }

    /// Resolve the short-task thread count (0 means derive from the machine:
    /// two cores are left for the main thread and the OS, with at least one
    /// worker).
    pub fn resolved_short_task_threads(&self) -> usize {
        if self.short_task_threads == 0 {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            cores.saturating_sub(2).max(1)
        } else {
            self.short_task_threads
        }
    }
}
