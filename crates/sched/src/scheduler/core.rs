use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, ThreadId};

use tracing::info;

use crate::group::{GroupArena, TaskGroupId};
use crate::metrics::SchedulerMetrics;
use crate::pool::{self, WorkerHandle};
use crate::queues::{KindMask, PriorityQueueSet};
use crate::types::{SchedulerConfig, WorkerKind, WorkerSnapshot};

/// Everything guarded by the single scheduler-wide lock: the group arena
/// and the priority queues. This is the only shared mutable state; task
/// bodies and user callbacks always run with this lock released.
pub(crate) struct SchedState {
    pub arena: GroupArena,
    pub queues: PriorityQueueSet,
    pub frame: u64,
}

/// State shared between the façade, the worker pools and waiting threads.
pub(crate) struct Shared {
    state: Mutex<SchedState>,
    /// One condition variable per pooled worker kind, signaled when that
    /// kind receives new work.
    signals: [Condvar; 3],
    /// Broadcast on every completion and enqueue; waiting threads use it to
    /// re-check their group and look for helpable work.
    group_done: Condvar,
    shutdown: AtomicBool,
    metrics: RwLock<SchedulerMetrics>,
    /// The thread that created the scheduler; the only one allowed to drain
    /// main-thread buckets.
    pub(crate) main_thread: ThreadId,
}

impl Shared {
    /// Acquire the scheduler lock. Task bodies run with the lock released
    /// and their panics are caught, so a poisoned lock can only come from a
    /// user callback; the guarded state itself is still consistent.
    pub fn lock_state(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park until the given pooled kind is signaled new work.
    pub fn wait_for_signal<'a>(
        &self,
        kind: WorkerKind,
        guard: MutexGuard<'a, SchedState>,
    ) -> MutexGuard<'a, SchedState> {
        let Some(index) = kind.signal_index() else { return guard };
        self.signals[index]
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Park until a completion or enqueue is broadcast.
    pub fn wait_for_done<'a>(&self, guard: MutexGuard<'a, SchedState>) -> MutexGuard<'a, SchedState> {
        self.group_done
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the pools that received new work, plus every waiting thread.
    pub fn notify_work(&self, mask: KindMask) {
        for kind in WorkerKind::POOLED {
            if mask.contains(kind) {
                if let Some(index) = kind.signal_index() {
                    self.signals[index].notify_all();
                }
            }
        }
        if !mask.is_empty() {
            self.group_done.notify_all();
        }
    }

    /// Wake every thread blocked in a wait or frame drain.
    pub fn notify_done(&self) {
        self.group_done.notify_all();
    }

    /// Wake everything; used for shutdown.
    pub fn notify_everyone(&self) {
        for signal in &self.signals {
            signal.notify_all();
        }
        self.group_done.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn set_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn metrics_read(&self) -> RwLockReadGuard<'_, SchedulerMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics_write(&self) -> RwLockWriteGuard<'_, SchedulerMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The task scheduler: an explicit context object, not a global.
///
/// Owns the worker pools; dropping the scheduler (or calling
/// [`shutdown`](Self::shutdown)) stops them. Multiple isolated instances
/// may coexist in one process. The creating thread is the scheduler's main
/// thread and the only one allowed to call
/// [`finish_frame_tasks`](Self::finish_frame_tasks).
pub struct Scheduler {
    pub(crate) shared: Arc<Shared>,
    workers: Vec<WorkerHandle>,
    config: SchedulerConfig,
    short_task_workers: usize,
}

impl Scheduler {
    /// Create a scheduler and spawn its worker pools.
    pub fn new(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedState {
                arena: GroupArena::new(config.max_task_groups),
                queues: PriorityQueueSet::new(),
                frame: 0,
            }),
            signals: [Condvar::new(), Condvar::new(), Condvar::new()],
            group_done: Condvar::new(),
            shutdown: AtomicBool::new(false),
            metrics: RwLock::new(SchedulerMetrics::default()),
            main_thread: thread::current().id(),
        });
        let workers = pool::spawn_workers(&shared, &config);
        let short_task_workers = config.resolved_short_task_threads();
        info!(
            short_workers = short_task_workers,
            long_workers = config.long_task_threads.max(1),
            file_workers = SchedulerConfig::FILE_ACCESS_THREADS,
            "scheduler started"
        );
        Self { shared, workers, config, short_task_workers }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of short-task workers; bounds parallel-for splitting.
    pub(crate) fn short_task_worker_count(&self) -> usize {
        self.short_task_workers
    }

    /// Frames completed so far via `finish_frame_tasks`.
    pub fn frame(&self) -> u64 {
        self.shared.lock_state().frame
    }

    /// Whether the group has reached `Finished` or `Canceled`. Stale and
    /// invalid handles count as finished.
    pub fn is_group_finished(&self, group: TaskGroupId) -> bool {
        let guard = self.shared.lock_state();
        match guard.arena.get(group) {
            None => true,
            Some(slot) => slot.is_done(),
        }
    }

    /// Snapshot of the scheduler metrics, including current queue depths
    /// and worker utilization.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = self.shared.metrics_read().clone();
        let guard = self.shared.lock_state();
        metrics.tasks_pending = guard.queues.pending_counts();
        drop(guard);
        let active = self.workers.iter().filter(|w| w.is_active()).count();
        metrics.worker_utilization = if self.workers.is_empty() {
            0.0
        } else {
            active as f64 / self.workers.len() as f64
        };
        metrics
    }

    /// Coarse per-worker state for introspection.
    pub fn worker_states(&self) -> Vec<WorkerSnapshot> {
        self.workers.iter().map(WorkerHandle::snapshot).collect()
    }

    /// Signal the worker pools to stop. Queued work is abandoned; groups
    /// that have not finished never will. Also run on drop.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.shared.set_shutdown();
        self.shared.notify_everyone();
    }

    /// Run user callbacks collected under the lock, record finished groups,
    /// and wake whoever the state change concerns.
    pub(crate) fn after_state_change(
        &self,
        callbacks: Vec<Box<dyn FnOnce() + Send>>,
        mask: KindMask,
        finished: usize,
    ) {
        super::execution::after_state_change(&self.shared, callbacks, mask, finished);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.set_shutdown();
        self.shared.notify_everyone();
        for worker in &mut self.workers {
            worker.join();
        }
    }
}
