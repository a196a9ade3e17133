//! Worker thread pools.
//!
//! Each pooled [`WorkerKind`] gets a fixed set of OS threads. A worker
//! repeatedly pops the highest-priority invocation for its kind, executes
//! it with the scheduler lock released, and reports completion back to the
//! owning group. When every queue of its kind is empty it parks on the
//! kind's condition variable.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::scheduler::core::Shared;
use crate::scheduler::execution;
use crate::types::{NestingMode, SchedulerConfig, WorkerKind, WorkerSnapshot, WorkerState};

// ── Thread-local worker context ───────────────────────────────

thread_local! {
    /// Which pool this thread belongs to; `Unknown` off the pools.
    static CURRENT_WORKER: Cell<WorkerKind> = const { Cell::new(WorkerKind::Unknown) };
    /// Nesting mode of the task this thread is currently executing.
    static CURRENT_NESTING: Cell<Option<NestingMode>> = const { Cell::new(None) };
}

pub(crate) fn current_worker_kind() -> WorkerKind {
    CURRENT_WORKER.with(|w| w.get())
}

pub(crate) fn current_nesting() -> Option<NestingMode> {
    CURRENT_NESTING.with(|n| n.get())
}

pub(crate) fn set_current_nesting(nesting: Option<NestingMode>) {
    CURRENT_NESTING.with(|n| n.set(nesting));
}

// ── Worker handles ────────────────────────────────────────────

const STATE_ACTIVE: u8 = 0;
const STATE_IDLE: u8 = 1;
const STATE_BLOCKED: u8 = 2;

fn decode_state(raw: u8) -> WorkerState {
    match raw {
        STATE_ACTIVE => WorkerState::Active,
        STATE_BLOCKED => WorkerState::Blocked,
        _ => WorkerState::Idle,
    }
}

/// A spawned worker thread plus its introspection state.
pub(crate) struct WorkerHandle {
    name: String,
    kind: WorkerKind,
    state: Arc<AtomicU8>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            state: decode_state(self.state.load(Ordering::Relaxed)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Relaxed) == STATE_ACTIVE
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

thread_local! {
    /// This worker's introspection flag, shared with its `WorkerHandle`.
    static CURRENT_STATE: RefCell<Option<Arc<AtomicU8>>> = const { RefCell::new(None) };
}

/// Flip the current worker's introspection state; no-op off the pools.
pub(crate) fn mark_worker(state: WorkerState) {
    let raw = match state {
        WorkerState::Active => STATE_ACTIVE,
        WorkerState::Idle => STATE_IDLE,
        WorkerState::Blocked => STATE_BLOCKED,
    };
    CURRENT_STATE.with(|s| {
        if let Some(flag) = s.borrow().as_ref() {
            flag.store(raw, Ordering::Relaxed);
        }
    });
}

// ── Spawning and the dispatch loop ────────────────────────────

/// Spawn every pooled worker thread for the given config.
pub(crate) fn spawn_workers(shared: &Arc<Shared>, config: &SchedulerConfig) -> Vec<WorkerHandle> {
    let mut workers = Vec::new();
    for kind in WorkerKind::POOLED {
        let (prefix, count) = match kind {
            WorkerKind::ShortTasks => ("takt-short", config.resolved_short_task_threads()),
            WorkerKind::LongTasks => ("takt-long", config.long_task_threads.max(1)),
            WorkerKind::FileAccess => ("takt-file", SchedulerConfig::FILE_ACCESS_THREADS),
            _ => unreachable!(),
        };
        for i in 0..count {
            let name = format!("{}-{}", prefix, i);
            let state = Arc::new(AtomicU8::new(STATE_IDLE));
            let thread_state = Arc::clone(&state);
            let thread_shared = Arc::clone(shared);
            let thread_name = name.clone();
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(thread_shared, kind, thread_state, thread_name))
                .expect("failed to spawn scheduler worker thread");
            workers.push(WorkerHandle { name, kind, state, join: Some(join) });
        }
    }
    workers
}

fn worker_loop(shared: Arc<Shared>, kind: WorkerKind, state: Arc<AtomicU8>, name: String) {
    CURRENT_WORKER.with(|w| w.set(kind));
    CURRENT_STATE.with(|s| *s.borrow_mut() = Some(Arc::clone(&state)));
    debug!(worker = %name, "worker started");

    loop {
        let mut guard = shared.lock_state();
        if shared.is_shutdown() {
            break;
        }
        let popped = guard.queues.pop_for_kind(kind);
        match popped {
            Some(invocation) => {
                let prepared = execution::prepare(&mut *guard, invocation);
                drop(guard);
                state.store(STATE_ACTIVE, Ordering::Relaxed);
                execution::execute_prepared(&shared, prepared);
                state.store(STATE_IDLE, Ordering::Relaxed);
            }
            None => {
                state.store(STATE_IDLE, Ordering::Relaxed);
                let guard = shared.wait_for_signal(kind, guard);
                drop(guard);
            }
        }
    }

    debug!(worker = %name, "worker stopped");
}
