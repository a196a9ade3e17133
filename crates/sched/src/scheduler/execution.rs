use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{error, warn};

use crate::group::TaskGroupId;
use crate::pool;
use crate::queues::{KindMask, QueuedInvocation};
use crate::task::Task;
use crate::types::{GroupState, WorkerKind};

use super::core::{SchedState, Shared};
use super::scheduling;

/// A popped invocation resolved against its group under the scheduler
/// lock. `task == None` means the group was canceled after the invocation
/// was queued; it is skipped but still accounted.
pub(crate) struct Prepared {
    group: TaskGroupId,
    invocation: u32,
    task: Option<Arc<dyn Task>>,
}

/// Resolve a popped invocation while still holding the scheduler lock.
pub(crate) fn prepare(state: &mut SchedState, queued: QueuedInvocation) -> Prepared {
    let task = match state.arena.get_mut(queued.group) {
        Some(slot) if !slot.canceled => {
            slot.started_any = true;
            if slot.state == GroupState::Scheduled {
                slot.state = GroupState::Running;
            }
            slot.tasks
                .get(queued.task_index as usize)
                .map(|entry| Arc::clone(&entry.task))
        }
        _ => None,
    };
    Prepared { group: queued.group, invocation: queued.invocation, task }
}

/// Execute a prepared invocation with the scheduler lock released, then
/// report completion to the owning group.
///
/// Panics are caught so a failing task can never wedge its group: the
/// remaining-count still decrements either way.
pub(crate) fn execute_prepared(shared: &Shared, prepared: Prepared) {
    if let Some(task) = &prepared.task {
        // restore the outer value afterwards: a helping wait may execute
        // this invocation from inside another task
        let outer_nesting = pool::current_nesting();
        pool::set_current_nesting(Some(task.nesting()));
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| task.execute(prepared.invocation)));
        pool::set_current_nesting(outer_nesting);
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(())) => shared.metrics_write().record_execution(task.name(), elapsed),
            Ok(Err(e)) => {
                warn!(task = %task.name(), error = %e, "task reported failure");
                shared.metrics_write().record_failure();
            }
            Err(_) => {
                error!(task = %task.name(), "task panicked; completion accounting proceeds");
                shared.metrics_write().record_panic();
            }
        }
    }
    complete_invocation(shared, prepared.group);
}

/// Decrement the group's remaining-invocation count; the count reaching
/// zero finishes the group and resolves its successors.
pub(crate) fn complete_invocation(shared: &Shared, group: TaskGroupId) {
    let (callbacks, mask, finished) = {
        let mut guard = shared.lock_state();
        let state = &mut *guard;
        let remaining = match state.arena.get_mut(group) {
            Some(slot) => {
                debug_assert!(slot.remaining > 0, "remaining-count underflow");
                slot.remaining = slot.remaining.saturating_sub(1);
                slot.remaining
            }
            None => return,
        };
        if remaining == 0 {
            scheduling::finish_groups(state, group)
        } else {
            (Vec::new(), KindMask::default(), 0)
        }
    };
    after_state_change(shared, callbacks, mask, finished);
}

/// Run user callbacks collected under the lock, record finished groups and
/// wake whoever the state change concerns. Always broadcasts `group_done`:
/// cheap, and it keeps waiting threads live through every state change.
pub(crate) fn after_state_change(
    shared: &Shared,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    mask: KindMask,
    finished: usize,
) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!("group completion callback panicked");
        }
    }
    if finished > 0 {
        shared.metrics_write().record_groups_finished(finished);
    }
    shared.notify_work(mask);
    shared.notify_done();
}

// ── Helpful waiting support ───────────────────────────────────

/// What queued work the current thread may execute while it waits.
pub(crate) enum HelpRole {
    /// A pooled worker helps with its own kind's queues.
    Worker(WorkerKind),
    /// The main thread drains main-thread buckets, then this-frame short
    /// tasks.
    Main,
    /// Unknown threads do not help; they just park.
    None,
}

pub(crate) fn help_role(shared: &Shared) -> HelpRole {
    match pool::current_worker_kind() {
        kind @ (WorkerKind::ShortTasks | WorkerKind::LongTasks | WorkerKind::FileAccess) => {
            HelpRole::Worker(kind)
        }
        _ if thread::current().id() == shared.main_thread => HelpRole::Main,
        _ => HelpRole::None,
    }
}

/// Pop the next invocation the current thread may execute while waiting.
pub(crate) fn pop_help(state: &mut SchedState, role: &HelpRole) -> Option<QueuedInvocation> {
    match role {
        HelpRole::Worker(kind) => state.queues.pop_for_kind(*kind),
        HelpRole::Main => state
            .queues
            .pop_for_kind(WorkerKind::MainThread)
            .or_else(|| state.queues.pop_this_frame_short()),
        HelpRole::None => None,
    }
}
