use std::sync::MutexGuard;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::SchedError;
use crate::group::TaskGroupId;
use crate::pool;
use crate::types::{CancelOutcome, NestingMode, OnTaskRunning, Priority, WaitOutcome, WorkerState};

use super::core::{SchedState, Scheduler};
use super::execution;
use super::scheduling;

impl Scheduler {
    /// Block until the group finishes, executing queued work of the calling
    /// thread's own worker kind while waiting.
    ///
    /// With `ReturnWithoutBlocking`, returns `StillRunning` immediately if
    /// any of the group's invocations has already begun executing. Stale and
    /// invalid handles are reported as `Finished`.
    pub fn wait_for_group(&self, group: TaskGroupId, on_running: OnTaskRunning) -> WaitOutcome {
        let guard = self.shared.lock_state();
        {
            let Some(slot) = guard.arena.get(group) else {
                return WaitOutcome::Finished;
            };
            if slot.is_done() {
                return WaitOutcome::Finished;
            }
            if on_running == OnTaskRunning::ReturnWithoutBlocking && slot.started_any {
                return WaitOutcome::StillRunning;
            }
        }
        self.block_until_finished(guard, group)
    }

    /// Cancel a group. Invocations not yet started are dequeued and
    /// accounted as finished without executing; invocations already
    /// executing run to completion (no preemption).
    ///
    /// `WaitTillFinished` blocks (helping, like `wait_for_group`) until the
    /// last running invocation drains. `ReturnWithoutBlocking` returns
    /// `StillRunning` in that case and the group finishes asynchronously.
    /// A canceled group counts as finished for its successors and its
    /// completion callback still fires.
    pub fn cancel_group(
        &self,
        group: TaskGroupId,
        on_running: OnTaskRunning,
    ) -> Result<CancelOutcome, SchedError> {
        let shared = &self.shared;
        let mut guard = shared.lock_state();
        match guard.arena.get(group) {
            None => return Ok(CancelOutcome::AlreadyFinished),
            Some(slot) if slot.is_done() => return Ok(CancelOutcome::AlreadyFinished),
            Some(_) => {}
        }

        let removed = guard.queues.remove_group(group);
        let state = &mut *guard;
        let mut finish_now = false;
        if let Some(slot) = state.arena.get_mut(group) {
            slot.canceled = true;
            if slot.enqueued {
                slot.remaining = slot.remaining.saturating_sub(removed);
            } else {
                // never enqueued (still building, or parked behind
                // predecessors): none of its invocations will ever run
                slot.remaining = 0;
            }
            finish_now = slot.remaining == 0;
        }

        if finish_now {
            let (callbacks, mask, finished) = scheduling::finish_groups(state, group);
            drop(guard);
            self.after_state_change(callbacks, mask, finished);
            self.record_canceled(removed);
            debug!(removed, "group canceled before all tasks started");
            return Ok(CancelOutcome::Canceled);
        }

        // Some invocations are still executing.
        match on_running {
            OnTaskRunning::ReturnWithoutBlocking => {
                drop(guard);
                self.record_canceled(removed);
                Ok(CancelOutcome::StillRunning)
            }
            OnTaskRunning::WaitTillFinished => {
                let outcome = self.block_until_finished(guard, group);
                self.record_canceled(removed);
                match outcome {
                    WaitOutcome::Finished => Ok(CancelOutcome::Canceled),
                    WaitOutcome::StillRunning => Ok(CancelOutcome::StillRunning),
                }
            }
        }
    }

    /// Drain everything due this frame, then advance the frame-relative
    /// priority ring by exactly one frame.
    ///
    /// Must run on the thread that created the scheduler. Main-thread-bound
    /// tasks are executed inline here; while this-frame work is outstanding
    /// the calling thread also helps with this-frame short tasks and
    /// opportunistically drains `SomeFrameMainThread` work instead of going
    /// to sleep. After the wait, `SomeFrameMainThread` work pending at entry
    /// is drained under `some_frame_budget` (`None` = drain all of it).
    pub fn finish_frame_tasks(&self, some_frame_budget: Option<Duration>) {
        let shared = &self.shared;
        assert_eq!(
            thread::current().id(),
            shared.main_thread,
            "finish_frame_tasks must run on the thread that created the scheduler"
        );

        let mut guard = shared.lock_state();

        // Phase 1: everything due this frame. The main-thread bucket is
        // drained inline; short this-frame work is helped with; sleeping is
        // the last resort.
        loop {
            if shared.is_shutdown() {
                break;
            }
            if let Some(queued) = guard.queues.pop_priority(Priority::ThisFrameMainThread) {
                let prepared = execution::prepare(&mut *guard, queued);
                drop(guard);
                execution::execute_prepared(shared, prepared);
                guard = shared.lock_state();
                continue;
            }
            if !guard.arena.any_unfinished_this_frame() {
                break;
            }
            if let Some(queued) = guard
                .queues
                .pop_this_frame_short()
                .or_else(|| guard.queues.pop_priority(Priority::SomeFrameMainThread))
            {
                let prepared = execution::prepare(&mut *guard, queued);
                drop(guard);
                execution::execute_prepared(shared, prepared);
                guard = shared.lock_state();
                continue;
            }
            guard = shared.wait_for_done(guard);
        }

        if shared.is_shutdown() {
            return;
        }

        // Phase 2: opportunistic main-thread work under the optional budget.
        let deadline = some_frame_budget.map(|budget| Instant::now() + budget);
        let mut pending = guard.queues.len_of(Priority::SomeFrameMainThread);
        while pending > 0 {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let Some(queued) = guard.queues.pop_priority(Priority::SomeFrameMainThread) else {
                break;
            };
            pending -= 1;
            let prepared = execution::prepare(&mut *guard, queued);
            drop(guard);
            execution::execute_prepared(shared, prepared);
            guard = shared.lock_state();
        }

        // Phase 3: advance the frame ring. Queued items and the effective
        // priority of every started group shift together.
        guard.queues.rotate();
        guard.arena.rotate_priorities();
        guard.frame += 1;
        let frame = guard.frame;
        drop(guard);

        shared.metrics_write().record_frame();
        debug!(frame, "frame tasks finished");
    }

    /// The helping wait loop shared by `wait_for_group` and `cancel_group`.
    ///
    /// A condvar-plus-try-help loop rather than recursion, so stack depth
    /// stays bounded no matter how much work is executed while waiting.
    /// Returns `StillRunning` only if the scheduler shut down mid-wait.
    fn block_until_finished<'a>(
        &'a self,
        mut guard: MutexGuard<'a, SchedState>,
        group: TaskGroupId,
    ) -> WaitOutcome {
        assert!(
            pool::current_nesting() != Some(NestingMode::Never),
            "blocking wait from a task declared NestingMode::Never; \
             declare the task NestingMode::Maybe if it must wait on other scheduler work"
        );

        let shared = &self.shared;
        match guard.arena.get_mut(group) {
            Some(slot) => slot.waiters += 1,
            None => return WaitOutcome::Finished,
        }
        let role = execution::help_role(shared);

        let outcome = loop {
            match guard.arena.get(group) {
                None => break WaitOutcome::Finished,
                Some(slot) if slot.is_done() => break WaitOutcome::Finished,
                Some(_) => {}
            }
            if shared.is_shutdown() {
                break WaitOutcome::StillRunning;
            }
            if let Some(queued) = execution::pop_help(&mut *guard, &role) {
                let prepared = execution::prepare(&mut *guard, queued);
                drop(guard);
                execution::execute_prepared(shared, prepared);
                guard = shared.lock_state();
            } else {
                pool::mark_worker(WorkerState::Blocked);
                guard = shared.wait_for_done(guard);
                pool::mark_worker(WorkerState::Active);
            }
        };

        // Deregister; the last waiter recycles a finished slot.
        if let Some(slot) = guard.arena.get_mut(group) {
            slot.waiters = slot.waiters.saturating_sub(1);
            if slot.waiters == 0 && slot.is_done() && slot.remaining == 0 {
                guard.arena.recycle(group);
            }
        }
        outcome
    }

    fn record_canceled(&self, removed: usize) {
        if removed > 0 {
            self.shared.metrics_write().record_canceled(removed);
        }
    }
}
