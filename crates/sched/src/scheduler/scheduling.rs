use std::mem;
use std::sync::Arc;

use crate::error::SchedError;
use crate::group::{TaskEntry, TaskGroupId};
use crate::queues::{KindMask, QueuedInvocation};
use crate::task::Task;
use crate::types::{GroupState, Priority};

use super::core::{SchedState, Scheduler};

impl Scheduler {
    /// Allocate (or recycle) a task group in `Building` state.
    pub fn create_task_group(&self, priority: Priority) -> Result<TaskGroupId, SchedError> {
        let mut guard = self.shared.lock_state();
        guard.arena.allocate(priority)
    }

    /// Add a task to a group. Only allowed while the group is `Building`;
    /// the task's multiplicity is captured here and immutable afterwards.
    pub fn add_task(&self, group: TaskGroupId, task: Arc<dyn Task>) -> Result<(), SchedError> {
        let mut guard = self.shared.lock_state();
        let Some(slot) = guard.arena.get_mut(group) else {
            return Err(SchedError::InvalidGroupHandle);
        };
        if slot.state != GroupState::Building {
            return Err(SchedError::GroupNotBuilding);
        }
        let multiplicity = task.multiplicity().max(1);
        slot.tasks.push(TaskEntry { task, multiplicity });
        Ok(())
    }

    /// Install the completion callback. Fires exactly once, when the group
    /// reaches `Finished` or `Canceled`, with the scheduler lock released.
    pub fn set_on_finished(
        &self,
        group: TaskGroupId,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), SchedError> {
        let mut guard = self.shared.lock_state();
        let Some(slot) = guard.arena.get_mut(group) else {
            return Err(SchedError::InvalidGroupHandle);
        };
        if slot.state != GroupState::Building {
            return Err(SchedError::GroupNotBuilding);
        }
        slot.on_finished = Some(Box::new(callback));
        Ok(())
    }

    /// Record `depends_on` as a predecessor of `group`: no task of `group`
    /// starts before `depends_on` finished. Both groups must still be
    /// `Building` — starting a group freezes its dependency set.
    ///
    /// Rejects edges that would make `group` depend on itself, directly or
    /// transitively, with an explicit reachability check.
    pub fn add_dependency(
        &self,
        group: TaskGroupId,
        depends_on: TaskGroupId,
    ) -> Result<(), SchedError> {
        let mut guard = self.shared.lock_state();
        let state = &mut *guard;
        for id in [group, depends_on] {
            match state.arena.get(id) {
                None => return Err(SchedError::InvalidGroupHandle),
                Some(slot) if slot.state != GroupState::Building => {
                    return Err(SchedError::GroupNotBuilding);
                }
                Some(_) => {}
            }
        }
        if state.arena.depends_transitively(depends_on, group) {
            return Err(SchedError::CyclicDependency);
        }
        if let Some(slot) = state.arena.get_mut(group) {
            slot.predecessors.push(depends_on);
            slot.unfinished_predecessors += 1;
        }
        if let Some(slot) = state.arena.get_mut(depends_on) {
            slot.successors.push(group);
        }
        Ok(())
    }

    /// Transition `Building → Scheduled`, freezing the dependency set.
    ///
    /// With no unfinished predecessors the group's invocations are pushed
    /// to the queues immediately (an empty group finishes on the spot);
    /// otherwise the group parks until its last predecessor finishes.
    pub fn start_task_group(&self, group: TaskGroupId) -> Result<(), SchedError> {
        let (callbacks, mask, finished) = {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            let (ready, empty) = {
                let Some(slot) = state.arena.get_mut(group) else {
                    return Err(SchedError::InvalidGroupHandle);
                };
                if slot.state != GroupState::Building {
                    return Err(SchedError::GroupNotBuilding);
                }
                slot.state = GroupState::Scheduled;
                slot.remaining = slot.total_invocations();
                (slot.unfinished_predecessors == 0, slot.remaining == 0)
            };
            match (ready, empty) {
                (true, true) => finish_groups(state, group),
                (true, false) => (Vec::new(), enqueue_group_tasks(state, group), 0),
                (false, _) => (Vec::new(), KindMask::default(), 0),
            }
        };
        self.after_state_change(callbacks, mask, finished);
        Ok(())
    }
}

/// Push every invocation of a parked-or-starting group onto the queues.
pub(crate) fn enqueue_group_tasks(state: &mut SchedState, group: TaskGroupId) -> KindMask {
    let mut mask = KindMask::default();
    let SchedState { arena, queues, .. } = state;
    let Some(slot) = arena.get_mut(group) else { return mask };
    slot.enqueued = true;
    let priority = slot.priority;
    mask.set(priority.worker_kind());
    for (task_index, entry) in slot.tasks.iter().enumerate() {
        for invocation in 0..entry.multiplicity {
            queues.push(
                priority,
                QueuedInvocation { group, task_index: task_index as u32, invocation },
            );
        }
    }
    mask
}

/// Mark a group (and, transitively, any successors this unblocks that turn
/// out to be empty) as finished, collecting completion callbacks and newly
/// enqueued worker kinds.
///
/// Iterative worklist rather than recursion, so deep dependency chains
/// cannot grow the stack. Slots without registered waiters are recycled
/// here; the rest are recycled when their last waiter leaves.
pub(crate) fn finish_groups(
    state: &mut SchedState,
    seed: TaskGroupId,
) -> (Vec<Box<dyn FnOnce() + Send>>, KindMask, usize) {
    let mut callbacks = Vec::new();
    let mut mask = KindMask::default();
    let mut finished = 0usize;
    let mut worklist = vec![seed];

    while let Some(id) = worklist.pop() {
        let successors = {
            let Some(slot) = state.arena.get_mut(id) else { continue };
            if slot.is_done() {
                continue;
            }
            debug_assert_eq!(slot.remaining, 0);
            slot.state = if slot.canceled { GroupState::Canceled } else { GroupState::Finished };
            finished += 1;
            if let Some(callback) = slot.on_finished.take() {
                callbacks.push(callback);
            }
            mem::take(&mut slot.successors)
        };

        let recycle = state
            .arena
            .get(id)
            .map(|slot| slot.waiters == 0)
            .unwrap_or(false);
        if recycle {
            state.arena.recycle(id);
        }

        for successor in successors {
            let ready = {
                let Some(slot) = state.arena.get_mut(successor) else { continue };
                if slot.unfinished_predecessors > 0 {
                    slot.unfinished_predecessors -= 1;
                }
                slot.unfinished_predecessors == 0
                    && slot.state == GroupState::Scheduled
                    && !slot.enqueued
                    && !slot.canceled
            };
            if ready {
                let empty = state
                    .arena
                    .get(successor)
                    .map(|slot| slot.remaining == 0)
                    .unwrap_or(false);
                if empty {
                    worklist.push(successor);
                } else {
                    mask.merge(enqueue_group_tasks(state, successor));
                }
            }
        }
    }

    (callbacks, mask, finished)
}
