use std::sync::Arc;

use crate::error::SchedError;
use crate::task::Task;
use crate::types::{GroupState, Priority};

// ── Handles ───────────────────────────────────────────────────

/// Handle to a task group: an arena slot index plus a generation counter.
///
/// Equality requires both fields to match, so a recycled slot can never
/// alias a stale handle. Callers only ever hold handles, never references
/// into the arena, which is what makes cross-thread cancellation and slot
/// recycling safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskGroupId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TaskGroupId {
    /// The null handle. Treated as referring to an already-finished group.
    pub fn invalid() -> Self {
        Self { index: u32::MAX, generation: 0 }
    }

    pub fn is_valid(&self) -> bool {
        self.index != u32::MAX
    }
}

impl Default for TaskGroupId {
    fn default() -> Self {
        Self::invalid()
    }
}

// ── Slots ─────────────────────────────────────────────────────

/// A task plus its invocation count, captured when the group is started.
pub(crate) struct TaskEntry {
    pub task: Arc<dyn Task>,
    pub multiplicity: u32,
}

/// One arena slot. Owned exclusively by the scheduler, mutated only under
/// the scheduler lock.
pub(crate) struct GroupSlot {
    pub generation: u32,
    pub state: GroupState,
    pub priority: Priority,
    pub tasks: Vec<TaskEntry>,
    pub predecessors: Vec<TaskGroupId>,
    pub successors: Vec<TaskGroupId>,
    /// Invocations not yet drained (queued, parked or executing).
    pub remaining: usize,
    pub unfinished_predecessors: usize,
    /// Whether any invocation has begun executing.
    pub started_any: bool,
    /// Whether the group's invocations have been pushed to the queues.
    pub enqueued: bool,
    /// Set by `cancel_group`; the group finishes as `Canceled` once its
    /// still-executing invocations drain.
    pub canceled: bool,
    pub on_finished: Option<Box<dyn FnOnce() + Send>>,
    /// Threads currently blocked in `wait_for_group` on this slot.
    pub waiters: usize,
}

impl GroupSlot {
    fn new(generation: u32, priority: Priority) -> Self {
        Self {
            generation,
            state: GroupState::Building,
            priority,
            tasks: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            remaining: 0,
            unfinished_predecessors: 0,
            started_any: false,
            enqueued: false,
            canceled: false,
            on_finished: None,
            waiters: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, GroupState::Finished | GroupState::Canceled)
    }

    pub fn total_invocations(&self) -> usize {
        self.tasks.iter().map(|t| t.multiplicity as usize).sum()
    }
}

// ── Arena ─────────────────────────────────────────────────────

/// Free-list arena of group slots. Generations start at 1 so a
/// default-constructed handle never matches a live slot.
pub(crate) struct GroupArena {
    slots: Vec<GroupSlot>,
    free: Vec<u32>,
    max_groups: usize,
}

impl GroupArena {
    pub fn new(max_groups: usize) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), max_groups }
    }

    /// Allocate or recycle a slot in `Building` state.
    pub fn allocate(&mut self, priority: Priority) -> Result<TaskGroupId, SchedError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation;
            *slot = GroupSlot::new(generation, priority);
            return Ok(TaskGroupId { index, generation });
        }
        if self.slots.len() >= self.max_groups {
            return Err(SchedError::PoolExhausted(self.max_groups));
        }
        let index = self.slots.len() as u32;
        self.slots.push(GroupSlot::new(1, priority));
        Ok(TaskGroupId { index, generation: 1 })
    }

    /// Resolve a handle; `None` for stale or invalid handles.
    pub fn get(&self, id: TaskGroupId) -> Option<&GroupSlot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: TaskGroupId) -> Option<&mut GroupSlot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    /// Return a finished slot to the free list, bumping its generation so
    /// every outstanding handle goes stale.
    pub fn recycle(&mut self, id: TaskGroupId) {
        let Some(slot) = self.get_mut(id) else { return };
        debug_assert!(slot.is_done() && slot.remaining == 0 && slot.waiters == 0);
        slot.generation = slot.generation.wrapping_add(1);
        slot.tasks.clear();
        slot.predecessors.clear();
        slot.successors.clear();
        slot.on_finished = None;
        self.free.push(id.index);
    }

    /// Whether any started group still has this-frame work outstanding.
    pub fn any_unfinished_this_frame(&self) -> bool {
        self.slots.iter().any(|slot| {
            matches!(slot.state, GroupState::Scheduled | GroupState::Running)
                && slot.priority.is_this_frame()
        })
    }

    /// Shift the effective priority of every started group by one frame.
    pub fn rotate_priorities(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot.state, GroupState::Scheduled | GroupState::Running) {
                slot.priority = slot.priority.rotated();
            }
        }
    }

    /// Whether `from` transitively depends on `target`, following
    /// predecessor edges. Used to reject dependency cycles.
    pub fn depends_transitively(&self, from: TaskGroupId, target: TaskGroupId) -> bool {
        if from == target {
            return true;
        }
        let mut stack = vec![from];
        let mut visited = vec![from];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.get(current) else { continue };
            for &pred in &slot.predecessors {
                if pred == target {
                    return true;
                }
                if !visited.contains(&pred) {
                    visited.push(pred);
                    stack.push(pred);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_is_default() {
        let id = TaskGroupId::default();
        assert!(!id.is_valid());
        assert_eq!(id, TaskGroupId::invalid());
    }

    #[test]
    fn allocate_and_resolve() {
        let mut arena = GroupArena::new(8);
        let id = arena.allocate(Priority::ThisFrame).unwrap();
        assert!(id.is_valid());
        let slot = arena.get(id).unwrap();
        assert_eq!(slot.state, GroupState::Building);
        assert_eq!(slot.priority, Priority::ThisFrame);
    }

    #[test]
    fn recycle_bumps_generation() {
        let mut arena = GroupArena::new(8);
        let id = arena.allocate(Priority::ThisFrame).unwrap();
        arena.get_mut(id).unwrap().state = GroupState::Finished;
        arena.recycle(id);

        // stale handle no longer resolves
        assert!(arena.get(id).is_none());

        // slot is reused with a new generation
        let reused = arena.allocate(Priority::NextFrame).unwrap();
        assert_eq!(reused.index, id.index);
        assert_ne!(reused.generation, id.generation);
        assert!(arena.get(reused).is_some());
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut arena = GroupArena::new(2);
        arena.allocate(Priority::ThisFrame).unwrap();
        arena.allocate(Priority::ThisFrame).unwrap();
        assert_eq!(
            arena.allocate(Priority::ThisFrame),
            Err(SchedError::PoolExhausted(2))
        );
    }

    #[test]
    fn transitive_dependency_detection() {
        let mut arena = GroupArena::new(8);
        let a = arena.allocate(Priority::ThisFrame).unwrap();
        let b = arena.allocate(Priority::ThisFrame).unwrap();
        let c = arena.allocate(Priority::ThisFrame).unwrap();

        // chain: c depends on b depends on a
        arena.get_mut(b).unwrap().predecessors.push(a);
        arena.get_mut(c).unwrap().predecessors.push(b);

        assert!(arena.depends_transitively(c, a));
        assert!(arena.depends_transitively(b, a));
        assert!(!arena.depends_transitively(a, c));
        assert!(arena.depends_transitively(a, a));
    }
}
