use std::collections::{HashMap, VecDeque};
use std::mem;

use crate::group::TaskGroupId;
use crate::types::{Priority, WorkerKind};

/// One queued task invocation: the owning group, the task's index inside
/// the group, and the invocation index for batched tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueuedInvocation {
    pub group: TaskGroupId,
    pub task_index: u32,
    pub invocation: u32,
}

/// Bitmask of worker kinds that received new work; used to decide which
/// condition variables to signal after the scheduler lock is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct KindMask(u8);

impl KindMask {
    pub fn set(&mut self, kind: WorkerKind) {
        self.0 |= match kind.signal_index() {
            Some(i) => 1u8 << i,
            // main-thread work has no pooled signal; mark it so waiters wake
            None => 1u8 << 7,
        };
    }

    pub fn contains(self, kind: WorkerKind) -> bool {
        match kind.signal_index() {
            Some(i) => self.0 & (1u8 << i) != 0,
            None => false,
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn merge(&mut self, other: KindMask) {
        self.0 |= other.0;
    }
}

// Queue scan order per worker kind. Workers drain strictly by ascending
// index within their kind; FIFO within one queue.
const SHORT_TASK_QUEUES: [Priority; 14] = [
    Priority::EarlyThisFrame,
    Priority::ThisFrame,
    Priority::LateThisFrame,
    Priority::EarlyNextFrame,
    Priority::NextFrame,
    Priority::LateNextFrame,
    Priority::In2Frames,
    Priority::In3Frames,
    Priority::In4Frames,
    Priority::In5Frames,
    Priority::In6Frames,
    Priority::In7Frames,
    Priority::In8Frames,
    Priority::In9Frames,
];
const LONG_TASK_QUEUES: [Priority; 2] = [Priority::LongRunningHighPriority, Priority::LongRunning];
const FILE_ACCESS_QUEUES: [Priority; 2] = [Priority::FileAccessHighPriority, Priority::FileAccess];
const MAIN_THREAD_QUEUES: [Priority; 2] =
    [Priority::ThisFrameMainThread, Priority::SomeFrameMainThread];

/// One FIFO queue per priority bucket, partitioned by worker kind, plus the
/// frame-relative rotation logic.
pub(crate) struct PriorityQueueSet {
    queues: [VecDeque<QueuedInvocation>; Priority::COUNT],
}

impl PriorityQueueSet {
    pub fn new() -> Self {
        Self { queues: std::array::from_fn(|_| VecDeque::new()) }
    }

    pub fn push(&mut self, priority: Priority, invocation: QueuedInvocation) {
        self.queues[priority.queue_index()].push_back(invocation);
    }

    fn pop_first_of(&mut self, order: &[Priority]) -> Option<QueuedInvocation> {
        order
            .iter()
            .find_map(|p| self.queues[p.queue_index()].pop_front())
    }

    /// Pop the highest-priority invocation runnable by the given pooled
    /// worker kind.
    pub fn pop_for_kind(&mut self, kind: WorkerKind) -> Option<QueuedInvocation> {
        match kind {
            WorkerKind::ShortTasks => self.pop_first_of(&SHORT_TASK_QUEUES),
            WorkerKind::LongTasks => self.pop_first_of(&LONG_TASK_QUEUES),
            WorkerKind::FileAccess => self.pop_first_of(&FILE_ACCESS_QUEUES),
            WorkerKind::MainThread => self.pop_first_of(&MAIN_THREAD_QUEUES),
            WorkerKind::Unknown => None,
        }
    }

    /// Pop from one specific bucket.
    pub fn pop_priority(&mut self, priority: Priority) -> Option<QueuedInvocation> {
        self.queues[priority.queue_index()].pop_front()
    }

    /// Pop a short task due this frame; used by the main thread while it
    /// waits for the frame to drain.
    pub fn pop_this_frame_short(&mut self) -> Option<QueuedInvocation> {
        self.pop_first_of(&[
            Priority::EarlyThisFrame,
            Priority::ThisFrame,
            Priority::LateThisFrame,
        ])
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.queues[priority.queue_index()].len()
    }

    /// Remove every queued invocation belonging to `group`; returns how many
    /// were removed. Invocations already popped are unaffected.
    pub fn remove_group(&mut self, group: TaskGroupId) -> usize {
        let mut removed = 0;
        for queue in &mut self.queues {
            let before = queue.len();
            queue.retain(|entry| entry.group != group);
            removed += before - queue.len();
        }
        removed
    }

    /// Pending invocation counts per non-empty bucket.
    pub fn pending_counts(&self) -> HashMap<Priority, usize> {
        SHORT_TASK_QUEUES
            .iter()
            .chain(&LONG_TASK_QUEUES)
            .chain(&FILE_ACCESS_QUEUES)
            .chain(&MAIN_THREAD_QUEUES)
            .filter(|p| !self.queues[p.queue_index()].is_empty())
            .map(|p| (*p, self.queues[p.queue_index()].len()))
            .collect()
    }

    /// Advance the frame-relative ring by one frame; see
    /// [`Priority::rotated`] for the mapping. `In2Frames` items are appended
    /// after the former `LateNextFrame` items so FIFO order within the
    /// merged bucket follows submission urgency.
    ///
    /// Rotated items are appended, never assigned: a this-frame bucket can
    /// legitimately hold work again by rotation time, submitted by tasks
    /// that ran while the frame drain had the lock released.
    pub fn rotate(&mut self) {
        let early_next = mem::take(&mut self.queues[Priority::EarlyNextFrame.queue_index()]);
        let next = mem::take(&mut self.queues[Priority::NextFrame.queue_index()]);
        let mut late = mem::take(&mut self.queues[Priority::LateNextFrame.queue_index()]);
        let in2 = mem::take(&mut self.queues[Priority::In2Frames.queue_index()]);

        self.queues[Priority::EarlyThisFrame.queue_index()].extend(early_next);
        self.queues[Priority::ThisFrame.queue_index()].extend(next);
        late.extend(in2);
        self.queues[Priority::LateThisFrame.queue_index()].extend(late);

        // In3Frames..In9Frames shift down by one
        for index in Priority::In3Frames.queue_index()..=Priority::In9Frames.queue_index() {
            let moved = mem::take(&mut self.queues[index]);
            self.queues[index - 1].extend(moved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(index: u32) -> QueuedInvocation {
        QueuedInvocation {
            group: TaskGroupId { index, generation: 1 },
            task_index: 0,
            invocation: 0,
        }
    }

    #[test]
    fn pop_respects_priority_order() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::In5Frames, inv(1));
        set.push(Priority::ThisFrame, inv(2));
        set.push(Priority::NextFrame, inv(3));

        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(2)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(3)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(1)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), None);
    }

    #[test]
    fn fifo_within_one_bucket() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::ThisFrame, inv(1));
        set.push(Priority::ThisFrame, inv(2));
        set.push(Priority::ThisFrame, inv(3));

        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(1)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(2)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(3)));
    }

    #[test]
    fn kinds_only_see_their_queues() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::FileAccess, inv(1));
        set.push(Priority::LongRunning, inv(2));
        set.push(Priority::ThisFrameMainThread, inv(3));

        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), None);
        assert_eq!(set.pop_for_kind(WorkerKind::FileAccess), Some(inv(1)));
        assert_eq!(set.pop_for_kind(WorkerKind::LongTasks), Some(inv(2)));
        assert_eq!(set.pop_for_kind(WorkerKind::MainThread), Some(inv(3)));
    }

    #[test]
    fn rotation_moves_next_frame_buckets() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::EarlyNextFrame, inv(1));
        set.push(Priority::NextFrame, inv(2));
        set.push(Priority::LateNextFrame, inv(3));
        set.push(Priority::In2Frames, inv(4));
        set.push(Priority::In3Frames, inv(5));
        set.push(Priority::In9Frames, inv(6));

        set.rotate();

        assert_eq!(set.len_of(Priority::EarlyThisFrame), 1);
        assert_eq!(set.len_of(Priority::ThisFrame), 1);
        // LateNextFrame and In2Frames fold together
        assert_eq!(set.len_of(Priority::LateThisFrame), 2);
        assert_eq!(set.pop_priority(Priority::LateThisFrame), Some(inv(3)));
        assert_eq!(set.pop_priority(Priority::LateThisFrame), Some(inv(4)));
        assert_eq!(set.len_of(Priority::In2Frames), 1);
        assert_eq!(set.len_of(Priority::In8Frames), 1);
        assert_eq!(set.len_of(Priority::In9Frames), 0);
        assert_eq!(set.len_of(Priority::EarlyNextFrame), 0);
        assert_eq!(set.len_of(Priority::NextFrame), 0);
        assert_eq!(set.len_of(Priority::LateNextFrame), 0);
    }

    #[test]
    fn rotation_leaves_fixed_buckets_alone() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::LongRunning, inv(1));
        set.push(Priority::FileAccessHighPriority, inv(2));
        set.push(Priority::SomeFrameMainThread, inv(3));

        set.rotate();

        assert_eq!(set.len_of(Priority::LongRunning), 1);
        assert_eq!(set.len_of(Priority::FileAccessHighPriority), 1);
        assert_eq!(set.len_of(Priority::SomeFrameMainThread), 1);
    }

    #[test]
    fn remove_group_drops_all_invocations() {
        let mut set = PriorityQueueSet::new();
        set.push(Priority::ThisFrame, inv(1));
        set.push(Priority::NextFrame, inv(1));
        set.push(Priority::NextFrame, inv(2));

        let removed = set.remove_group(TaskGroupId { index: 1, generation: 1 });
        assert_eq!(removed, 2);
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), Some(inv(2)));
        assert_eq!(set.pop_for_kind(WorkerKind::ShortTasks), None);
    }
}
