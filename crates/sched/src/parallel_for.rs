//! Data-parallel range splitting over the short-task pool.
//!
//! A parallel-for call bins an index range into near-equal contiguous
//! chunks, submits them as one batched task in a dedicated group, and
//! blocks until every chunk ran. Workloads smaller than the bin size run
//! synchronously on the calling thread; scheduling them would cost more
//! than the work itself.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{SchedError, TaskError};
use crate::group::TaskGroupId;
use crate::scheduler::Scheduler;
use crate::task::Task;
use crate::types::{NestingMode, OnTaskRunning, Priority};

// ── Parameters and binning ────────────────────────────────────

/// Parameters controlling how a parallel-for range is split.
#[derive(Debug, Clone, Copy)]
pub struct ParallelForParams {
    /// Minimum number of items per sub-task. Ranges smaller than this run
    /// synchronously on the calling thread.
    pub bin_size: u32,
    /// Upper bound on sub-tasks per available short-task worker.
    pub max_tasks_per_thread: u32,
    /// Priority of the group the chunks are submitted to.
    pub priority: Priority,
    /// Nesting mode of the chunk bodies. `Never` bodies must not wait on
    /// other scheduler work; the scheduler asserts if they do.
    pub nesting: NestingMode,
}

impl Default for ParallelForParams {
    fn default() -> Self {
        Self {
            bin_size: 1,
            max_tasks_per_thread: 2,
            priority: Priority::EarlyThisFrame,
            nesting: NestingMode::Never,
        }
    }
}

/// How a range is split into contiguous chunks: `num_tasks` chunks of
/// `items_per_task` items, the final chunk absorbing the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub num_tasks: u32,
    pub items_per_task: usize,
}

impl ChunkPlan {
    /// Index range of one chunk within `[0, total)`.
    pub fn chunk_range(&self, chunk: u32, total: usize) -> Range<usize> {
        let start = chunk as usize * self.items_per_task;
        let end = if chunk + 1 == self.num_tasks {
            total
        } else {
            start + self.items_per_task
        };
        start..end
    }
}

/// Decide whether and how to split `total_items` across `worker_threads`.
///
/// `None` means the workload is too small to be worth scheduling and should
/// run inline. Otherwise the chunk count is bounded by
/// `worker_threads * max_tasks_per_thread` and the chunk ranges tile
/// `[0, total_items)` exactly.
pub fn determine_threading(
    total_items: usize,
    worker_threads: usize,
    params: &ParallelForParams,
) -> Option<ChunkPlan> {
    let bin_size = params.bin_size.max(1) as usize;
    if total_items < bin_size {
        return None;
    }
    let max_tasks = worker_threads.max(1) * params.max_tasks_per_thread.max(1) as usize;
    let num_tasks = max_tasks.min(total_items / bin_size).max(1);
    if num_tasks <= 1 {
        return None;
    }
    Some(ChunkPlan {
        num_tasks: num_tasks as u32,
        items_per_task: total_items / num_tasks,
    })
}

// ── Chunk tasks ───────────────────────────────────────────────

/// Type-erased borrow of a caller's chunk body.
///
/// Sound because `parallel_for_range` does not return before every chunk
/// invocation completed — completion accounting is panic-safe, so the wait
/// terminates even when a chunk body panics — which means the pointee
/// outlives every dereference.
struct RawBody {
    data: *const (),
    call: unsafe fn(*const (), Range<usize>),
}

unsafe impl Send for RawBody {}
unsafe impl Sync for RawBody {}

fn erase<F: Fn(Range<usize>) + Sync>(body: &F) -> RawBody {
    unsafe fn call_thunk<F: Fn(Range<usize>) + Sync>(data: *const (), range: Range<usize>) {
        (*data.cast::<F>())(range)
    }
    RawBody {
        data: (body as *const F).cast(),
        call: call_thunk::<F>,
    }
}

/// Batched task executing one chunk per invocation over a borrowed body.
struct BorrowedChunkTask {
    plan: ChunkPlan,
    total: usize,
    nesting: NestingMode,
    body: RawBody,
}

impl Task for BorrowedChunkTask {
    fn name(&self) -> &str {
        "parallel-for"
    }

    fn nesting(&self) -> NestingMode {
        self.nesting
    }

    fn multiplicity(&self) -> u32 {
        self.plan.num_tasks
    }

    fn execute(&self, invocation: u32) -> Result<(), TaskError> {
        let range = self.plan.chunk_range(invocation, self.total);
        unsafe { (self.body.call)(self.body.data, range) };
        Ok(())
    }
}

/// Owned flavor for the fire-and-forget API.
struct OwnedChunkTask<F> {
    plan: ChunkPlan,
    total: usize,
    nesting: NestingMode,
    body: F,
}

impl<F: Fn(Range<usize>) + Send + Sync> Task for OwnedChunkTask<F> {
    fn name(&self) -> &str {
        "parallel-for-async"
    }

    fn nesting(&self) -> NestingMode {
        self.nesting
    }

    fn multiplicity(&self) -> u32 {
        self.plan.num_tasks
    }

    fn execute(&self, invocation: u32) -> Result<(), TaskError> {
        let range = self.plan.chunk_range(invocation, self.total);
        (self.body)(range);
        Ok(())
    }
}

// ── Scheduler entry points ────────────────────────────────────

impl Scheduler {
    /// Run `body` over every chunk of `range` on the short-task pool and
    /// block until all chunks finished. The body may borrow from the
    /// caller's stack. Ranges smaller than `params.bin_size` run inline
    /// without touching the scheduler.
    pub fn parallel_for_range<F>(
        &self,
        range: Range<usize>,
        params: &ParallelForParams,
        body: F,
    ) -> Result<(), SchedError>
    where
        F: Fn(Range<usize>) + Sync,
    {
        let total = range.len();
        let offset = range.start;
        let Some(plan) = determine_threading(total, self.short_task_worker_count(), params) else {
            if total > 0 {
                body(range);
            }
            return Ok(());
        };

        let shifted = move |chunk: Range<usize>| body(chunk.start + offset..chunk.end + offset);
        let group = self.create_task_group(params.priority)?;
        let task = BorrowedChunkTask {
            plan,
            total,
            nesting: params.nesting,
            body: erase(&shifted),
        };
        self.add_task(group, Arc::new(task))?;
        self.start_task_group(group)?;
        self.wait_for_group(group, OnTaskRunning::WaitTillFinished);
        Ok(())
    }

    /// Element flavor of [`parallel_for_range`](Self::parallel_for_range).
    pub fn parallel_for_each<T, F>(
        &self,
        items: &[T],
        params: &ParallelForParams,
        body: F,
    ) -> Result<(), SchedError>
    where
        T: Sync,
        F: Fn(&T) + Sync,
    {
        self.parallel_for_range(0..items.len(), params, |range| {
            for item in &items[range] {
                body(item);
            }
        })
    }

    /// Fire-and-forget flavor: returns the group handle instead of
    /// blocking; wait or cancel through it. Small ranges still run inline,
    /// in which case the returned group is already finished.
    pub fn parallel_for_async<F>(
        &self,
        range: Range<usize>,
        params: &ParallelForParams,
        body: F,
    ) -> Result<TaskGroupId, SchedError>
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        let total = range.len();
        let offset = range.start;
        let plan = determine_threading(total, self.short_task_worker_count(), params);
        let group = self.create_task_group(params.priority)?;
        match plan {
            None => {
                if total > 0 {
                    body(range);
                }
            }
            Some(plan) => {
                let shifted =
                    move |chunk: Range<usize>| body(chunk.start + offset..chunk.end + offset);
                let task = OwnedChunkTask {
                    plan,
                    total,
                    nesting: params.nesting,
                    body: shifted,
                };
                self.add_task(group, Arc::new(task))?;
            }
        }
        self.start_task_group(group)?;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bin_size: u32, max_tasks_per_thread: u32) -> ParallelForParams {
        ParallelForParams {
            bin_size,
            max_tasks_per_thread,
            ..ParallelForParams::default()
        }
    }

    /// Collect the chunk ranges a plan produces.
    fn ranges(plan: ChunkPlan, total: usize) -> Vec<Range<usize>> {
        (0..plan.num_tasks).map(|c| plan.chunk_range(c, total)).collect()
    }

    #[test]
    fn small_workloads_run_inline() {
        assert_eq!(determine_threading(0, 4, &params(1, 2)), None);
        assert_eq!(determine_threading(9, 4, &params(10, 2)), None);
        // one worker, one task per thread: a single chunk is pointless
        assert_eq!(determine_threading(100, 1, &params(100, 1)), None);
    }

    #[test]
    fn ten_items_on_four_workers_caps_at_eight_tasks() {
        let plan = determine_threading(10, 4, &params(1, 2)).unwrap();
        assert_eq!(plan.num_tasks, 8);
        assert_eq!(plan.items_per_task, 1);

        let ranges = ranges(plan, 10);
        // last chunk absorbs the remainder
        assert_eq!(ranges.last().unwrap().clone(), 7..10);

        // exact tiling of 0..10
        let mut covered = vec![0u32; 10];
        for range in &ranges {
            for i in range.clone() {
                covered[i] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "gaps or overlaps: {covered:?}");
    }

    #[test]
    fn chunks_tile_exactly_for_many_shapes() {
        for total in [1usize, 2, 7, 16, 100, 1001, 4096] {
            for workers in [1usize, 2, 4, 13] {
                for bin in [1u32, 3, 64] {
                    let p = params(bin, 2);
                    let Some(plan) = determine_threading(total, workers, &p) else {
                        continue;
                    };
                    assert!(plan.num_tasks as usize <= workers * 2);
                    let mut next = 0usize;
                    for chunk in 0..plan.num_tasks {
                        let range = plan.chunk_range(chunk, total);
                        assert_eq!(range.start, next, "gap before chunk {chunk}");
                        assert!(range.end > range.start, "empty chunk {chunk}");
                        next = range.end;
                    }
                    assert_eq!(next, total, "total={total} workers={workers} bin={bin}");
                }
            }
        }
    }

    #[test]
    fn bin_size_bounds_chunk_count() {
        let plan = determine_threading(100, 8, &params(30, 4)).unwrap();
        // 100/30 = 3 bins at most, even though 32 tasks would be allowed
        assert_eq!(plan.num_tasks, 3);
    }

    #[test]
    fn default_params() {
        let p = ParallelForParams::default();
        assert_eq!(p.bin_size, 1);
        assert_eq!(p.max_tasks_per_thread, 2);
        assert_eq!(p.priority, Priority::EarlyThisFrame);
        assert_eq!(p.nesting, NestingMode::Never);
    }
}
