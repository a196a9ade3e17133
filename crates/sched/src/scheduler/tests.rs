use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{SchedError, TaskError};
use crate::scheduler::Scheduler;
use crate::task::{ClosureTask, Task};
use crate::types::{CancelOutcome, OnTaskRunning, Priority, SchedulerConfig, WaitOutcome};

/// Mock task recording its executions and invocation indices.
struct MockTask {
    name: String,
    multiplicity: u32,
    executed: Arc<AtomicUsize>,
    invocations: Mutex<Vec<u32>>,
}

impl MockTask {
    fn new(name: &str) -> Arc<Self> {
        Self::batched(name, 1)
    }

    fn batched(name: &str, multiplicity: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            multiplicity,
            executed: Arc::new(AtomicUsize::new(0)),
            invocations: Mutex::new(Vec::new()),
        })
    }

    fn execution_count(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl Task for MockTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    fn execute(&self, invocation: u32) -> Result<(), TaskError> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.invocations.lock().unwrap().push(invocation);
        Ok(())
    }
}

fn test_scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig {
        short_task_threads: 2,
        long_task_threads: 1,
        ..SchedulerConfig::default()
    })
}

#[test]
fn create_start_wait() {
    let sched = test_scheduler();
    let task = MockTask::new("basic");

    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, task.clone()).unwrap();
    sched.start_task_group(group).unwrap();

    let outcome = sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);
    assert_eq!(outcome, WaitOutcome::Finished);
    assert_eq!(task.execution_count(), 1);
    assert!(sched.is_group_finished(group));
}

#[test]
fn mutation_after_start_is_rejected() {
    let sched = test_scheduler();
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, MockTask::new("first")).unwrap();
    sched.start_task_group(group).unwrap();

    assert_eq!(
        sched.add_task(group, MockTask::new("late")),
        Err(SchedError::GroupNotBuilding)
    );
    assert_eq!(
        sched.start_task_group(group),
        Err(SchedError::GroupNotBuilding)
    );
    sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);
}

#[test]
fn stale_handle_is_rejected_after_recycling() {
    let sched = test_scheduler();
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, MockTask::new("short-lived")).unwrap();
    sched.start_task_group(group).unwrap();
    sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);

    // the slot has been recycled; the old handle must not alias it
    let reused = sched.create_task_group(Priority::ThisFrame).unwrap();
    assert_eq!(
        sched.add_task(group, MockTask::new("stale")),
        Err(SchedError::InvalidGroupHandle)
    );
    assert!(sched.is_group_finished(group));
    assert!(!sched.is_group_finished(reused));
}

#[test]
fn dependency_cycles_are_rejected() {
    let sched = test_scheduler();
    let a = sched.create_task_group(Priority::ThisFrame).unwrap();
    let b = sched.create_task_group(Priority::ThisFrame).unwrap();
    let c = sched.create_task_group(Priority::ThisFrame).unwrap();

    assert_eq!(sched.add_dependency(a, a), Err(SchedError::CyclicDependency));

    sched.add_dependency(b, a).unwrap();
    sched.add_dependency(c, b).unwrap();
    // a → b → c exists; closing the loop must fail
    assert_eq!(sched.add_dependency(a, c), Err(SchedError::CyclicDependency));
}

#[test]
fn dependencies_freeze_on_start() {
    let sched = test_scheduler();
    let a = sched.create_task_group(Priority::ThisFrame).unwrap();
    let b = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.start_task_group(a).unwrap();

    assert_eq!(sched.add_dependency(b, a), Err(SchedError::GroupNotBuilding));
    sched.wait_for_group(a, OnTaskRunning::WaitTillFinished);
}

#[test]
fn group_arena_exhaustion() {
    let sched = Scheduler::new(SchedulerConfig {
        short_task_threads: 1,
        long_task_threads: 1,
        max_task_groups: 2,
    });
    let _a = sched.create_task_group(Priority::ThisFrame).unwrap();
    let _b = sched.create_task_group(Priority::ThisFrame).unwrap();
    assert_eq!(
        sched.create_task_group(Priority::ThisFrame),
        Err(SchedError::PoolExhausted(2))
    );
}

#[test]
fn empty_group_finishes_on_start() {
    let sched = test_scheduler();
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.start_task_group(group).unwrap();

    // no blocking: the group finished the moment it started
    let outcome = sched.wait_for_group(group, OnTaskRunning::ReturnWithoutBlocking);
    assert_eq!(outcome, WaitOutcome::Finished);
}

#[test]
fn completion_callback_fires_once() {
    let sched = test_scheduler();
    let fired = Arc::new(AtomicUsize::new(0));
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, MockTask::new("cb")).unwrap();
    let f = Arc::clone(&fired);
    sched
        .set_on_finished(group, move || {
            f.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    sched.start_task_group(group).unwrap();
    sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);

    assert_eq!(fired.load(Ordering::Relaxed), 1);
    // waiting again is a no-op on an already-finished (stale) handle
    assert_eq!(
        sched.wait_for_group(group, OnTaskRunning::WaitTillFinished),
        WaitOutcome::Finished
    );
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}

#[test]
fn batched_task_runs_every_invocation() {
    let sched = test_scheduler();
    let task = MockTask::batched("batched", 4);
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, task.clone()).unwrap();
    sched.start_task_group(group).unwrap();
    sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);

    assert_eq!(task.execution_count(), 4);
    let mut invocations = task.invocations.lock().unwrap().clone();
    invocations.sort_unstable();
    assert_eq!(invocations, vec![0, 1, 2, 3]);
}

#[test]
fn canceling_building_group_unblocks_successors() {
    let sched = test_scheduler();
    let task = MockTask::new("successor");

    let canceled = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(canceled, MockTask::new("never-runs")).unwrap();

    let successor = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(successor, task.clone()).unwrap();
    sched.add_dependency(successor, canceled).unwrap();
    sched.start_task_group(successor).unwrap();

    // successor is parked; canceling the predecessor counts as finishing it
    let outcome = sched
        .cancel_group(canceled, OnTaskRunning::WaitTillFinished)
        .unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);

    sched.wait_for_group(successor, OnTaskRunning::WaitTillFinished);
    assert_eq!(task.execution_count(), 1);
}

#[test]
fn failing_task_still_completes_its_group() {
    let sched = test_scheduler();
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched
        .add_task(
            group,
            Arc::new(ClosureTask::new("fails", || {
                Err(TaskError::Failed("synthetic".into()))
            })),
        )
        .unwrap();
    sched.start_task_group(group).unwrap();

    let outcome = sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);
    assert_eq!(outcome, WaitOutcome::Finished);
    assert_eq!(sched.metrics().tasks_failed, 1);
}

#[test]
fn group_state_is_reported_through_metrics() {
    let sched = test_scheduler();
    let group = sched.create_task_group(Priority::ThisFrame).unwrap();
    sched.add_task(group, MockTask::new("metrics")).unwrap();
    sched.start_task_group(group).unwrap();
    sched.wait_for_group(group, OnTaskRunning::WaitTillFinished);

    let metrics = sched.metrics();
    assert_eq!(metrics.tasks_executed["metrics"], 1);
    assert_eq!(metrics.groups_finished, 1);
}

#[test]
fn shutdown_is_idempotent_and_drop_joins() {
    let sched = test_scheduler();
    sched.shutdown();
    sched.shutdown();
    drop(sched);
}

#[test]
fn isolated_instances_do_not_interfere() {
    let a = test_scheduler();
    let b = test_scheduler();

    let task_a = MockTask::new("on-a");
    let task_b = MockTask::new("on-b");

    let ga = a.create_task_group(Priority::ThisFrame).unwrap();
    a.add_task(ga, task_a.clone()).unwrap();
    a.start_task_group(ga).unwrap();

    let gb = b.create_task_group(Priority::ThisFrame).unwrap();
    b.add_task(gb, task_b.clone()).unwrap();
    b.start_task_group(gb).unwrap();

    a.wait_for_group(ga, OnTaskRunning::WaitTillFinished);
    b.wait_for_group(gb, OnTaskRunning::WaitTillFinished);

    assert_eq!(task_a.execution_count(), 1);
    assert_eq!(task_b.execution_count(), 1);
    assert_eq!(a.metrics().tasks_executed.get("on-b"), None);
}

#[test]
fn worker_introspection_matches_config() {
    let sched = test_scheduler();
    let workers = sched.worker_states();
    // 2 short + 1 long + 1 file-access
    assert_eq!(workers.len(), 4);
    assert!(workers.iter().any(|w| w.name.starts_with("takt-short")));
    assert!(workers.iter().any(|w| w.name.starts_with("takt-long")));
    assert!(workers.iter().any(|w| w.name.starts_with("takt-file")));
}
