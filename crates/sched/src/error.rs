use thiserror::Error;

/// Error type for structural scheduler misuse.
///
/// Returned synchronously by the submission API. Failures *inside* a task
/// body are carried by [`TaskError`] and never surface here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedError {
    /// The handle was never created, or refers to a recycled group slot.
    #[error("invalid or stale task group handle")]
    InvalidGroupHandle,

    /// The group was mutated after `start_task_group` froze it.
    #[error("task group is no longer in the building state")]
    GroupNotBuilding,

    /// Adding the dependency would make the group depend on itself.
    #[error("task group dependency would create a cycle")]
    CyclicDependency,

    /// The group arena hit its configured capacity.
    #[error("task group arena exhausted ({0} groups); raise max_task_groups")]
    PoolExhausted(usize),
}

/// Failure reported by a task body.
///
/// Opaque to the scheduler: completion accounting proceeds regardless, the
/// failure is only logged and counted. Tasks that need their result observed
/// must surface it through their own channel.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task skipped: {0}")]
    Skipped(String),
}
