use std::sync::Mutex;

use crate::error::TaskError;
use crate::types::NestingMode;

/// A unit of work the scheduler can execute.
///
/// Implementations are shared as `Arc<dyn Task>` and are immutable once
/// submitted; any mutable state lives behind the implementation's own
/// interior mutability. A task with `multiplicity() > 1` is invoked that
/// many times with distinct invocation indices, which is how data-parallel
/// batches are expressed.
pub trait Task: Send + Sync {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str {
        "task"
    }

    /// Whether this task may itself block waiting on other scheduler work.
    fn nesting(&self) -> NestingMode {
        NestingMode::Never
    }

    /// Number of parallel invocations; 1 for a plain task. Read once when
    /// the owning group is started.
    fn multiplicity(&self) -> u32 {
        1
    }

    /// Execute one invocation. The scheduler logs and counts failures but
    /// never retries; completion accounting proceeds either way.
    fn execute(&self, invocation: u32) -> Result<(), TaskError>;
}

/// One-shot closure adapter for [`Task`].
///
/// Wraps a `FnOnce` body so callers don't need a dedicated type per task.
pub struct ClosureTask {
    name: String,
    nesting: NestingMode,
    body: Mutex<Option<Box<dyn FnOnce() -> Result<(), TaskError> + Send>>>,
}

impl ClosureTask {
    pub fn new(
        name: impl Into<String>,
        body: impl FnOnce() -> Result<(), TaskError> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            nesting: NestingMode::Never,
            body: Mutex::new(Some(Box::new(body))),
        }
    }

    /// Mark the closure as one that may wait on other scheduler work.
    pub fn with_nesting(mut self, nesting: NestingMode) -> Self {
        self.nesting = nesting;
        self
    }
}

impl Task for ClosureTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn nesting(&self) -> NestingMode {
        self.nesting
    }

    fn execute(&self, _invocation: u32) -> Result<(), TaskError> {
        let body = self
            .body
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match body {
            Some(body) => body(),
            None => Err(TaskError::Failed(format!(
                "closure task '{}' executed more than once",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn closure_task_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = ClosureTask::new("once", move || {
            c.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        assert!(task.execute(0).is_ok());
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // second invocation reports failure instead of re-running the body
        assert!(task.execute(0).is_err());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn closure_task_defaults() {
        let task = ClosureTask::new("defaults", || Ok(()));
        assert_eq!(task.name(), "defaults");
        assert_eq!(task.nesting(), NestingMode::Never);
        assert_eq!(task.multiplicity(), 1);
    }

    #[test]
    fn nesting_override() {
        let task = ClosureTask::new("nested", || Ok(())).with_nesting(NestingMode::Maybe);
        assert_eq!(task.nesting(), NestingMode::Maybe);
    }
}
