//! Task abstraction and a closure-backed implementation

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors produced by task execution and task submission
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("worker pool '{0}' is shut down")]
    PoolClosed(String),
}

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Shared handle to a task
pub type TaskRef = Arc<dyn Task>;

/// A synchronous unit of background work
///
/// Tasks run on the blocking thread pool, so `run` may sleep or do I/O.
pub trait Task: Send + Sync + 'static {
    /// Stable, human-readable name used in logs
    fn name(&self) -> &str;

    /// Execute the work
    fn run(&self) -> TaskResult<()>;

    /// Ask a running task to stop early. Default: ignored.
    fn cancel(&self) {}
}

/// Function-backed task
///
/// The closure sits behind a [`Mutex`] so an `FnMut` can be driven through
/// `&self`.
pub struct TaskFn<F>
where
    F: FnMut() -> TaskResult<()> + Send + 'static,
{
    name: Cow<'static, str>,
    func: Mutex<F>,
}

impl<F> TaskFn<F>
where
    F: FnMut() -> TaskResult<()> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            func: Mutex::new(func),
        }
    }

    /// Create the task and return it as a [`TaskRef`]
    pub fn arc(name: impl Into<Cow<'static, str>>, func: F) -> TaskRef {
        Arc::new(Self::new(name, func))
    }
}

impl<F> Task for TaskFn<F>
where
    F: FnMut() -> TaskResult<()> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> TaskResult<()> {
        let mut func = self
            .func
            .lock()
            .map_err(|_| TaskError::Failed("task closure mutex poisoned".into()))?;
        (func)()
    }
}

impl<F> std::fmt::Debug for TaskFn<F>
where
    F: FnMut() -> TaskResult<()> + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFn").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_fn_runs_closure_repeatedly() {
        let mut calls = 0;
        let task = TaskFn::new("counter", move || {
            calls += 1;
            if calls > 1 {
                Err(TaskError::Failed(format!("call {calls}")))
            } else {
                Ok(())
            }
        });

        assert_eq!(task.name(), "counter");
        assert!(task.run().is_ok());
        assert!(matches!(task.run(), Err(TaskError::Failed(msg)) if msg == "call 2"));
    }
}
