//! Background work for the dSS event core
//!
//! [`WorkerPool`] runs slow, multi-step work off the dispatch path in strict
//! FIFO order. [`CancellationToken`] lets deferred work notice that the
//! operation which scheduled it was cancelled or superseded.

mod abort;
mod pool;
mod task;

pub use abort::{AbortHandle, CancellationToken};
pub use pool::{TaskId, TaskScope, WorkerPool};
pub use task::{Task, TaskError, TaskFn, TaskRef, TaskResult};
