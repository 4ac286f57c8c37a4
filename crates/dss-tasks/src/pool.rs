//! Single-worker FIFO task pool

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use ulid::Ulid;

use crate::abort::{AbortHandle, CancellationToken};
use crate::task::{Task, TaskError, TaskFn, TaskRef, TaskResult};

/// Identifier assigned to every submitted task, used in logs
pub type TaskId = Ulid;

struct QueuedTask {
    id: TaskId,
    task: TaskRef,
    abort: Option<AbortHandle>,
}

struct PoolInner {
    name: String,
    queue: Mutex<VecDeque<QueuedTask>>,
    wakeup: Notify,
    shutdown: AtomicBool,
}

impl PoolInner {
    fn next(&self) -> Option<QueuedTask> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn execute(&self, queued: QueuedTask) {
        let QueuedTask { id, task, abort } = queued;

        if abort.as_ref().is_some_and(AbortHandle::is_aborted) {
            trace!(pool = %self.name, task = task.name(), %id, "Skipping cancelled task");
            return;
        }

        let name = task.name().to_string();
        trace!(pool = %self.name, task = %name, %id, "Running task");

        let outcome = tokio::task::spawn_blocking(move || task.run()).await;
        match outcome {
            Ok(Ok(())) => trace!(pool = %self.name, task = %name, %id, "Task finished"),
            Ok(Err(e)) => error!(pool = %self.name, task = %name, %id, error = %e, "Task failed"),
            Err(join_err) if join_err.is_panic() => {
                error!(pool = %self.name, task = %name, %id, "Task panicked")
            }
            Err(join_err) => {
                warn!(pool = %self.name, task = %name, %id, error = %join_err, "Task aborted")
            }
        }
    }
}

/// Runs submitted tasks one at a time, in submission order
///
/// One worker drains the queue. Each task runs on tokio's blocking thread
/// pool and the worker waits for it before taking the next one, so a slow
/// task delays the queue but never the submitter. A failing or panicking
/// task is logged and the worker moves on.
///
/// Must be created inside a tokio runtime.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool and start its worker
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(PoolInner {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = tokio::spawn(Self::run_worker(Arc::clone(&inner)));
        debug!(pool = %inner.name, "Worker pool started");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run_worker(inner: Arc<PoolInner>) {
        loop {
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            match inner.next() {
                Some(queued) => inner.execute(queued).await,
                None => inner.wakeup.notified().await,
            }
        }

        let dropped = {
            let mut queue = inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let count = queue.len();
            queue.clear();
            count
        };
        debug!(pool = %inner.name, dropped, "Worker pool stopped");
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Queue a task for execution
    pub fn submit(&self, task: TaskRef) -> TaskResult<TaskId> {
        self.enqueue(task, None)
    }

    /// Queue a closure for execution
    pub fn submit_fn<F>(&self, name: &'static str, func: F) -> TaskResult<TaskId>
    where
        F: FnMut() -> TaskResult<()> + Send + 'static,
    {
        self.submit(TaskFn::arc(name, func))
    }

    /// Queue a task that is skipped if the returned scope is dropped before
    /// the worker reaches it
    pub fn submit_scoped(&self, task: TaskRef) -> TaskResult<TaskScope> {
        let token = CancellationToken::new();
        let handle = token.next_handle();
        let id = self.enqueue(Arc::clone(&task), Some(handle))?;
        Ok(TaskScope { id, token, task })
    }

    fn enqueue(&self, task: TaskRef, abort: Option<AbortHandle>) -> TaskResult<TaskId> {
        if self.is_shutdown() {
            warn!(pool = %self.inner.name, task = task.name(), "Dropping task submitted after shutdown");
            return Err(TaskError::PoolClosed(self.inner.name.clone()));
        }

        let id = Ulid::new();
        trace!(pool = %self.inner.name, task = task.name(), %id, "Queueing task");
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(QueuedTask { id, task, abort });
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Stop the worker and wait for it to exit
    ///
    /// A task that is already running finishes; queued tasks are dropped.
    pub async fn shutdown(&self) {
        self.signal_shutdown();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(pool = %self.inner.name, error = %e, "Worker pool task failed");
            }
        }
    }

    fn signal_shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

/// Guard returned by [`WorkerPool::submit_scoped`]
///
/// Dropping it cancels the task: a queued task is skipped and a running task
/// gets [`Task::cancel`] called.
pub struct TaskScope {
    id: TaskId,
    token: CancellationToken,
    task: TaskRef,
}

impl TaskScope {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.token.abort();
        self.task.cancel();
    }
}
