//! Worker loop: claims queued tasks and drives each one to a terminal status.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, StoreError};
use crate::store::TaskStore;
use crate::task::Task;
use crate::worker::executor::ExecutorRegistry;

/// Receiving half of the dispatcher queue, shared by every worker.
///
/// Each `recv` hands a task to exactly one worker.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn TaskStore>,
    pub executors: Arc<ExecutorRegistry>,
    /// Deadline for one executor invocation.
    pub execution_timeout: Duration,
    pub store_write_attempts: u32,
    pub store_retry_delay: Duration,
    /// Tasks sent to the queue and not yet claimed.
    pub queued: Arc<AtomicUsize>,
    /// Tasks dropped with no status written.
    pub abandoned: Arc<AtomicUsize>,
}

/// One member of the dispatcher's pool.
pub struct Worker {
    id: usize,
    deps: WorkerDeps,
}

impl Worker {
    pub fn new(id: usize, deps: WorkerDeps) -> Self {
        Self { id, deps }
    }

    /// Pull tasks until the queue is closed and drained.
    pub async fn run(self, queue: SharedQueue) {
        info!(worker = self.id, "Worker started");

        loop {
            // Lock is held only while waiting, released before processing.
            let next = queue.lock().await.recv().await;
            match next {
                Some(task) => {
                    self.deps.queued.fetch_sub(1, Ordering::SeqCst);
                    self.process(task).await;
                }
                None => break,
            }
        }

        info!(worker = self.id, "Queue closed, worker exiting");
    }

    /// Claim one task, execute it, and persist its terminal state.
    ///
    /// Returns the task as last written by this worker.
    pub async fn process(&self, mut task: Task) -> Task {
        info!(worker = self.id, task_id = %task.id, kind = %task.kind, "Worker picked task");

        if let Err(e) = task.mark_running() {
            warn!(worker = self.id, error = %e, "Skipping task that is not pending");
            return task;
        }
        if let Err(e) = self.persist(&task).await {
            // Never execute a task the store does not show as running.
            error!(
                worker = self.id,
                task_id = %task.id,
                error = %e,
                "Failed to persist running status"
            );
            self.fail_unstarted(&mut task, &e).await;
            return task;
        }

        let outcome = match self.execute(&task).await {
            Ok(result) => {
                info!(worker = self.id, task_id = %task.id, "Task completed");
                task.complete(result)
            }
            Err(e) => {
                warn!(worker = self.id, task_id = %task.id, error = %e, "Task failed");
                task.fail(e.to_string())
            }
        };
        if let Err(e) = outcome {
            error!(worker = self.id, error = %e, "Terminal transition rejected");
            return task;
        }

        if let Err(e) = self.persist(&task).await {
            error!(
                worker = self.id,
                task_id = %task.id,
                status = %task.status,
                error = %e,
                "Failed to persist terminal status"
            );
        }
        task
    }

    /// Record a task that never started as failed, or count it abandoned.
    async fn fail_unstarted(&self, task: &mut Task, cause: &StoreError) {
        if let Err(e) = task.fail(format!("unable to record running status: {cause}")) {
            error!(worker = self.id, error = %e, "Terminal transition rejected");
            return;
        }
        if let Err(e) = self.persist(task).await {
            self.deps.abandoned.fetch_add(1, Ordering::SeqCst);
            error!(
                worker = self.id,
                task_id = %task.id,
                error = %e,
                "Failed to persist failure, task abandoned"
            );
        }
    }

    /// Resolve the executor for the task's kind and run it under the deadline.
    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError> {
        let executor =
            self.deps
                .executors
                .get(&task.kind)
                .await
                .ok_or_else(|| ExecutionError::UnknownKind {
                    kind: task.kind.clone(),
                })?;

        let timeout = self.deps.execution_timeout;
        let run = AssertUnwindSafe(executor.execute(&task.payload)).catch_unwind();

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ExecutionError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(ExecutionError::Timeout { timeout }),
        }
    }

    /// Write the record, retrying transient backend failures.
    async fn persist(&self, task: &Task) -> Result<(), StoreError> {
        let attempts = self.deps.store_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.deps.store.update(task).await {
                Ok(()) => {
                    debug!(worker = self.id, task_id = %task.id, status = %task.status, "Task persisted");
                    return Ok(());
                }
                Err(e) if e.is_not_found() || attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        worker = self.id,
                        task_id = %task.id,
                        attempt,
                        error = %e,
                        "Store write failed, retrying"
                    );
                    tokio::time::sleep(self.deps.store_retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
