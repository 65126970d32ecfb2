//! Dispatcher: bounded task queue plus a fixed pool of workers.
//!
//! Lifecycle: `new` → `start` → any number of `submit`s → `shutdown`.
//! Shutdown closes the queue, lets the workers drain whatever is still queued,
//! and waits for them to exit. It never interrupts a running task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, DispatcherConfig};
use crate::error::DispatchError;
use crate::store::TaskStore;
use crate::task::Task;
use crate::worker::executor::ExecutorRegistry;
use crate::worker::worker::{SharedQueue, Worker, WorkerDeps};

/// A reserved place in the queue.
///
/// Dropping the slot without sending releases the place.
pub struct QueueSlot {
    permit: mpsc::OwnedPermit<Task>,
    queued: Arc<AtomicUsize>,
}

impl QueueSlot {
    /// Hand the task to the pool. Cannot fail: the place is already held.
    pub fn send(self, task: Task) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        drop(self.permit.send(task));
    }
}

/// Owns the task queue and the worker pool.
pub struct Dispatcher {
    workers: usize,
    capacity: usize,
    submit_timeout: Option<Duration>,
    deps: WorkerDeps,
    /// `None` once shutdown has begun.
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    /// Taken by `start`.
    rx: Mutex<Option<mpsc::Receiver<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher. Zero workers or zero capacity fall back to the defaults.
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn TaskStore>,
        executors: Arc<ExecutorRegistry>,
    ) -> Self {
        let workers = if config.workers == 0 {
            DEFAULT_WORKERS
        } else {
            config.workers
        };
        let capacity = if config.queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            config.queue_capacity
        };
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            workers,
            capacity,
            submit_timeout: config.submit_timeout,
            deps: WorkerDeps {
                store,
                executors,
                execution_timeout: config.execution_timeout,
                store_write_attempts: config.store_write_attempts,
                store_retry_delay: config.store_retry_delay,
                queued: Arc::new(AtomicUsize::new(0)),
                abandoned: Arc::new(AtomicUsize::new(0)),
            },
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch the worker pool. Fails if called more than once.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or(DispatchError::AlreadyStarted)?;
        let queue: SharedQueue = Arc::new(Mutex::new(rx));

        let mut handles = self.handles.lock().await;
        for id in 0..self.workers {
            let worker = Worker::new(id, self.deps.clone());
            handles.push(tokio::spawn(worker.run(Arc::clone(&queue))));
        }

        info!(
            workers = self.workers,
            capacity = self.capacity,
            "Dispatcher started"
        );
        Ok(())
    }

    async fn sender(&self, task: &Task) -> Result<mpsc::Sender<Task>, DispatchError> {
        self.tx
            .lock()
            .await
            .clone()
            .ok_or(DispatchError::Closed { id: task.id })
    }

    fn slot(&self, permit: mpsc::OwnedPermit<Task>) -> QueueSlot {
        QueueSlot {
            permit,
            queued: Arc::clone(&self.deps.queued),
        }
    }

    /// Reserve a place in the queue for `task` without handing it over yet.
    ///
    /// Waits while the queue is full, bounded by `submit_timeout` when one is
    /// configured.
    pub async fn reserve(&self, task: &Task) -> Result<QueueSlot, DispatchError> {
        match self.submit_timeout {
            Some(timeout) => self.reserve_within(task, timeout).await,
            None => {
                let tx = self.sender(task).await?;
                let permit = tx
                    .reserve_owned()
                    .await
                    .map_err(|_| DispatchError::Closed { id: task.id })?;
                Ok(self.slot(permit))
            }
        }
    }

    /// Reserve a place, giving up if none frees within `timeout`.
    pub async fn reserve_within(
        &self,
        task: &Task,
        timeout: Duration,
    ) -> Result<QueueSlot, DispatchError> {
        let tx = self.sender(task).await?;
        match tokio::time::timeout(timeout, tx.reserve_owned()).await {
            Ok(Ok(permit)) => Ok(self.slot(permit)),
            Ok(Err(_)) => Err(DispatchError::Closed { id: task.id }),
            Err(_) => {
                warn!(task_id = %task.id, ?timeout, "Queue full, submission timed out");
                Err(DispatchError::SubmitTimeout {
                    id: task.id,
                    timeout,
                })
            }
        }
    }

    /// Reserve a place only if one is free right now.
    pub async fn try_reserve(&self, task: &Task) -> Result<QueueSlot, DispatchError> {
        let tx = self.sender(task).await?;
        match tx.try_reserve_owned() {
            Ok(permit) => Ok(self.slot(permit)),
            Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull {
                id: task.id,
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed { id: task.id }),
        }
    }

    /// Enqueue a task.
    ///
    /// While the queue is full this waits for a worker to free a slot; without
    /// a configured `submit_timeout` it waits indefinitely.
    pub async fn submit(&self, task: Task) -> Result<(), DispatchError> {
        self.reserve(&task).await?.send(task);
        Ok(())
    }

    /// Enqueue a task, giving up if no slot frees within `timeout`.
    pub async fn submit_within(&self, task: Task, timeout: Duration) -> Result<(), DispatchError> {
        self.reserve_within(&task, timeout).await?.send(task);
        Ok(())
    }

    /// Enqueue a task only if a slot is free right now.
    pub async fn try_submit(&self, task: Task) -> Result<(), DispatchError> {
        self.try_reserve(&task).await?.send(task);
        Ok(())
    }

    /// Close the queue and wait for every worker to drain it and exit.
    ///
    /// Returns `NotStarted` if the pool was never launched; queued tasks then
    /// stay pending.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        info!("Shutting down dispatcher");
        // The channel closes once blocked reservations and held slots are resolved.
        self.tx.lock().await.take();

        if self.rx.lock().await.is_some() {
            warn!("Dispatcher shut down before it was started");
            return Err(DispatchError::NotStarted);
        }

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let count = handles.len();
        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(worker = id, error = %e, "Worker exited abnormally");
            }
        }

        info!(workers = count, "All workers have finished, dispatcher shutdown complete");
        Ok(())
    }

    /// Whether `submit` can still accept tasks.
    pub async fn is_accepting(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Number of tasks waiting in the queue, including while shutdown drains it.
    pub fn queued(&self) -> usize {
        self.deps.queued.load(Ordering::SeqCst)
    }

    /// Tasks a worker dropped because neither their running nor their failed
    /// status could be written.
    pub fn abandoned(&self) -> usize {
        self.deps.abandoned.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use crate::task::TaskStatus;
    use serde_json::json;

    fn dispatcher(config: DispatcherConfig) -> (Dispatcher, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        let dispatcher = Dispatcher::new(
            config,
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::new(ExecutorRegistry::new()),
        );
        (dispatcher, store)
    }

    #[tokio::test]
    async fn zero_sizes_fall_back_to_defaults() {
        let (d, _) = dispatcher(DispatcherConfig {
            workers: 0,
            queue_capacity: 0,
            ..Default::default()
        });
        assert_eq!(d.worker_count(), 5);
        assert_eq!(d.capacity(), 100);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (d, _) = dispatcher(DispatcherConfig::default());
        d.start().await.unwrap();
        assert!(matches!(d.start().await, Err(DispatchError::AlreadyStarted)));
        d.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let (d, _) = dispatcher(DispatcherConfig::default());
        d.start().await.unwrap();
        d.shutdown().await.unwrap();

        assert!(!d.is_accepting().await);
        let err = d.submit(Task::new("echo", json!(1))).await.unwrap_err();
        assert!(matches!(err, DispatchError::Closed { .. }));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (d, _) = dispatcher(DispatcherConfig::default());
        d.start().await.unwrap();
        d.shutdown().await.unwrap();
        d.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_start_reports_not_started() {
        let (d, _) = dispatcher(DispatcherConfig::default());
        assert!(matches!(d.shutdown().await, Err(DispatchError::NotStarted)));
    }

    #[tokio::test]
    async fn try_submit_reports_full_queue() {
        let (d, _) = dispatcher(DispatcherConfig {
            queue_capacity: 2,
            ..Default::default()
        });
        // Not started, so nothing drains the queue.
        d.try_submit(Task::new("echo", json!(1))).await.unwrap();
        d.try_submit(Task::new("echo", json!(2))).await.unwrap();
        assert_eq!(d.queued(), 2);

        let err = d.try_submit(Task::new("echo", json!(3))).await.unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull { capacity: 2, .. }));
    }

    #[tokio::test]
    async fn dropped_slot_releases_its_place() {
        let (d, _) = dispatcher(DispatcherConfig {
            queue_capacity: 1,
            ..Default::default()
        });
        let task = Task::new("echo", json!(1));
        let slot = d.try_reserve(&task).await.unwrap();
        assert_eq!(d.queued(), 0);

        let err = d.try_submit(Task::new("echo", json!(2))).await.unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull { .. }));

        drop(slot);
        d.try_submit(task).await.unwrap();
        assert_eq!(d.queued(), 1);
    }

    #[tokio::test]
    async fn bounded_submit_times_out_on_full_queue() {
        let (d, _) = dispatcher(DispatcherConfig {
            queue_capacity: 1,
            submit_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        d.submit(Task::new("echo", json!(1))).await.unwrap();

        let err = d.submit(Task::new("echo", json!(2))).await.unwrap_err();
        assert!(matches!(err, DispatchError::SubmitTimeout { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_is_failed_by_pool() {
        let (d, store) = dispatcher(DispatcherConfig::default());
        d.start().await.unwrap();

        let task = Task::new("nope", json!(1));
        store.create(&task).await.unwrap();
        d.submit(task.clone()).await.unwrap();
        d.shutdown().await.unwrap();

        let stored = store.get(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
    }
}
