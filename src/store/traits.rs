//! `TaskStore` trait: the persistence contract the dispatcher and HTTP layer consume.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::task::Task;

/// Backend-agnostic task persistence.
///
/// Reads may run concurrently with each other and with writes to other ids.
/// Two concurrent `update`s of the same id are unordered; the dispatcher never
/// issues them, since only the worker that dequeued a task writes to it.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new record. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch one record. Fails with `NotFound` if the id is unknown.
    async fn get(&self, id: Uuid) -> Result<Task, StoreError>;

    /// All records, in no particular order.
    async fn get_all(&self) -> Result<Vec<Task>, StoreError>;

    /// Replace the full record for `task.id`. Fails with `NotFound` if absent.
    async fn update(&self, task: &Task) -> Result<(), StoreError>;
}
