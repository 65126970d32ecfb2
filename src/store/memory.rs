//! In-memory task store.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::traits::TaskStore;
use crate::task::Task;

/// Task store holding records in a map behind a reader/writer lock.
///
/// Records go in and come out by value, so callers never share a reference
/// to the stored copy.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.entry(task.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { id: task.id }),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                debug!(task_id = %task.id, "Task created");
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound { id: task.id })?;
        *stored = task.clone();
        debug!(task_id = %task.id, status = %task.status, "Task updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn get_missing_is_not_found() {
        conformance::get_missing_is_not_found(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn get_all_empty() {
        conformance::get_all_empty(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn create_then_get() {
        conformance::create_then_get(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        conformance::duplicate_create_rejected(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn update_replaces_record() {
        conformance::update_replaces_record(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        conformance::update_missing_is_not_found(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn get_all_returns_every_record() {
        conformance::get_all_returns_every_record(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn stored_copy_is_isolated_from_caller() {
        let store = MemoryTaskStore::new();
        let mut task = Task::new("echo", serde_json::json!(1));
        store.create(&task).await.unwrap();

        task.mark_running().unwrap();
        let stored = store.get(task.id).await.unwrap();
        assert_eq!(stored.status, crate::task::TaskStatus::Pending);
        assert_eq!(store.len().await, 1);
    }
}
