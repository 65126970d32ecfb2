//! Behavioral checks every `TaskStore` backend must pass.
//!
//! Each backend's test module calls these against a fresh store.

use serde_json::json;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

pub async fn get_missing_is_not_found(store: &dyn TaskStore) {
    let id = Uuid::new_v4();
    let err = store.get(id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { id: missing } if missing == id));
}

pub async fn get_all_empty(store: &dyn TaskStore) {
    assert!(store.get_all().await.unwrap().is_empty());
}

pub async fn create_then_get(store: &dyn TaskStore) {
    let task = Task::new("http_fetch", json!({"url": "https://example.com/data"}));
    store.create(&task).await.unwrap();

    let fetched = store.get(task.id).await.unwrap();
    assert_eq!(fetched.id, task.id);
    assert_eq!(fetched.kind, "http_fetch");
    assert_eq!(fetched.payload, task.payload);
    assert_eq!(fetched.status, TaskStatus::Pending);
    assert!(fetched.result.is_none());
    assert!(fetched.error.is_none());
    assert!(fetched.finished_at.is_none());
    assert_eq!(
        fetched.created_at.timestamp_micros(),
        task.created_at.timestamp_micros()
    );
}

pub async fn duplicate_create_rejected(store: &dyn TaskStore) {
    let task = Task::new("echo", json!("a"));
    store.create(&task).await.unwrap();

    let err = store.create(&task).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { id } if id == task.id));
}

pub async fn update_replaces_record(store: &dyn TaskStore) {
    let mut task = Task::new("echo", json!("a"));
    store.create(&task).await.unwrap();

    task.mark_running().unwrap();
    store.update(&task).await.unwrap();
    assert_eq!(store.get(task.id).await.unwrap().status, TaskStatus::Running);

    task.complete(json!({"x": 1})).unwrap();
    store.update(&task).await.unwrap();

    let fetched = store.get(task.id).await.unwrap();
    assert_eq!(fetched.status, TaskStatus::Completed);
    assert_eq!(fetched.result, Some(json!({"x": 1})));
    assert!(fetched.error.is_none());
    assert!(fetched.finished_at.is_some());
}

pub async fn update_missing_is_not_found(store: &dyn TaskStore) {
    let task = Task::new("echo", json!("never stored"));
    let err = store.update(&task).await.unwrap_err();
    assert!(err.is_not_found());
}

pub async fn get_all_returns_every_record(store: &dyn TaskStore) {
    let mut ids = Vec::new();
    for i in 0..5 {
        let task = Task::new("echo", json!(i));
        store.create(&task).await.unwrap();
        ids.push(task.id);
    }

    let mut listed: Vec<Uuid> = store.get_all().await.unwrap().iter().map(|t| t.id).collect();
    listed.sort();
    ids.sort();
    assert_eq!(listed, ids);
}
