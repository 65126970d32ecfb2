//! Pluggable task executors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ExecutionError;

/// Runs one kind of task.
///
/// Implementations validate the payload shape themselves and report every
/// failure as an `ExecutionError`; the worker records it on the task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The `Task::kind` this executor handles.
    fn kind(&self) -> &str;

    /// Execute a payload and produce the task result.
    async fn execute(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Registry mapping task kinds to executors.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register an executor, replacing any previous one for the same kind.
    pub async fn register(&self, executor: Arc<dyn TaskExecutor>) {
        let kind = executor.kind().to_string();
        if self
            .executors
            .write()
            .await
            .insert(kind.clone(), executor)
            .is_some()
        {
            tracing::warn!(kind = %kind, "Replaced existing executor");
        }
        tracing::debug!("Registered executor: {}", kind);
    }

    /// Register an executor during startup, before any worker holds the lock.
    ///
    /// Returns `false` if the registry was busy and nothing was registered.
    #[must_use]
    pub fn register_sync(&self, executor: Arc<dyn TaskExecutor>) -> bool {
        let kind = executor.kind().to_string();
        match self.executors.try_write() {
            Ok(mut executors) => {
                executors.insert(kind.clone(), executor);
                tracing::debug!("Registered executor: {}", kind);
                true
            }
            Err(_) => {
                tracing::warn!(kind = %kind, "Executor registry busy, registration skipped");
                false
            }
        }
    }

    /// Get an executor by kind.
    pub async fn get(&self, kind: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.read().await.get(kind).cloned()
    }

    /// Check if an executor exists for `kind`.
    pub async fn has(&self, kind: &str) -> bool {
        self.executors.read().await.contains_key(kind)
    }

    /// List all registered kinds.
    pub async fn list(&self) -> Vec<String> {
        self.executors.read().await.keys().cloned().collect()
    }

    /// Get the number of registered executors.
    pub fn count(&self) -> usize {
        self.executors.try_read().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
