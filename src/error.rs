//! Error types for taskflow.

use std::time::Duration;

use uuid::Uuid;

use crate::task::TaskStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors surfaced by every `TaskStore` operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} already exists")]
    AlreadyExists { id: Uuid },

    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this error means the record is absent (as opposed to a backend failure).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Illegal moves in the task state machine.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Dispatcher lifecycle and submission errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher already started")]
    AlreadyStarted,

    #[error("Dispatcher has not been started")]
    NotStarted,

    #[error("Dispatcher is shut down, task {id} was not queued")]
    Closed { id: Uuid },

    #[error("Queue is full ({capacity} tasks), task {id} was not queued")]
    QueueFull { id: Uuid, capacity: usize },

    #[error("Timed out after {timeout:?} waiting for queue space for task {id}")]
    SubmitTimeout { id: Uuid, timeout: Duration },
}

/// Executor failures. These are recorded on the task as `Failed`, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("no executor registered for kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("unable to create a new request: {0}")]
    Request(String),

    #[error("unable to execute the request: {0}")]
    Transport(String),

    #[error("http error: status: {status}")]
    HttpStatus { status: String },

    #[error("unable to decode the response body: {0}")]
    Decode(String),

    #[error("execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("executor panicked: {0}")]
    Panicked(String),
}
