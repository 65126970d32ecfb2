//! Task model and status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Executor kind used when a submission does not name one.
pub const DEFAULT_KIND: &str = "http_fetch";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Persisted and queued, not yet claimed by a worker.
    Pending,
    /// Claimed by exactly one worker and executing.
    Running,
    /// Executor produced a result.
    Completed,
    /// Executor failed or exceeded its deadline.
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A unit of work and its persisted record.
///
/// `result` is only set by [`Task::complete`] and `error` only by [`Task::fail`];
/// both also stamp `finished_at`, so the three fields are populated together
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Executor discriminator, resolved through the executor registry.
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with a fresh id.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    fn transition_to(&mut self, target: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    /// `Pending -> Running`: a worker has claimed the task.
    pub fn mark_running(&mut self) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Running)
    }

    /// `Running -> Completed` with the executor's result.
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(result);
        self.finished_at = Some(self.finish_time());
        Ok(())
    }

    /// `Running -> Failed` with a human-readable reason.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.finished_at = Some(self.finish_time());
        Ok(())
    }

    /// Never earlier than `created_at`, even if the wall clock stepped back.
    fn finish_time(&self) -> DateTime<Utc> {
        Utc::now().max(self.created_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
