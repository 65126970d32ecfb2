//! libSQL backend: async `TaskStore` implementation.
//!
//! Supports local file and in-memory databases. Payload and result are stored
//! as JSON text, timestamps as RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::TaskStore;
use crate::task::{Task, TaskStatus};

const TASK_COLUMNS: &str = "id, kind, payload, status, result, error, created_at, finished_at";

/// libSQL task store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlTaskStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTaskStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn parse_datetime(column: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("task.{column} '{s}': {e}")))
}

fn parse_json(column: &str, s: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Serialization(format!("task.{column}: {e}")))
}

fn to_json(value: &serde_json::Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map a libsql Row to a Task. Column order matches `TASK_COLUMNS`.
fn row_to_task(row: &libsql::Row) -> Result<Task, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("task.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Serialization(format!("task.id parse: {e}")))?;

    let kind: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("task.kind: {e}")))?;
    let payload_str: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("task.payload: {e}")))?;
    let status_str: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("task.status: {e}")))?;
    let status: TaskStatus = status_str.parse().map_err(StoreError::Serialization)?;

    // Nullable columns
    let result_str: Option<String> = row.get::<String>(4).ok();
    let error: Option<String> = row.get::<String>(5).ok();
    let created_str: String = row
        .get(6)
        .map_err(|e| StoreError::Query(format!("task.created_at: {e}")))?;
    let finished_str: Option<String> = row.get::<String>(7).ok();

    Ok(Task {
        id,
        kind,
        payload: parse_json("payload", &payload_str)?,
        status,
        result: result_str
            .as_deref()
            .map(|s| parse_json("result", s))
            .transpose()?,
        error,
        created_at: parse_datetime("created_at", &created_str)?,
        finished_at: finished_str
            .as_deref()
            .map(|s| parse_datetime("finished_at", s))
            .transpose()?,
    })
}

#[async_trait]
impl TaskStore for LibSqlTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let result_json = task.result.as_ref().map(to_json).transpose()?;
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    task.id.to_string(),
                    task.kind.as_str(),
                    to_json(&task.payload)?,
                    task.status.as_str(),
                    result_json,
                    task.error.clone(),
                    task.created_at.to_rfc3339(),
                    task.finished_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_task: {e}")))?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists { id: task.id });
        }
        debug!(task_id = %task.id, "Task created");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_task(&row),
            Ok(None) => Err(StoreError::NotFound { id }),
            Err(e) => Err(StoreError::Query(format!("get_task row: {e}"))),
        }
    }

    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {TASK_COLUMNS} FROM tasks"), ())
            .await
            .map_err(|e| StoreError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => tasks.push(row_to_task(&row)?),
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("list_tasks row: {e}"))),
            }
        }
        Ok(tasks)
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let result_json = task.result.as_ref().map(to_json).transpose()?;
        let updated = self
            .conn()
            .execute(
                "UPDATE tasks SET kind = ?2, payload = ?3, status = ?4, result = ?5, error = ?6, finished_at = ?7
                 WHERE id = ?1",
                params![
                    task.id.to_string(),
                    task.kind.as_str(),
                    to_json(&task.payload)?,
                    task.status.as_str(),
                    result_json,
                    task.error.clone(),
                    task.finished_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_task: {e}")))?;

        if updated == 0 {
            return Err(StoreError::NotFound { id: task.id });
        }
        debug!(task_id = %task.id, status = %task.status, "Task updated");
        Ok(())
    }
}
