//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 5;
/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default per-task execution deadline.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatcher and worker-pool configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Maximum number of queued, not yet claimed tasks.
    pub queue_capacity: usize,
    /// Deadline for a single executor invocation.
    pub execution_timeout: Duration,
    /// Bounded wait for queue space in `submit`. `None` blocks until space frees up.
    pub submit_timeout: Option<Duration>,
    /// Attempts per store write issued by a worker (minimum 1).
    pub store_write_attempts: u32,
    /// Pause between store write attempts.
    pub store_retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            submit_timeout: None,
            store_write_attempts: 3,
            store_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// libSQL database file. `None` selects the in-memory store.
    pub db_path: Option<PathBuf>,
    pub dispatcher: DispatcherConfig,
    /// How long to let in-flight HTTP requests drain on shutdown.
    pub shutdown_grace: Duration,
}

impl AppConfig {
    /// Build from `TASKFLOW_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DispatcherConfig::default();

        let listen_addr = parse_or(&lookup, "TASKFLOW_LISTEN_ADDR", || {
            SocketAddr::from(([0, 0, 0, 0], 8080))
        })?;

        let db_path = lookup("TASKFLOW_DB_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let workers: usize = parse_or(&lookup, "TASKFLOW_WORKERS", || defaults.workers)?;
        require_positive("TASKFLOW_WORKERS", workers as u64)?;

        let queue_capacity: usize =
            parse_or(&lookup, "TASKFLOW_QUEUE_CAPACITY", || defaults.queue_capacity)?;
        require_positive("TASKFLOW_QUEUE_CAPACITY", queue_capacity as u64)?;

        let execution_secs: u64 = parse_or(&lookup, "TASKFLOW_EXECUTION_TIMEOUT_SECS", || {
            defaults.execution_timeout.as_secs()
        })?;
        require_positive("TASKFLOW_EXECUTION_TIMEOUT_SECS", execution_secs)?;

        let submit_timeout = parse_opt::<u64, _>(&lookup, "TASKFLOW_SUBMIT_TIMEOUT_MS")?
            .map(Duration::from_millis);

        let store_write_attempts: u32 = parse_or(&lookup, "TASKFLOW_STORE_WRITE_ATTEMPTS", || {
            defaults.store_write_attempts
        })?;
        require_positive("TASKFLOW_STORE_WRITE_ATTEMPTS", store_write_attempts as u64)?;

        let shutdown_secs: u64 = parse_or(&lookup, "TASKFLOW_SHUTDOWN_GRACE_SECS", || 5)?;

        Ok(Self {
            listen_addr,
            db_path,
            dispatcher: DispatcherConfig {
                workers,
                queue_capacity,
                execution_timeout: Duration::from_secs(execution_secs),
                submit_timeout,
                store_write_attempts,
                ..defaults
            },
            shutdown_grace: Duration::from_secs(shutdown_secs),
        })
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{raw}': {e}"),
                })
        }
        _ => Ok(None),
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: impl FnOnce() -> T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or_else(default))
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
