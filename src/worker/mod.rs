//! Worker system: bounded queue, worker pool, and pluggable executors.
//!
//! Core components:
//! - `dispatcher`: owns the queue and the pool lifecycle (start, submit, shutdown)
//! - `worker`: claims one task at a time and drives it to a terminal status
//! - `executor`: `TaskExecutor` trait and the kind → executor registry
//! - `http_fetch`: built-in executor that GETs a URL and decodes JSON

pub mod dispatcher;
pub mod executor;
pub mod http_fetch;
pub mod worker;

pub use dispatcher::{Dispatcher, QueueSlot};
pub use executor::{ExecutorRegistry, TaskExecutor};
pub use http_fetch::HttpFetchExecutor;
pub use worker::{Worker, WorkerDeps};
