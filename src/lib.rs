//! Taskflow: asynchronous task execution engine.

pub mod api;
pub mod config;
pub mod error;
pub mod store;
pub mod task;
pub mod worker;
