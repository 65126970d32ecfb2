//! HTTP boundary: creates tasks, hands them to the dispatcher, and reads persisted state.

pub mod routes;

pub use routes::{AppState, task_routes};
