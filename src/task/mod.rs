//! Task record and its lifecycle state machine.

pub mod model;

pub use model::{DEFAULT_KIND, Task, TaskStatus};
