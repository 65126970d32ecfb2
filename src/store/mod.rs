//! Persistence layer: the `TaskStore` contract and its backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

#[cfg(test)]
pub(crate) mod conformance;

pub use libsql_backend::LibSqlTaskStore;
pub use memory::MemoryTaskStore;
pub use traits::TaskStore;
