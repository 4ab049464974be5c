//! Persistence layer: where completed onboarding is remembered.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlCompletionStore;
pub use memory::MemoryCompletionStore;
pub use traits::CompletionStore;
