//! Persistence layer — completions, points ledger, streak cache, achievements.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::CompletionStore;
