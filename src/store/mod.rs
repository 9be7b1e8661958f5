//! Persistence layer: libSQL-backed storage for categorized messages.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{BatchOutcome, Database, MessageQuery, MessageStats, known_keys};
