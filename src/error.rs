//! Error types for the triage pipeline.

use std::time::Duration;

use crate::pipeline::types::Category;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Per-source fetch failure. Isolated to the source that raised it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Feed {source_name} timed out after {after:?}")]
    Timeout { source_name: String, after: Duration },

    #[error("Feed {source_name} transport failure: {reason}")]
    Transport { source_name: String, reason: String },

    #[error("Feed {source_name} rejected credentials")]
    Auth { source_name: String },

    #[error("Feed {source_name} returned a malformed payload: {reason}")]
    Malformed { source_name: String, reason: String },
}

/// A single raw record that cannot become a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Rule-table errors.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("Category {0:?} has no keyword table")]
    NoTermsForCategory(Category),

    #[error("Failed to load rules from {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Unknown value for a closed string-mapped enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Batch-level ingestion failure.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The store failed; nothing from this run was committed. The per-source
    /// counts gathered before the failure are kept in `report`.
    #[error("Persistence failed, batch rolled back: {source}")]
    Persistence {
        #[source]
        source: DatabaseError,
        report: Box<crate::pipeline::ingestor::IngestResult>,
    },
}

impl IngestError {
    /// Per-source diagnostics captured before the failure.
    pub fn report(&self) -> &crate::pipeline::ingestor::IngestResult {
        match self {
            Self::Persistence { report, .. } => report,
        }
    }
}
