//! `Database` trait: single async interface for message persistence.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Category, DedupKey, Message, SourceKind};

/// Result of an atomic batch insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows actually written.
    pub inserted: usize,
    /// Keys that already existed in the store and were left untouched.
    pub duplicates: Vec<DedupKey>,
}

/// Filters for `list_messages`. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub category: Option<Category>,
    pub source: Option<SourceKind>,
    /// Case-insensitive substring match on content (e.g. a notable subject).
    pub subject: Option<String>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate counts over the stored messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub total: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_source: BTreeMap<SourceKind, usize>,
    /// Messages received in the last 24 hours.
    pub recent_24h: usize,
    /// Messages mentioning each requested subject. Subjects with no
    /// mentions are left out.
    pub subject_mentions: BTreeMap<String, usize>,
}

/// Backend-agnostic persistence for categorized messages.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Whether a message with this dedup key is already stored.
    async fn exists(&self, kind: SourceKind, source_id: &str) -> Result<bool, DatabaseError>;

    /// Insert a batch atomically. Rows whose dedup key already exists are
    /// skipped and reported; any other failure rolls back the whole batch.
    async fn insert_batch(&self, messages: &[Message]) -> Result<BatchOutcome, DatabaseError>;

    /// Manually override a message's category.
    async fn update_category(&self, id: Uuid, category: Category) -> Result<(), DatabaseError>;

    /// Get a message by ID.
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError>;

    /// Messages matching `query`, most recently received first.
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, DatabaseError>;

    /// Counts per category and per source, recent activity, and mentions of
    /// each of `subjects` (case-insensitive substring on content).
    async fn stats(&self, subjects: &BTreeSet<String>) -> Result<MessageStats, DatabaseError>;
}

/// Subset of `keys` the store already holds, in input order.
pub async fn known_keys(
    store: &dyn Database,
    keys: impl IntoIterator<Item = DedupKey>,
) -> Result<Vec<DedupKey>, DatabaseError> {
    let mut known = Vec::new();
    for key in keys {
        if store.exists(key.kind, &key.source_id).await? {
            known.push(key);
        }
    }
    Ok(known)
}
