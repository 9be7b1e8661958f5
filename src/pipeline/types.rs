//! Shared types for the classification and ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FetchError, MalformedRecordError, ParseEnumError};

// ── Category ────────────────────────────────────────────────────────

/// Priority category assigned to every admitted message.
///
/// The string mapping is stable: it is what the store persists and what
/// crosses any API boundary. Unknown strings are rejected, never defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Urgent,
    HighPriority,
    Routine,
    Archive,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Urgent,
        Category::HighPriority,
        Category::Routine,
        Category::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::HighPriority => "high_priority",
            Self::Routine => "routine",
            Self::Archive => "archive",
        }
    }

    /// Display name used in explanations.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Urgent => "URGENT",
            Self::HighPriority => "HIGH PRIORITY",
            Self::Routine => "ROUTINE",
            Self::Archive => "ARCHIVE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Self::Urgent),
            "high_priority" => Ok(Self::HighPriority),
            "routine" => Ok(Self::Routine),
            "archive" => Ok(Self::Archive),
            other => Err(ParseEnumError {
                kind: "category",
                value: other.to_string(),
            }),
        }
    }
}

// ── Source kind ─────────────────────────────────────────────────────

/// Origin channel of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Telegram,
    Twitter,
    /// Timeline of a tracked account, as opposed to mentions.
    TwitterFeed,
    /// Records synthesized locally (heartbeat placeholder).
    System,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Twitter => "twitter",
            Self::TwitterFeed => "twitter_feed",
            Self::System => "system",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Self::Telegram),
            "twitter" => Ok(Self::Twitter),
            "twitter_feed" => Ok(Self::TwitterFeed),
            "system" => Ok(Self::System),
            other => Err(ParseEnumError {
                kind: "source kind",
                value: other.to_string(),
            }),
        }
    }
}

// ── Dedup key ───────────────────────────────────────────────────────

/// `(source_kind, source_id)`: the only identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub kind: SourceKind,
    pub source_id: String,
}

impl DedupKey {
    pub fn new(kind: SourceKind, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
        }
    }
}

// ── Raw record ──────────────────────────────────────────────────────

/// A record as delivered by a feed, already normalized to the common shape.
///
/// Every field is optional on the wire; `validate()` decides whether the
/// record can become a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl RawRecord {
    pub fn new(
        source_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: Some(source_id.into()),
            sender: Some(sender.into()),
            content: Some(content.into()),
            received_at: Some(received_at),
        }
    }

    /// Check required fields. A blank `source_id` counts as missing;
    /// empty content is allowed.
    pub fn validate(self) -> Result<ValidRecord, MalformedRecordError> {
        let source_id = self
            .source_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(MalformedRecordError::MissingField("source_id"))?;
        let sender = self
            .sender
            .ok_or(MalformedRecordError::MissingField("sender"))?;
        let content = self
            .content
            .ok_or(MalformedRecordError::MissingField("content"))?;
        let received_at = self
            .received_at
            .ok_or(MalformedRecordError::MissingField("received_at"))?;

        Ok(ValidRecord {
            source_id,
            sender,
            content,
            received_at,
        })
    }
}

/// A raw record with every required field present.
#[derive(Debug, Clone)]
pub struct ValidRecord {
    pub source_id: String,
    pub sender: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

// ── Message ─────────────────────────────────────────────────────────

/// Sender recorded on heartbeat placeholders.
pub const HEARTBEAT_SENDER: &str = "system";

/// Content recorded on heartbeat placeholders.
pub const HEARTBEAT_CONTENT: &str = "Sync completed: all feeds returned no new messages";

/// A categorized message, ready for (or loaded from) persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub source_kind: SourceKind,
    /// `None` only for locally synthesized records, which are never deduplicated.
    pub source_id: Option<String>,
    pub sender: String,
    pub content: String,
    pub category: Category,
    /// Timestamp assigned by the origin channel.
    pub received_at: DateTime<Utc>,
    /// Timestamp assigned at admission.
    pub admitted_at: DateTime<Utc>,
}

impl Message {
    /// Build a message from a validated feed record.
    pub fn admit(
        kind: SourceKind,
        record: ValidRecord,
        category: Category,
        admitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_kind: kind,
            source_id: Some(record.source_id),
            sender: record.sender,
            content: record.content,
            category,
            received_at: record.received_at,
            admitted_at,
        }
    }

    /// Placeholder marking a successful ingestion run that found nothing.
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_kind: SourceKind::System,
            source_id: None,
            sender: HEARTBEAT_SENDER.to_string(),
            content: HEARTBEAT_CONTENT.to_string(),
            category: Category::Routine,
            received_at: now,
            admitted_at: now,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.source_kind == SourceKind::System && self.source_id.is_none()
    }

    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.source_id
            .as_ref()
            .map(|id| DedupKey::new(self.source_kind, id.clone()))
    }
}

// ── Feed source trait ───────────────────────────────────────────────

/// An external channel producing raw records. Pure I/O, no classification.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Name used in logs and per-source outcomes.
    fn name(&self) -> &str;

    /// Origin channel of every record this source produces.
    fn kind(&self) -> SourceKind;

    /// Fetch the current batch of records, in the source's native order.
    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError>;
}
