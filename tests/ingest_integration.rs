//! End-to-end refresh cycles against an in-memory libSQL store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Barrier, Mutex};
use uuid::Uuid;

use comms_triage::error::{DatabaseError, FetchError, IngestError};
use comms_triage::feeds::MockFeed;
use comms_triage::pipeline::{
    Category, FeedSource, Ingestor, Message, RawRecord, RuleSet, RulesHandle, SourceKind,
    SourceStatus,
};
use comms_triage::store::{
    BatchOutcome, Database, LibSqlBackend, MessageQuery, MessageStats,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Feed whose records can be swapped between refreshes.
struct ScriptedFeed {
    name: &'static str,
    kind: SourceKind,
    records: Mutex<Vec<RawRecord>>,
}

impl ScriptedFeed {
    fn new(name: &'static str, kind: SourceKind, records: Vec<RawRecord>) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            records: Mutex::new(records),
        })
    }

    async fn set(&self, records: Vec<RawRecord>) {
        *self.records.lock().await = records;
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn name(&self) -> &str {
        self.name
    }
    fn kind(&self) -> SourceKind {
        self.kind
    }
    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        Ok(self.records.lock().await.clone())
    }
}

struct DownFeed;

#[async_trait]
impl FeedSource for DownFeed {
    fn name(&self) -> &str {
        "twitter"
    }
    fn kind(&self) -> SourceKind {
        SourceKind::Twitter
    }
    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        Err(FetchError::Transport {
            source_name: "twitter".into(),
            reason: "connection refused".into(),
        })
    }
}

struct HangingFeed;

#[async_trait]
impl FeedSource for HangingFeed {
    fn name(&self) -> &str {
        "twitter_feed"
    }
    fn kind(&self) -> SourceKind {
        SourceKind::TwitterFeed
    }
    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        std::future::pending().await
    }
}

/// Store that works for lookups but fails every write.
struct ReadOnlyStore {
    inner: LibSqlBackend,
    fail_lookups: AtomicBool,
}

#[async_trait]
impl Database for ReadOnlyStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }
    async fn exists(&self, kind: SourceKind, source_id: &str) -> Result<bool, DatabaseError> {
        if self.fail_lookups.load(Ordering::Relaxed) {
            return Err(DatabaseError::Pool("connection lost".into()));
        }
        self.inner.exists(kind, source_id).await
    }
    async fn insert_batch(&self, _messages: &[Message]) -> Result<BatchOutcome, DatabaseError> {
        Err(DatabaseError::Query("disk I/O error".into()))
    }
    async fn update_category(&self, id: Uuid, category: Category) -> Result<(), DatabaseError> {
        self.inner.update_category(id, category).await
    }
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        self.inner.get_message(id).await
    }
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, DatabaseError> {
        self.inner.list_messages(query).await
    }
    async fn stats(&self, subjects: &BTreeSet<String>) -> Result<MessageStats, DatabaseError> {
        self.inner.stats(subjects).await
    }
}

/// Store whose batch inserts wait until `barrier` releases them, so every
/// concurrent refresh finishes its lookups before any of them writes.
struct GatedStore {
    inner: LibSqlBackend,
    barrier: Barrier,
}

#[async_trait]
impl Database for GatedStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }
    async fn exists(&self, kind: SourceKind, source_id: &str) -> Result<bool, DatabaseError> {
        self.inner.exists(kind, source_id).await
    }
    async fn insert_batch(&self, messages: &[Message]) -> Result<BatchOutcome, DatabaseError> {
        self.barrier.wait().await;
        self.inner.insert_batch(messages).await
    }
    async fn update_category(&self, id: Uuid, category: Category) -> Result<(), DatabaseError> {
        self.inner.update_category(id, category).await
    }
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        self.inner.get_message(id).await
    }
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, DatabaseError> {
        self.inner.list_messages(query).await
    }
    async fn stats(&self, subjects: &BTreeSet<String>) -> Result<MessageStats, DatabaseError> {
        self.inner.stats(subjects).await
    }
}

/// Store whose batch inserts never complete.
struct StalledStore {
    inner: LibSqlBackend,
}

#[async_trait]
impl Database for StalledStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }
    async fn exists(&self, kind: SourceKind, source_id: &str) -> Result<bool, DatabaseError> {
        self.inner.exists(kind, source_id).await
    }
    async fn insert_batch(&self, _messages: &[Message]) -> Result<BatchOutcome, DatabaseError> {
        std::future::pending().await
    }
    async fn update_category(&self, id: Uuid, category: Category) -> Result<(), DatabaseError> {
        self.inner.update_category(id, category).await
    }
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        self.inner.get_message(id).await
    }
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, DatabaseError> {
        self.inner.list_messages(query).await
    }
    async fn stats(&self, subjects: &BTreeSet<String>) -> Result<MessageStats, DatabaseError> {
        self.inner.stats(subjects).await
    }
}

fn record(id: &str, sender: &str, content: &str) -> RawRecord {
    RawRecord::new(id, sender, content, Utc::now() - ChronoDuration::minutes(1))
}

fn ingestor() -> Ingestor {
    Ingestor::new(RulesHandle::new(RuleSet::defaults()), Duration::from_millis(300))
}

async fn store() -> LibSqlBackend {
    LibSqlBackend::new_memory().await.unwrap()
}

async fn stored(db: &dyn Database) -> usize {
    db.stats(&BTreeSet::new()).await.unwrap().total
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_twice_is_idempotent() {
    let db = store().await;
    let sources: Vec<Arc<dyn FeedSource>> = vec![
        Arc::new(MockFeed::new(SourceKind::Telegram)),
        Arc::new(MockFeed::new(SourceKind::Twitter)),
    ];
    let ingestor = ingestor();

    let first = ingestor.refresh(&sources, &db).await.unwrap();
    assert!(first.total_admitted() > 0);
    let stored_after_first = stored(&db).await;
    assert_eq!(stored_after_first, first.total_admitted());

    let second = ingestor.refresh(&sources, &db).await.unwrap();
    assert_eq!(second.total_admitted(), 0);
    assert!(!second.is_heartbeat());
    assert_eq!(second.total_duplicates(), first.total_admitted());
    assert_eq!(stored(&db).await, stored_after_first);
}

#[tokio::test]
async fn classifies_spec_examples_with_default_rules() {
    let db = store().await;
    let feed = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![
            record("1", "DeFi Founder", "Need urgent audit for my Uniswap fork!"),
            record("2", "someone", "Old project from 2023. Just checking in."),
            record("3", "someone", "How does Aave compare to Compound?"),
            record("4", "someone", "General blockchain question"),
        ],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let result = ingestor().refresh(&sources, &db).await.unwrap();

    let categories: Vec<Category> = result.messages.iter().map(|m| m.category).collect();
    assert_eq!(
        categories,
        vec![
            Category::Urgent,
            Category::Archive,
            Category::HighPriority,
            Category::Routine
        ]
    );
}

#[tokio::test]
async fn failing_source_does_not_block_others() {
    let db = store().await;
    let telegram = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![record("tg_1", "a", "gm"), record("tg_2", "b", "URGENT: site down")],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![telegram, Arc::new(DownFeed)];

    let result = ingestor().refresh(&sources, &db).await.unwrap();
    assert_eq!(result.total_admitted(), 2);
    assert!(matches!(
        result.outcome("twitter").unwrap().status,
        SourceStatus::Failed { .. }
    ));
    assert_eq!(stored(&db).await, 2);
}

#[tokio::test]
async fn hanging_source_times_out() {
    let db = store().await;
    let telegram = ScriptedFeed::new("telegram", SourceKind::Telegram, vec![record("tg_1", "a", "gm")]);
    let sources: Vec<Arc<dyn FeedSource>> = vec![Arc::new(HangingFeed), telegram];

    let result = tokio::time::timeout(Duration::from_secs(5), ingestor().refresh(&sources, &db))
        .await
        .expect("refresh must not wait on a hung feed")
        .unwrap();
    assert_eq!(result.total_admitted(), 1);
    let hung = result.outcome("twitter_feed").unwrap();
    assert_eq!(hung.fetched, 0);
    assert!(!hung.is_ok());
}

#[tokio::test]
async fn heartbeat_only_when_upstream_is_empty() {
    let db = store().await;
    let feed = ScriptedFeed::new("telegram", SourceKind::Telegram, vec![]);
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed.clone()];
    let ingestor = ingestor();

    let empty = ingestor.refresh(&sources, &db).await.unwrap();
    assert!(empty.is_heartbeat());
    let system_msgs = db
        .list_messages(&MessageQuery::default().source(SourceKind::System))
        .await
        .unwrap();
    assert_eq!(system_msgs.len(), 1);
    assert_eq!(system_msgs[0].category, Category::Routine);

    feed.set(vec![record("tg_1", "a", "gm")]).await;
    let fresh = ingestor.refresh(&sources, &db).await.unwrap();
    assert_eq!(fresh.total_admitted(), 1);

    // Everything fetched is already known: no new messages, no heartbeat.
    let dup_only = ingestor.refresh(&sources, &db).await.unwrap();
    assert!(dup_only.messages.is_empty());
    assert_eq!(stored(&db).await, 2);
}

#[tokio::test]
async fn duplicate_within_one_refresh_is_stored_once() {
    let db = store().await;
    let feed = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![record("tg_1", "a", "first"), record("tg_1", "a", "replayed")],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let result = ingestor().refresh(&sources, &db).await.unwrap();

    let outcome = result.outcome("telegram").unwrap();
    assert_eq!((outcome.admitted, outcome.duplicates), (1, 1));
    let stored = db.list_messages(&MessageQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "first");
}

#[tokio::test]
async fn malformed_records_are_skipped_and_counted() {
    let db = store().await;
    let mut no_content = record("tg_2", "a", "");
    no_content.content = None;
    let feed = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![record("tg_1", "a", "gm"), no_content, record(" ", "a", "blank id")],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let result = ingestor().refresh(&sources, &db).await.unwrap();

    let outcome = result.outcome("telegram").unwrap();
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.admitted, 1);
    assert_eq!(outcome.malformed, 2);
    assert!(!result.is_heartbeat());
}

#[tokio::test]
async fn write_failure_rolls_back_and_keeps_report() {
    let db = ReadOnlyStore {
        inner: store().await,
        fail_lookups: AtomicBool::new(false),
    };
    let feed = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![record("tg_1", "a", "gm"), record("tg_2", "b", "hi")],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed, Arc::new(DownFeed)];

    let err = ingestor().refresh(&sources, &db).await.unwrap_err();
    let IngestError::Persistence { source, report } = err;
    assert!(matches!(source, DatabaseError::Query(_)));
    assert!(report.messages.is_empty());
    let telegram = report.outcome("telegram").unwrap();
    assert_eq!(telegram.fetched, 2);
    assert_eq!(telegram.admitted, 0);
    assert!(!report.outcome("twitter").unwrap().is_ok());
    assert_eq!(stored(&db).await, 0);
}

#[tokio::test]
async fn lookup_failure_aborts_before_admission() {
    let db = ReadOnlyStore {
        inner: store().await,
        fail_lookups: AtomicBool::new(true),
    };
    let feed = ScriptedFeed::new("telegram", SourceKind::Telegram, vec![record("tg_1", "a", "gm")]);
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];

    let err = ingestor().refresh(&sources, &db).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Persistence {
            source: DatabaseError::Pool(_),
            ..
        }
    ));
    assert_eq!(err.report().outcome("telegram").unwrap().fetched, 1);
}

#[tokio::test]
async fn manual_override_survives_later_refresh() {
    let db = store().await;
    let feed = ScriptedFeed::new("telegram", SourceKind::Telegram, vec![record("tg_1", "a", "gm")]);
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let ingestor = ingestor();

    let first = ingestor.refresh(&sources, &db).await.unwrap();
    let id = first.messages[0].id;
    db.update_category(id, Category::Urgent).await.unwrap();

    ingestor.refresh(&sources, &db).await.unwrap();
    let stored = db.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.category, Category::Urgent);
}

#[tokio::test]
async fn concurrent_refreshes_store_each_record_once() {
    let db = GatedStore {
        inner: store().await,
        barrier: Barrier::new(2),
    };
    let records: Vec<RawRecord> = (0..20)
        .map(|i| record(&format!("tg_{i}"), "a", "gm"))
        .collect();
    let feed = ScriptedFeed::new("telegram", SourceKind::Telegram, records);
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let ingestor = ingestor();

    let (a, b) = tokio::join!(
        ingestor.refresh(&sources, &db),
        ingestor.refresh(&sources, &db)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Both runs saw an empty store; the loser's rows conflict at commit.
    assert_eq!(a.total_admitted() + b.total_admitted(), 20);
    assert_eq!(a.total_duplicates() + b.total_duplicates(), 20);
    assert!(a.total_admitted() == 0 || b.total_admitted() == 0);
    assert_eq!(stored(&db).await, 20);
}

#[tokio::test]
async fn cancelled_refresh_commits_nothing() {
    let feed = ScriptedFeed::new(
        "telegram",
        SourceKind::Telegram,
        vec![record("tg_1", "a", "gm"), record("tg_2", "b", "hi")],
    );
    let sources: Vec<Arc<dyn FeedSource>> = vec![feed];
    let ingestor = ingestor();

    let stalled = StalledStore {
        inner: store().await,
    };
    let cancelled =
        tokio::time::timeout(Duration::from_millis(200), ingestor.refresh(&sources, &stalled)).await;
    assert!(cancelled.is_err());
    assert_eq!(stored(&stalled).await, 0);

    let db = stalled.inner;
    let result = ingestor.refresh(&sources, &db).await.unwrap();
    assert_eq!(result.total_admitted(), 2);
    assert_eq!(stored(&db).await, 2);
}
