//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared; writes are serialized through `write_lock` so one batch
//! transaction never interleaves with another statement's writes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Category, Message, SourceKind};
use crate::store::migrations;
use crate::store::traits::{BatchOutcome, Database, MessageQuery, MessageStats};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-value `COUNT(*)` query.
    async fn count(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(query_err("stats"))?;
        match rows.next().await.map_err(query_err("stats"))? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err("stats"))? as usize),
            None => Ok(0),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to a Message.
///
/// Column order matches MESSAGE_COLUMNS:
/// 0:id, 1:source_kind, 2:source_id, 3:sender, 4:content, 5:category,
/// 6:received_at, 7:admitted_at
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
    let id_str: String = row.get(0).map_err(parse)?;
    let kind_str: String = row.get(1).map_err(parse)?;
    let category_str: String = row.get(5).map_err(parse)?;
    let received_str: String = row.get(6).map_err(parse)?;
    let admitted_str: String = row.get(7).map_err(parse)?;

    Ok(Message {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Query(format!("row parse: bad id {id_str}: {e}")))?,
        source_kind: kind_str
            .parse()
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
        source_id: row.get::<String>(2).ok(),
        sender: row.get(3).map_err(parse)?,
        content: row.get(4).map_err(parse)?,
        category: category_str
            .parse()
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
        received_at: parse_datetime(&received_str),
        admitted_at: parse_datetime(&admitted_str),
    })
}

async fn collect_messages(mut rows: libsql::Rows) -> Result<Vec<Message>, DatabaseError> {
    let mut messages = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("read rows"))? {
        match row_to_message(&row) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!("Skipping message row: {e}"),
        }
    }
    Ok(messages)
}

async fn insert_rows(conn: &Connection, messages: &[Message]) -> Result<BatchOutcome, DatabaseError> {
    let mut outcome = BatchOutcome::default();
    for msg in messages {
        let changed = conn
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (source_kind, source_id) DO NOTHING"
                ),
                params![
                    msg.id.to_string(),
                    msg.source_kind.as_str(),
                    opt_text(msg.source_id.as_deref()),
                    msg.sender.as_str(),
                    msg.content.as_str(),
                    msg.category.as_str(),
                    fmt_datetime(&msg.received_at),
                    fmt_datetime(&msg.admitted_at),
                ],
            )
            .await
            .map_err(|e| match e {
                libsql::Error::SqliteFailure(_, ref m) if m.contains("constraint") => {
                    DatabaseError::Constraint(format!("insert_batch: {e}"))
                }
                other => DatabaseError::Query(format!("insert_batch: {other}")),
            })?;

        if changed == 0 {
            if let Some(key) = msg.dedup_key() {
                outcome.duplicates.push(key);
            }
        } else {
            outcome.inserted += 1;
        }
    }
    Ok(outcome)
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str =
    "id, source_kind, source_id, sender, content, category, received_at, admitted_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn exists(&self, kind: SourceKind, source_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM messages WHERE source_kind = ?1 AND source_id = ?2 LIMIT 1",
                params![kind.as_str(), source_id],
            )
            .await
            .map_err(query_err("exists"))?;
        Ok(rows.next().await.map_err(query_err("exists"))?.is_some())
    }

    async fn insert_batch(&self, messages: &[Message]) -> Result<BatchOutcome, DatabaseError> {
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("insert_batch: begin"))?;

        match insert_rows(&tx, messages).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(query_err("insert_batch: commit"))?;
                debug!(
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates.len(),
                    "Message batch inserted into DB"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback after failed batch insert also failed");
                }
                Err(e)
            }
        }
    }

    async fn update_category(&self, id: Uuid, category: Category) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE messages SET category = ?1, category_updated_at = ?2 WHERE id = ?3",
                params![category.as_str(), fmt_datetime(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(query_err("update_category"))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".to_string(),
                id: id.to_string(),
            });
        }
        debug!(id = %id, category = %category, "Message category updated in DB");
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_message"))?;

        match rows.next().await.map_err(query_err("get_message"))? {
            Some(row) => Ok(Some(row_to_message(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, DatabaseError> {
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE (?1 IS NULL OR category = ?1)
                       AND (?2 IS NULL OR source_kind = ?2)
                       AND (?3 IS NULL OR content LIKE '%' || ?3 || '%')
                     ORDER BY received_at DESC, admitted_at DESC
                     LIMIT ?4"
                ),
                params![
                    opt_text(query.category.map(|c| c.as_str())),
                    opt_text(query.source.map(|s| s.as_str())),
                    opt_text(query.subject.as_deref()),
                    limit,
                ],
            )
            .await
            .map_err(query_err("list_messages"))?;
        collect_messages(rows).await
    }

    async fn stats(&self, subjects: &BTreeSet<String>) -> Result<MessageStats, DatabaseError> {
        let mut stats = MessageStats::default();

        let mut rows = self
            .conn()
            .query(
                "SELECT category, COUNT(*) FROM messages GROUP BY category",
                (),
            )
            .await
            .map_err(query_err("stats"))?;
        while let Some(row) = rows.next().await.map_err(query_err("stats"))? {
            let name: String = row.get(0).map_err(query_err("stats"))?;
            let count: i64 = row.get(1).map_err(query_err("stats"))?;
            match name.parse::<Category>() {
                Ok(category) => {
                    stats.by_category.insert(category, count as usize);
                }
                Err(e) => warn!("Skipping stats row: {e}"),
            }
            stats.total += count as usize;
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT source_kind, COUNT(*) FROM messages GROUP BY source_kind",
                (),
            )
            .await
            .map_err(query_err("stats"))?;
        let mut by_source = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(query_err("stats"))? {
            let name: String = row.get(0).map_err(query_err("stats"))?;
            let count: i64 = row.get(1).map_err(query_err("stats"))?;
            match name.parse::<SourceKind>() {
                Ok(kind) => {
                    by_source.insert(kind, count as usize);
                }
                Err(e) => warn!("Skipping stats row: {e}"),
            }
        }
        stats.by_source = by_source;

        let cutoff = fmt_datetime(&(Utc::now() - chrono::Duration::hours(24)));
        stats.recent_24h = self
            .count(
                "SELECT COUNT(*) FROM messages WHERE received_at >= ?1",
                params![cutoff],
            )
            .await?;

        for subject in subjects {
            let mentions = self
                .count(
                    "SELECT COUNT(*) FROM messages WHERE content LIKE '%' || ?1 || '%'",
                    params![subject.as_str()],
                )
                .await?;
            if mentions > 0 {
                stats.subject_mentions.insert(subject.clone(), mentions);
            }
        }

        Ok(stats)
    }
}
