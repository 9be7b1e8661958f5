//! Multi-source ingestion: concurrent fetch, dedup, classify, admit.
//!
//! Flow for one run:
//! 1. Every source is fetched concurrently, each under its own timeout
//! 2. Failed or timed-out sources contribute nothing and are reported
//! 3. Records are validated, checked against the known keys, classified
//! 4. A run where every source succeeded with zero records yields one
//!    heartbeat placeholder
//!
//! `refresh()` adds the store round-trip: dedup lookup before admission and
//! one atomic batch insert after it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, IngestError};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::rules::RulesHandle;
use crate::pipeline::types::{DedupKey, FeedSource, Message, RawRecord, SourceKind};
use crate::store::{Database, known_keys};

// ── Result types ────────────────────────────────────────────────────

/// Whether a source's fetch succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Failed { reason: String },
}

/// Per-source counts for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub kind: SourceKind,
    pub fetched: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    #[serde(flatten)]
    pub status: SourceStatus,
}

impl SourceOutcome {
    fn new(source: &str, kind: SourceKind) -> Self {
        Self {
            source: source.to_string(),
            kind,
            fetched: 0,
            admitted: 0,
            duplicates: 0,
            malformed: 0,
            status: SourceStatus::Ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SourceStatus::Ok
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestResult {
    /// One entry per configured source, in configuration order.
    pub sources: Vec<SourceOutcome>,
    /// Newly admitted, classified messages. Within a source they keep the
    /// source's native order.
    pub messages: Vec<Message>,
    /// Index into `sources` for each entry of `messages` (`None` for the
    /// heartbeat).
    #[serde(skip)]
    origins: Vec<Option<usize>>,
}

impl IngestResult {
    pub fn total_admitted(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_heartbeat()).count()
    }

    pub fn total_fetched(&self) -> usize {
        self.sources.iter().map(|s| s.fetched).sum()
    }

    pub fn total_duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.duplicates).sum()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| !s.is_ok())
    }

    /// True when the batch is exactly the empty-upstream placeholder.
    pub fn is_heartbeat(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].is_heartbeat()
    }

    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.source == source)
    }

    /// Move messages the store reported as already present from the
    /// admitted bucket into their source's duplicate count.
    fn reclassify_as_duplicates(&mut self, duplicates: &HashSet<DedupKey>) {
        if duplicates.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut self.messages);
        let origins = std::mem::take(&mut self.origins);
        for (message, origin) in messages.into_iter().zip(origins) {
            let is_dup = message
                .dedup_key()
                .is_some_and(|key| duplicates.contains(&key));
            if is_dup {
                if let Some(outcome) = origin.and_then(|i| self.sources.get_mut(i)) {
                    outcome.admitted -= 1;
                    outcome.duplicates += 1;
                }
                debug!(
                    source_kind = %message.source_kind,
                    source_id = ?message.source_id,
                    "Store already holds record, counted as duplicate"
                );
                continue;
            }
            self.messages.push(message);
            self.origins.push(origin);
        }
    }
}

/// Raw fetch result for one source, before admission.
struct SourceFetch {
    name: String,
    kind: SourceKind,
    result: Result<Vec<RawRecord>, FetchError>,
}

// ── Ingestor ────────────────────────────────────────────────────────

/// Orchestrates fetch, dedup and classification across feed sources.
///
/// Holds no per-run state: the known-key set and the output batch belong to
/// a single `ingest`/`refresh` call.
#[derive(Debug, Clone)]
pub struct Ingestor {
    rules: RulesHandle,
    fetch_timeout: Duration,
}

impl Ingestor {
    pub fn new(rules: RulesHandle, fetch_timeout: Duration) -> Self {
        Self {
            rules,
            fetch_timeout,
        }
    }

    pub fn rules(&self) -> &RulesHandle {
        &self.rules
    }

    /// Fetch, dedup against `already_known`, classify, and return the batch.
    ///
    /// Nothing is persisted. Duplicates inside the same run are caught
    /// because every admitted key joins the known set.
    pub async fn ingest(
        &self,
        sources: &[Arc<dyn FeedSource>],
        already_known: HashSet<DedupKey>,
    ) -> IngestResult {
        let fetches = self.fetch_all(sources).await;
        self.admit(fetches, already_known).await
    }

    /// Full cycle against a store: fetch, look up known keys, admit, commit.
    ///
    /// The batch is written atomically. Records the store reports as
    /// already present are counted as duplicates. Any other store failure
    /// discards the whole batch and returns the per-source report inside
    /// the error.
    pub async fn refresh(
        &self,
        sources: &[Arc<dyn FeedSource>],
        store: &dyn Database,
    ) -> Result<IngestResult, IngestError> {
        let fetches = self.fetch_all(sources).await;

        let known: HashSet<DedupKey> = match known_keys(store, fetched_keys(&fetches)).await {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                error!(error = %e, "Dedup lookup failed, aborting refresh");
                return Err(IngestError::Persistence {
                    source: e,
                    report: Box::new(fetch_report(&fetches)),
                });
            }
        };

        let mut result = self.admit(fetches, known).await;
        if result.messages.is_empty() {
            return Ok(result);
        }

        match store.insert_batch(&result.messages).await {
            Ok(outcome) => {
                let duplicates: HashSet<DedupKey> = outcome.duplicates.into_iter().collect();
                result.reclassify_as_duplicates(&duplicates);
                info!(
                    inserted = outcome.inserted,
                    duplicates = duplicates.len(),
                    "Ingest batch committed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    error = %e,
                    batch = result.messages.len(),
                    "Ingest batch rolled back"
                );
                result.messages.clear();
                result.origins.clear();
                for outcome in &mut result.sources {
                    outcome.admitted = 0;
                }
                Err(IngestError::Persistence {
                    source: e,
                    report: Box::new(result),
                })
            }
        }
    }

    /// Fetch every source concurrently, each under the configured timeout.
    async fn fetch_all(&self, sources: &[Arc<dyn FeedSource>]) -> Vec<SourceFetch> {
        let timeout = self.fetch_timeout;
        let futures = sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let name = source.name().to_string();
                let kind = source.kind();
                let result = match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        source_name: name.clone(),
                        after: timeout,
                    }),
                };
                SourceFetch { name, kind, result }
            }
        });
        join_all(futures).await
    }

    /// Validate, dedup and classify fetched records against one rule snapshot.
    async fn admit(
        &self,
        fetches: Vec<SourceFetch>,
        mut known: HashSet<DedupKey>,
    ) -> IngestResult {
        let classifier = Classifier::new(self.rules.snapshot().await);
        let admitted_at = Utc::now();
        let mut result = IngestResult::default();

        for (index, fetch) in fetches.into_iter().enumerate() {
            let mut outcome = SourceOutcome::new(&fetch.name, fetch.kind);

            let records = match fetch.result {
                Ok(records) => records,
                Err(e) => {
                    warn!(source = %fetch.name, error = %e, "Feed fetch failed");
                    outcome.status = SourceStatus::Failed {
                        reason: e.to_string(),
                    };
                    result.sources.push(outcome);
                    continue;
                }
            };

            outcome.fetched = records.len();
            for raw in records {
                let record = match raw.validate() {
                    Ok(record) => record,
                    Err(e) => {
                        debug!(source = %fetch.name, error = %e, "Skipping malformed record");
                        outcome.malformed += 1;
                        continue;
                    }
                };

                let key = DedupKey::new(fetch.kind, record.source_id.clone());
                if !known.insert(key) {
                    debug!(
                        source = %fetch.name,
                        source_id = %record.source_id,
                        "Skipping known record"
                    );
                    outcome.duplicates += 1;
                    continue;
                }

                let category = classifier.classify(&record.content, &record.sender);
                result
                    .messages
                    .push(Message::admit(fetch.kind, record, category, admitted_at));
                result.origins.push(Some(index));
                outcome.admitted += 1;
            }

            debug!(
                source = %outcome.source,
                fetched = outcome.fetched,
                admitted = outcome.admitted,
                duplicates = outcome.duplicates,
                malformed = outcome.malformed,
                "Feed processed"
            );
            result.sources.push(outcome);
        }

        let upstream_empty = !result.sources.is_empty()
            && result.sources.iter().all(|s| s.is_ok() && s.fetched == 0);
        if upstream_empty {
            info!(sources = result.sources.len(), "All feeds empty, recording heartbeat");
            result.messages.push(Message::heartbeat(admitted_at));
            result.origins.push(None);
        }

        result
    }
}

/// Dedup keys of every well-formed record in a successful fetch.
fn fetched_keys(fetches: &[SourceFetch]) -> HashSet<DedupKey> {
    fetches
        .iter()
        .filter_map(|f| f.result.as_ref().ok().map(|records| (f.kind, records)))
        .flat_map(|(kind, records)| {
            records.iter().filter_map(move |r| {
                r.source_id
                    .as_deref()
                    .filter(|id| !id.trim().is_empty())
                    .map(|id| DedupKey::new(kind, id))
            })
        })
        .collect()
}

/// Per-source report for a run that never reached admission.
fn fetch_report(fetches: &[SourceFetch]) -> IngestResult {
    let sources = fetches
        .iter()
        .map(|f| {
            let mut outcome = SourceOutcome::new(&f.name, f.kind);
            match &f.result {
                Ok(records) => outcome.fetched = records.len(),
                Err(e) => {
                    outcome.status = SourceStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            }
            outcome
        })
        .collect();
    IngestResult {
        sources,
        ..Default::default()
    }
}
