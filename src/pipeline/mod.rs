//! Message triage pipeline.
//!
//! Every inbound record from any feed flows through:
//! 1. `FeedSource::fetch()`: feed-specific I/O
//! 2. `Ingestor`: per-source isolation, validation, dedup
//! 3. `Classifier::classify()`: rule-precedence categorization against a
//!    `RuleSet` snapshot
//! 4. `Database::insert_batch()`: one atomic commit per run

pub mod classifier;
pub mod ingestor;
pub mod poller;
pub mod rules;
pub mod types;

pub use classifier::{Classification, Classifier, RuleTrace};
pub use ingestor::{IngestResult, Ingestor, SourceOutcome, SourceStatus};
pub use poller::spawn_refresh_poller;
pub use rules::{KeywordAction, RuleSet, RulesHandle};
pub use types::{Category, DedupKey, FeedSource, Message, RawRecord, SourceKind};
