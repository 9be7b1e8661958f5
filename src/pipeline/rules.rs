//! Rule tables consumed by the classifier.
//!
//! A `RuleSet` is an immutable value. Live keyword updates produce a new
//! `RuleSet` and swap it into a `RulesHandle`; a batch that already took a
//! snapshot keeps classifying against the old tables.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::RulesError;
use crate::pipeline::types::Category;

const URGENT_TERMS: &[&str] = &[
    "urgent", "emergency", "critical", "broken", "down", "error", "bug", "hack", "security",
    "vulnerability", "exploit", "attack", "help", "asap", "immediate", "stop", "fix", "issue",
    "problem", "fail", "crash", "disaster", "panic", "audit",
];

const HIGH_PRIORITY_TERMS: &[&str] = &[
    "important", "priority", "key", "major", "significant", "partnership", "deal", "investment",
    "funding", "launch", "release", "deadline", "meeting", "call", "discussion", "proposal",
    "opportunity", "collaboration", "business", "defi", "nft", "smart contract", "protocol",
    "token", "crypto", "web3", "dao", "governance",
];

const ARCHIVE_TERMS: &[&str] = &[
    "old", "previous", "past", "history", "archive", "done", "completed", "finished", "closed",
    "resolved", "solved", "thank", "thanks", "appreciate", "gratitude", "old news",
];

const IMPORTANT_SENDER_TERMS: &[&str] = &[
    "investor", "partner", "ceo", "founder", "executive", "board", "advisor", "mentor", "key",
    "vip", "dev", "developer", "auditor", "security", "defi", "nft",
];

const NOTABLE_SUBJECTS: &[&str] = &[
    // dex
    "Uniswap", "Sushi", "PancakeSwap", "dYdX",
    // lending
    "Aave", "Compound", "MakerDAO",
    // stablecoins
    "USDC", "USDT", "DAI", "FRAX",
    // infrastructure
    "LayerZero", "Polygon", "Arbitrum", "Optimism",
    // nft
    "Sofamon", "Bored Ape", "CryptoPunks",
    // defi
    "Ethena", "Karak", "Curve", "Balancer",
    // others
    "Chainlink", "The Graph", "Filecoin",
];

/// Whether a keyword update adds or removes terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordAction {
    Add,
    Remove,
}

/// Keyword and subject tables for the four rule tiers.
///
/// Keyword and sender terms are stored lowercase. Subjects keep their
/// display casing and are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub urgent_terms: BTreeSet<String>,
    pub high_priority_terms: BTreeSet<String>,
    pub archive_terms: BTreeSet<String>,
    pub important_sender_terms: BTreeSet<String>,
    pub notable_subjects: BTreeSet<String>,
}

/// On-disk shape of a rule file. Missing lists are empty.
#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    urgent_terms: Vec<String>,
    #[serde(default)]
    high_priority_terms: Vec<String>,
    #[serde(default)]
    archive_terms: Vec<String>,
    #[serde(default)]
    important_sender_terms: Vec<String>,
    #[serde(default)]
    notable_subjects: Vec<String>,
}

impl RuleSet {
    /// Build a rule set, normalizing every table.
    pub fn new<S: AsRef<str>>(
        urgent: &[S],
        high_priority: &[S],
        archive: &[S],
        important_senders: &[S],
        notable_subjects: &[S],
    ) -> Self {
        Self {
            urgent_terms: normalize_terms(urgent),
            high_priority_terms: normalize_terms(high_priority),
            archive_terms: normalize_terms(archive),
            important_sender_terms: normalize_terms(important_senders),
            notable_subjects: normalize_subjects(notable_subjects),
        }
    }

    /// Built-in tables for the audit-firm inbox.
    pub fn defaults() -> Self {
        Self::new(
            URGENT_TERMS,
            HIGH_PRIORITY_TERMS,
            ARCHIVE_TERMS,
            IMPORTANT_SENDER_TERMS,
            NOTABLE_SUBJECTS,
        )
    }

    /// Parse a JSON rule file body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let file: RuleFile = serde_json::from_str(body)?;
        Ok(Self::new(
            file.urgent_terms.as_slice(),
            file.high_priority_terms.as_slice(),
            file.archive_terms.as_slice(),
            file.important_sender_terms.as_slice(),
            file.notable_subjects.as_slice(),
        ))
    }

    /// Load a JSON rule file from disk.
    pub fn from_file(path: &Path) -> Result<Self, RulesError> {
        let body = std::fs::read_to_string(path).map_err(|e| RulesError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&body).map_err(|e| RulesError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Return a copy with `terms` added to or removed from the table for
    /// `category`. `Routine` is the default tier and has no table.
    pub fn update_keywords<S: AsRef<str>>(
        &self,
        category: Category,
        terms: &[S],
        action: KeywordAction,
    ) -> Result<Self, RulesError> {
        let mut next = self.clone();
        let table = match category {
            Category::Urgent => &mut next.urgent_terms,
            Category::HighPriority => &mut next.high_priority_terms,
            Category::Archive => &mut next.archive_terms,
            Category::Routine => return Err(RulesError::NoTermsForCategory(category)),
        };
        let terms = normalize_terms(terms);
        match action {
            KeywordAction::Add => table.extend(terms),
            KeywordAction::Remove => table.retain(|t| !terms.contains(t)),
        }
        Ok(next)
    }
}

fn normalize_terms<S: AsRef<str>>(terms: &[S]) -> BTreeSet<String> {
    terms
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize_subjects<S: AsRef<str>>(subjects: &[S]) -> BTreeSet<String> {
    subjects
        .iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Shared handle ───────────────────────────────────────────────────

/// Shared, swappable reference to the active rule set.
///
/// Readers take an `Arc<RuleSet>` snapshot per batch. Updates build a new
/// set and replace the pointer under the write lock.
#[derive(Debug, Clone)]
pub struct RulesHandle {
    inner: Arc<RwLock<Arc<RuleSet>>>,
}

impl RulesHandle {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(rules))),
        }
    }

    /// Immutable view of the current tables.
    pub async fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Apply a keyword update and publish the resulting rule set.
    pub async fn update_keywords<S: AsRef<str>>(
        &self,
        category: Category,
        terms: &[S],
        action: KeywordAction,
    ) -> Result<Arc<RuleSet>, RulesError> {
        let mut guard = self.inner.write().await;
        let next = Arc::new(guard.update_keywords(category, terms, action)?);
        *guard = Arc::clone(&next);
        info!(
            category = %category,
            action = ?action,
            count = terms.len(),
            "Rule set keywords updated"
        );
        Ok(next)
    }
}
