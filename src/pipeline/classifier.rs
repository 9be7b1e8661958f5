//! Rule-precedence classifier.
//!
//! Tiers are evaluated in a fixed order and the first tier that matches
//! wins: URGENT, then ARCHIVE, then HIGH PRIORITY, then ROUTINE. There is
//! no scoring. Matching is plain substring search on lowercased text, so
//! a term also matches inside longer words.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::Category;

/// Everything that matched in the winning tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleTrace {
    /// Content keywords of the winning tier.
    pub terms: Vec<String>,
    /// Important-sender terms found in the sender (HIGH PRIORITY only).
    pub sender_terms: Vec<String>,
    /// Notable subjects mentioned in the content (HIGH PRIORITY only).
    pub subjects: Vec<String>,
}

impl RuleTrace {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.sender_terms.is_empty() && self.subjects.is_empty()
    }
}

/// A category plus the rule matches that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: Category,
    pub trace: RuleTrace,
}

/// Stateless classifier over an immutable rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<RuleSet>,
}

impl Classifier {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Category for `content` from `sender`. An empty sender never
    /// satisfies the sender signal.
    pub fn classify(&self, content: &str, sender: &str) -> Category {
        let content = content.to_lowercase();
        let sender = sender.to_lowercase();
        let rules = &*self.rules;

        if contains_any(&content, &rules.urgent_terms) {
            return Category::Urgent;
        }
        if contains_any(&content, &rules.archive_terms) {
            return Category::Archive;
        }
        if contains_any(&content, &rules.high_priority_terms)
            || (!sender.is_empty() && contains_any(&sender, &rules.important_sender_terms))
            || rules
                .notable_subjects
                .iter()
                .any(|s| content.contains(&s.to_lowercase()))
        {
            return Category::HighPriority;
        }
        Category::Routine
    }

    /// Category plus every match in the winning tier.
    pub fn classify_traced(&self, content: &str, sender: &str) -> Classification {
        let content_lower = content.to_lowercase();
        let sender_lower = sender.to_lowercase();
        let rules = &*self.rules;

        let urgent = matching_terms(&content_lower, &rules.urgent_terms);
        if !urgent.is_empty() {
            return Classification {
                category: Category::Urgent,
                trace: RuleTrace {
                    terms: urgent,
                    ..Default::default()
                },
            };
        }

        let archive = matching_terms(&content_lower, &rules.archive_terms);
        if !archive.is_empty() {
            return Classification {
                category: Category::Archive,
                trace: RuleTrace {
                    terms: archive,
                    ..Default::default()
                },
            };
        }

        let trace = RuleTrace {
            terms: matching_terms(&content_lower, &rules.high_priority_terms),
            sender_terms: if sender_lower.is_empty() {
                Vec::new()
            } else {
                matching_terms(&sender_lower, &rules.important_sender_terms)
            },
            subjects: self.subjects_in(&content_lower).into_iter().collect(),
        };
        let category = if trace.is_empty() {
            Category::Routine
        } else {
            Category::HighPriority
        };
        Classification { category, trace }
    }

    /// Human-readable justification listing every match in the winning tier.
    pub fn explain(&self, content: &str, sender: &str) -> String {
        let Classification { category, trace } = self.classify_traced(content, sender);
        match category {
            Category::Urgent | Category::Archive => format!(
                "Marked as {} due to keywords: {}",
                category.label(),
                trace.terms.join(", ")
            ),
            Category::HighPriority => {
                let mut reasons = Vec::new();
                if !trace.subjects.is_empty() {
                    reasons.push(format!("notable subjects: {}", trace.subjects.join(", ")));
                }
                if !trace.terms.is_empty() {
                    reasons.push(format!("keywords: {}", trace.terms.join(", ")));
                }
                if !trace.sender_terms.is_empty() {
                    reasons.push(format!("important sender: {sender}"));
                }
                format!("Marked as {} due to {}", category.label(), reasons.join("; "))
            }
            Category::Routine => {
                "Marked as ROUTINE - no specific keywords or sender indicators found".to_string()
            }
        }
    }

    /// Every notable subject mentioned in `content`, in display casing.
    pub fn matching_subjects(&self, content: &str) -> BTreeSet<String> {
        self.subjects_in(&content.to_lowercase())
    }

    fn subjects_in(&self, content_lower: &str) -> BTreeSet<String> {
        self.rules
            .notable_subjects
            .iter()
            .filter(|s| content_lower.contains(&s.to_lowercase()))
            .cloned()
            .collect()
    }
}

fn contains_any(text: &str, terms: &BTreeSet<String>) -> bool {
    terms.iter().any(|t| text.contains(t.as_str()))
}

fn matching_terms(text: &str, terms: &BTreeSet<String>) -> Vec<String> {
    terms
        .iter()
        .filter(|t| text.contains(t.as_str()))
        .cloned()
        .collect()
}
