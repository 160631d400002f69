//! Keyword classification of incoming questions.
//!
//! Priority and tags are derived from ordered rule tables of
//! `(signal words, outcome)` pairs. Matching is case-insensitive substring
//! search. Both functions are total: every input classifies to something.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::request::Priority;

/// A keyword rule: fires if any of `keywords` occurs in the lowercased text.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule<T: 'static> {
    pub keywords: &'static [&'static str],
    pub outcome: T,
}

impl<T> KeywordRule<T> {
    pub fn matches(&self, lowered: &str) -> bool {
        contains_any(lowered, self.keywords)
    }
}

/// Priority tiers, evaluated first-match-wins.
///
/// Urgent signals outrank problem reports, which outrank booking questions.
/// Keyword classification tops out at `High`; `Urgent` is only ever set by an
/// explicit caller override.
pub const PRIORITY_RULES: &[KeywordRule<Priority>] = &[
    KeywordRule {
        keywords: &["urgent", "emergency"],
        outcome: Priority::High,
    },
    KeywordRule {
        keywords: &["broken", "problem", "issue", "complaint"],
        outcome: Priority::High,
    },
    KeywordRule {
        keywords: &["appointment", "booking", "book ", "reservation", "schedule"],
        outcome: Priority::Medium,
    },
];

/// Tag rules. Every matching rule contributes its tag.
pub const TAG_RULES: &[KeywordRule<&str>] = &[
    // Services
    KeywordRule {
        keywords: &["hair", "cut", "style"],
        outcome: "hair",
    },
    KeywordRule {
        keywords: &["color", "colour", "dye", "highlight"],
        outcome: "color",
    },
    KeywordRule {
        keywords: &["nail", "manicure", "pedicure"],
        outcome: "nails",
    },
    KeywordRule {
        keywords: &["facial", "massage", "spa"],
        outcome: "spa",
    },
    KeywordRule {
        keywords: &["bridal", "wedding"],
        outcome: "bridal",
    },
    // General
    KeywordRule {
        keywords: &["price", "cost", "how much"],
        outcome: "pricing",
    },
    KeywordRule {
        keywords: &["hours", "open", "close"],
        outcome: "hours",
    },
    KeywordRule {
        keywords: &["location", "address", "directions"],
        outcome: "location",
    },
];

const URGENT_SIGNALS: &[&str] = &["urgent", "emergency", "problem"];

/// Result of classifying a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub priority: Priority,
    pub tags: BTreeSet<String>,
}

/// Classify a question into a priority and a tag set.
pub fn classify(question: &str) -> Classification {
    let lowered = question.to_lowercase();
    Classification {
        priority: priority_of(&lowered),
        tags: tags_of(&lowered),
    }
}

/// Determine the priority of a question. Defaults to `Low`.
pub fn determine_priority(question: &str) -> Priority {
    priority_of(&question.to_lowercase())
}

/// Extract the category tags of a question.
pub fn extract_tags(question: &str) -> BTreeSet<String> {
    tags_of(&question.to_lowercase())
}

/// Whether the question carries words suggesting the customer is upset or
/// blocked. Recorded in request metadata, not used for routing.
pub fn has_urgent_signal(question: &str) -> bool {
    contains_any(&question.to_lowercase(), URGENT_SIGNALS)
}

fn priority_of(lowered: &str) -> Priority {
    PRIORITY_RULES
        .iter()
        .find(|rule| rule.matches(lowered))
        .map(|rule| rule.outcome)
        .unwrap_or_default()
}

fn tags_of(lowered: &str) -> BTreeSet<String> {
    TAG_RULES
        .iter()
        .filter(|rule| rule.matches(lowered))
        .map(|rule| rule.outcome.to_string())
        .collect()
}

fn contains_any(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lowered.contains(keyword))
}
