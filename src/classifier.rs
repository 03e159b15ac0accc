//! Intent Classifier
//!
//! Classifies an infrastructure question into one coarse intent:
//! - Cost: spend, budgets, savings, idle capacity
//! - Performance: utilization, latency, sizing
//! - Security: alerts, exposure, compliance
//! - General: anything else (a broad overview)
//!
//! Categories are checked in that order; the first one with a keyword hit wins.
//! Matching is per word: a keyword ending in `*` is a stem matching any word
//! it starts, any other keyword matches the word itself or its plural.

use crate::models::{Intent, Priority};

/// Static keyword lists, zero allocation
const COST_KEYWORDS: &[&str] = &[
    // Spend
    "cost*", "spend*", "spent", "bill", "billing", "billed", "budget*", "expensive",
    "price*", "pricing",
    // Savings
    "save", "saving*", "waste*", "wasted", "optimi*", "cheap*",
    // Idle capacity
    "idle", "unused", "stopped", "unattached", "orphan*",
];

const PERFORMANCE_KEYWORDS: &[&str] = &[
    "performance", "cpu", "memory", "latency", "slow*", "utilization", "utilisation",
    "throughput", "capacity",
];

const SECURITY_KEYWORDS: &[&str] = &[
    "security", "secure", "vulnerab*", "exposed", "exposure", "public*", "compliance",
    "compliant", "encrypt*", "unencrypted", "iam", "breach*", "alert*",
];

fn matches_word(keyword: &str, word: &str) -> bool {
    match keyword.strip_suffix('*') {
        Some(stem) => word.starts_with(stem),
        None => word == keyword || word.strip_suffix('s') == Some(keyword),
    }
}

pub struct IntentClassifier;

impl IntentClassifier {
    pub fn classify(query: &str) -> Intent {
        let text = query.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let hit = |keywords: &[&str]| {
            keywords
                .iter()
                .any(|kw| words.iter().any(|word| matches_word(kw, word)))
        };

        if hit(COST_KEYWORDS) {
            Intent::Cost
        } else if hit(PERFORMANCE_KEYWORDS) {
            Intent::Performance
        } else if hit(SECURITY_KEYWORDS) {
            Intent::Security
        } else {
            Intent::General
        }
    }

    pub fn priority(intent: Intent) -> Priority {
        match intent {
            Intent::Cost | Intent::Security => Priority::High,
            Intent::Performance => Priority::Medium,
            Intent::General => Priority::Low,
        }
    }
}
