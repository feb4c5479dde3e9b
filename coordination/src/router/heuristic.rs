//! Keyword Heuristic: deterministic fallback classification
//!
//! Used whenever the classifier backend is absent, slow, failing or
//! unparseable. Covers every input: text with no recognised signal lands in
//! the lowest bucket.
//!
//! ```text
//! text → keyword hits per tier → bucket → (optional size bump)
//!   │  security, data loss, outage          │→ Critical
//!   │  architecture, distributed, migration │→ Advanced
//!   │  refactor, async, multi-file          │→ Complex
//!   │  implement, feature, endpoint         │→ Moderate
//!   │  fix, rename, typo, lint              │→ Simple
//!   │  nothing recognised                   │→ Trivial
//! ```

use serde::{Deserialize, Serialize};

use super::complexity::ComplexityBucket;

/// Signals that the work is high-stakes.
const CRITICAL_KEYWORDS: &[&str] = &[
    "security",
    "vulnerab",
    "exploit",
    "data loss",
    "corruption",
    "outage",
    "incident",
    "cryptograph",
    "authentication",
    "compliance",
];

const ADVANCED_KEYWORDS: &[&str] = &[
    "architecture",
    "redesign",
    "distributed",
    "consensus",
    "migration",
    "scalab",
    "protocol",
    "formal proof",
    "lock-free",
    "new subsystem",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "refactor",
    "multi-file",
    "cross-module",
    "async",
    "concurren",
    "parallel",
    "state machine",
    "algorithm",
    "optimi",
    "performance",
    "integrat",
    "cache",
];

const MODERATE_KEYWORDS: &[&str] = &[
    "implement",
    "feature",
    "add support",
    "endpoint",
    "parser",
    "validation",
    "debug",
    "investigate",
    "test suite",
    "handler",
];

const SIMPLE_KEYWORDS: &[&str] = &[
    "fix",
    "typo",
    "rename",
    "lint",
    "format",
    "import",
    "update",
    "bump",
    "document",
    "comment",
    "add field",
];

/// Descriptions longer than this (in words) are bumped one bucket.
const LONG_DESCRIPTION_WORDS: usize = 150;

/// Outcome of the keyword heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicClassification {
    pub bucket: ComplexityBucket,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Hits {
    critical: usize,
    advanced: usize,
    complex: usize,
    moderate: usize,
    simple: usize,
}

impl Hits {
    fn total(&self) -> usize {
        self.critical + self.advanced + self.complex + self.moderate + self.simple
    }
}

fn count(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| lower.contains(*kw)).count()
}

/// Classify free text. Pure and total.
pub fn classify_text(text: &str) -> HeuristicClassification {
    let lower = text.to_lowercase();
    let hits = Hits {
        critical: count(&lower, CRITICAL_KEYWORDS),
        advanced: count(&lower, ADVANCED_KEYWORDS),
        complex: count(&lower, COMPLEX_KEYWORDS),
        moderate: count(&lower, MODERATE_KEYWORDS),
        simple: count(&lower, SIMPLE_KEYWORDS),
    };

    let mut bucket = bucket_for(&hits);
    let words = lower.split_whitespace().count();
    let long = words > LONG_DESCRIPTION_WORDS;
    if long {
        bucket = bucket.bump();
    }

    let confidence = if hits.total() == 0 {
        0.3
    } else {
        (0.4 + 0.1 * hits.total() as f64).min(0.8)
    };

    let reasoning = format!(
        "keyword heuristic: critical={} advanced={} complex={} moderate={} simple={} words={}{}",
        hits.critical,
        hits.advanced,
        hits.complex,
        hits.moderate,
        hits.simple,
        words,
        if long { " (long description)" } else { "" }
    );

    HeuristicClassification {
        bucket,
        confidence,
        reasoning,
    }
}

fn bucket_for(h: &Hits) -> ComplexityBucket {
    // High-stakes signals dominate once anything non-trivial backs them up
    if h.critical >= 2 || (h.critical >= 1 && h.advanced + h.complex >= 1) {
        return ComplexityBucket::Critical;
    }
    if h.advanced >= 2 || (h.advanced >= 1 && h.simple == 0) || h.critical >= 1 {
        return ComplexityBucket::Advanced;
    }
    if h.complex >= 2 || (h.complex >= 1 && h.simple == 0) || h.advanced >= 1 {
        return ComplexityBucket::Complex;
    }
    if h.moderate >= 1 || h.complex >= 1 {
        return ComplexityBucket::Moderate;
    }
    if h.simple >= 1 {
        return ComplexityBucket::Simple;
    }
    ComplexityBucket::Trivial
}
