//! Entry Router: where a request's attempts begin
//!
//! The classifier backend (async, lives in the driver crate) returns raw
//! text; everything after that is deterministic and lives here:
//!
//! ```text
//! raw text ──parse──► bucket 1..=6 ──ComplexityTable──► level index
//!     │ (error)
//!     └──► keyword heuristic ──► bucket ──ComplexityTable──► level index
//!
//! forced level name ─────────────────────────────────────► level index
//! ```
//!
//! The router only chooses where attempts begin. Escalation afterwards is
//! the orchestrator's job.

pub mod complexity;
pub mod heuristic;
pub mod parse;

pub use complexity::{ComplexityBucket, ComplexityTable, ComplexityTableError};
pub use heuristic::{classify_text, HeuristicClassification};
pub use parse::{parse_classifier_output, ClassificationError, ParsedClassification};

use serde::{Deserialize, Serialize};

use crate::escalation::EscalationHierarchy;

/// Confidence attached to a successfully parsed model classification.
pub const MODEL_CLASSIFICATION_CONFIDENCE: f64 = 0.85;

/// Where the entry decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Model,
    Heuristic,
    Forced,
}

impl std::fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Entry level chosen for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub level: String,
    pub level_index: usize,
    /// `None` for forced levels.
    pub bucket: Option<ComplexityBucket>,
    pub confidence: f64,
    pub reasoning: String,
    pub source: ClassificationSource,
}

/// Maps classification results onto a concrete hierarchy.
#[derive(Debug, Clone)]
pub struct EntrySelector {
    level_names: Vec<String>,
    table: ComplexityTable,
}

impl EntrySelector {
    pub fn new(hierarchy: &EscalationHierarchy, table: ComplexityTable) -> Self {
        Self {
            level_names: hierarchy.levels().iter().map(|l| l.name.clone()).collect(),
            table,
        }
    }

    /// Proportional table for the hierarchy's size.
    pub fn proportional(hierarchy: &EscalationHierarchy) -> Self {
        Self::new(hierarchy, ComplexityTable::proportional(hierarchy.len()))
    }

    fn decide(
        &self,
        bucket: ComplexityBucket,
        confidence: f64,
        reasoning: String,
        source: ClassificationSource,
    ) -> RoutingDecision {
        let level_index = self.table.level_for(bucket);
        RoutingDecision {
            level: self.level_names[level_index].clone(),
            level_index,
            bucket: Some(bucket),
            confidence,
            reasoning,
            source,
        }
    }

    pub fn from_model(&self, parsed: ParsedClassification) -> RoutingDecision {
        self.decide(
            parsed.bucket,
            MODEL_CLASSIFICATION_CONFIDENCE,
            parsed.reasoning,
            ClassificationSource::Model,
        )
    }

    pub fn from_heuristic(&self, heuristic: HeuristicClassification) -> RoutingDecision {
        self.decide(
            heuristic.bucket,
            heuristic.confidence,
            heuristic.reasoning,
            ClassificationSource::Heuristic,
        )
    }

    /// Run the keyword heuristic on `text` and map the result.
    pub fn fallback(&self, text: &str) -> RoutingDecision {
        self.from_heuristic(classify_text(text))
    }

    /// Resolve a forced level name. `None` if the hierarchy has no such level.
    pub fn forced(&self, name: &str) -> Option<RoutingDecision> {
        let level_index = self.level_names.iter().position(|n| n == name)?;
        Some(RoutingDecision {
            level: name.to_string(),
            level_index,
            bucket: None,
            confidence: 1.0,
            reasoning: format!("forced entry at {}", name),
            source: ClassificationSource::Forced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::CapabilityLevel;

    fn selector() -> EntrySelector {
        let h = EscalationHierarchy::new(CapabilityLevel::default_ladder()).unwrap();
        EntrySelector::proportional(&h)
    }

    #[test]
    fn test_model_decision_uses_table() {
        let parsed = parse_classifier_output("COMPLEXITY: 6\nREASONING: outage").unwrap();
        let d = selector().from_model(parsed);
        assert_eq!(d.level, "maximum");
        assert_eq!(d.source, ClassificationSource::Model);
    }

    #[test]
    fn test_fallback_defaults_to_lowest_level() {
        let d = selector().fallback("do the thing");
        assert_eq!(d.level_index, 0);
        assert_eq!(d.bucket, Some(ComplexityBucket::Trivial));
        assert_eq!(d.source, ClassificationSource::Heuristic);
    }

    #[test]
    fn test_forced_level() {
        let s = selector();
        let d = s.forced("deep_reasoning").unwrap();
        assert_eq!(d.level_index, 2);
        assert_eq!(d.bucket, None);
        assert!(s.forced("premium").is_none());
    }
}
