//! Escalation Hierarchy: ordered levels plus the single escalation rule
//!
//! An attempt triggers escalation handling when it failed, when its
//! confidence is below the level threshold, or when the capability asked for
//! escalation. Whether that handling retries, escalates or stops is decided
//! by the orchestrator together with the stagnation detector; the hierarchy
//! only answers "did this attempt trigger" and "is there a level above".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::level::CapabilityLevel;

/// Invalid hierarchy definitions. Only ever raised at load time.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HierarchyError {
    #[error("hierarchy must contain at least one level")]
    Empty,

    #[error("level #{index} has a blank name")]
    BlankName { index: usize },

    #[error("duplicate level name: {name}")]
    DuplicateName { name: String },

    #[error("level {name}: confidence threshold {value} is outside [0, 1]")]
    ThresholdOutOfRange { name: String, value: f64 },

    #[error("level {name}: cost weight {value} must be finite and > 0")]
    InvalidCostWeight { name: String, value: f64 },

    #[error("levels must be ordered by strictly increasing cost: {previous} ({previous_cost}) >= {name} ({cost})")]
    NonMonotonicCost {
        previous: String,
        previous_cost: f64,
        name: String,
        cost: f64,
    },

    #[error("level {name}: max_attempts must be >= 1")]
    ZeroAttempts { name: String },

    #[error("escalated confidence bonus {0} must be finite and >= 0")]
    InvalidBonus(f64),
}

/// Tunables applied on top of the per-level thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Added to the reported confidence of attempts at a level that was
    /// entered through escalation (clamped to 1.0).
    #[serde(default)]
    pub escalated_confidence_bonus: f64,
}

/// What a capability reported about one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptAssessment {
    pub success: bool,
    pub confidence: f64,
    pub escalate: bool,
    pub reason: Option<String>,
}

/// Why an attempt did not end the session successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// The capability explicitly asked for a more capable level.
    Requested { reason: Option<String> },
    /// The attempt failed.
    Failed { reason: Option<String> },
    /// The attempt succeeded but below the level's confidence threshold.
    LowConfidence { confidence: f64, threshold: f64 },
}

impl EscalationTrigger {
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested { .. })
    }
}

impl std::fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested { reason: Some(r) } => write!(f, "escalation requested: {}", r),
            Self::Requested { reason: None } => write!(f, "escalation requested"),
            Self::Failed { reason: Some(r) } => write!(f, "attempt failed: {}", r),
            Self::Failed { reason: None } => write!(f, "attempt failed"),
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {:.2} below threshold {:.2}", confidence, threshold),
        }
    }
}

/// Ordered, validated list of capability levels.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationHierarchy {
    levels: Vec<CapabilityLevel>,
    policy: EscalationPolicy,
}

impl EscalationHierarchy {
    pub fn new(levels: Vec<CapabilityLevel>) -> Result<Self, HierarchyError> {
        Self::with_policy(levels, EscalationPolicy::default())
    }

    pub fn with_policy(
        levels: Vec<CapabilityLevel>,
        policy: EscalationPolicy,
    ) -> Result<Self, HierarchyError> {
        validate_levels(&levels)?;
        let bonus = policy.escalated_confidence_bonus;
        if !bonus.is_finite() || bonus < 0.0 {
            return Err(HierarchyError::InvalidBonus(bonus));
        }
        Ok(Self { levels, policy })
    }

    pub fn levels(&self) -> &[CapabilityLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub fn level(&self, index: usize) -> Option<&CapabilityLevel> {
        self.levels.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.levels.iter().position(|l| l.name == name)
    }

    pub fn terminal_index(&self) -> usize {
        self.levels.len() - 1
    }

    /// The highest level. Escalation is disabled here by policy.
    pub fn is_terminal(&self, index: usize) -> bool {
        index >= self.terminal_index()
    }

    pub fn can_escalate_from(&self, index: usize) -> bool {
        !self.is_terminal(index)
    }

    /// The next level up, or `None` at the terminal level.
    pub fn next(&self, index: usize) -> Option<usize> {
        if self.can_escalate_from(index) {
            Some(index + 1)
        } else {
            None
        }
    }

    /// Confidence used for the threshold comparison.
    pub fn effective_confidence(&self, reported: f64, entered_via_escalation: bool) -> f64 {
        let base = if reported.is_nan() { 0.0 } else { reported };
        let boosted = if entered_via_escalation {
            base + self.policy.escalated_confidence_bonus
        } else {
            base
        };
        boosted.clamp(0.0, 1.0)
    }

    /// Apply the escalation rule to one attempt at `index`.
    ///
    /// Returns `None` when the attempt is an acceptable success.
    pub fn escalation_trigger(
        &self,
        index: usize,
        assessment: &AttemptAssessment,
        entered_via_escalation: bool,
    ) -> Option<EscalationTrigger> {
        let level = self.level(index)?;

        if assessment.escalate {
            return Some(EscalationTrigger::Requested {
                reason: assessment.reason.clone(),
            });
        }
        if !assessment.success {
            return Some(EscalationTrigger::Failed {
                reason: assessment.reason.clone(),
            });
        }
        let confidence = self.effective_confidence(assessment.confidence, entered_via_escalation);
        if confidence < level.confidence_threshold {
            return Some(EscalationTrigger::LowConfidence {
                confidence,
                threshold: level.confidence_threshold,
            });
        }
        None
    }
}

fn validate_levels(levels: &[CapabilityLevel]) -> Result<(), HierarchyError> {
    if levels.is_empty() {
        return Err(HierarchyError::Empty);
    }

    let mut seen = std::collections::HashSet::new();
    for (index, level) in levels.iter().enumerate() {
        if level.name.trim().is_empty() {
            return Err(HierarchyError::BlankName { index });
        }
        if !seen.insert(level.name.as_str()) {
            return Err(HierarchyError::DuplicateName {
                name: level.name.clone(),
            });
        }
        let t = level.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(HierarchyError::ThresholdOutOfRange {
                name: level.name.clone(),
                value: t,
            });
        }
        if !level.cost_weight.is_finite() || level.cost_weight <= 0.0 {
            return Err(HierarchyError::InvalidCostWeight {
                name: level.name.clone(),
                value: level.cost_weight,
            });
        }
        if level.max_attempts == 0 {
            return Err(HierarchyError::ZeroAttempts {
                name: level.name.clone(),
            });
        }
    }

    for pair in levels.windows(2) {
        if pair[1].cost_weight <= pair[0].cost_weight {
            return Err(HierarchyError::NonMonotonicCost {
                previous: pair[0].name.clone(),
                previous_cost: pair[0].cost_weight,
                name: pair[1].name.clone(),
                cost: pair[1].cost_weight,
            });
        }
    }

    Ok(())
}
