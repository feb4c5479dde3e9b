//! Capability levels: the rungs of the escalation hierarchy.

use serde::{Deserialize, Serialize};

/// One rung in the hierarchy.
///
/// Levels are configured once at startup and never mutate; only their order
/// and thresholds matter to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityLevel {
    /// Registry key for the capability serving this level.
    pub name: String,
    /// Relative cost weight (strictly increasing along the hierarchy).
    pub cost_weight: f64,
    /// Confidence below which escalation handling is mandatory.
    pub confidence_threshold: f64,
    /// Maximum attempts at this level per session.
    pub max_attempts: u32,
}

impl CapabilityLevel {
    pub fn new(
        name: impl Into<String>,
        cost_weight: f64,
        confidence_threshold: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            name: name.into(),
            cost_weight,
            confidence_threshold,
            max_attempts,
        }
    }

    /// The default four-rung ladder.
    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new("fast", 1.0, 0.6, 3),
            Self::new("balanced", 3.0, 0.55, 2),
            Self::new("deep_reasoning", 8.0, 0.5, 2),
            Self::new("maximum", 20.0, 0.0, 1),
        ]
    }
}

impl std::fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
