//! Escalation Context: what the next level is told about the previous one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{AttemptLedger, ErrorSignature};
use crate::request::Request;

/// Reasons for moving a request up the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The same content was produced twice in a row.
    ExactRepeat { fingerprint: String },
    /// The same normalized error repeated across the detection window.
    RepeatedError { signature: String, count: u32 },
    /// Two candidate outputs alternating A-B-A-B.
    Oscillation,
    /// The level's per-level attempt budget ran out.
    LevelBudgetExhausted { level: String, attempts: u32 },
    /// The capability asked to hand off.
    Requested { reason: Option<String> },
    /// No capability registered for the level.
    Unregistered { level: String },
    /// The capability assessed itself below the configured floor.
    LowAssessment { level: String, assessment: f64 },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactRepeat { fingerprint } => {
                write!(f, "identical output {} produced twice", fingerprint)
            }
            Self::RepeatedError { signature, count } => {
                write!(f, "error \"{}\" repeated {}x", signature, count)
            }
            Self::Oscillation => write!(f, "output oscillating between two candidates"),
            Self::LevelBudgetExhausted { level, attempts } => {
                write!(f, "{} budget exhausted after {} attempts", level, attempts)
            }
            Self::Requested { reason: Some(r) } => write!(f, "capability requested: {}", r),
            Self::Requested { reason: None } => write!(f, "capability requested escalation"),
            Self::Unregistered { level } => write!(f, "no capability registered for {}", level),
            Self::LowAssessment { level, assessment } => {
                write!(f, "{} assessed itself at {:.2}", level, assessment)
            }
        }
    }
}

/// Payload handed to the next level when escalating.
///
/// Built from the ledger by the level being left; read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationContext {
    /// The originating request.
    pub request: Request,
    pub from_level: String,
    pub to_level: String,
    /// Attempts made across all levels so far.
    pub attempts_so_far: u32,
    /// Attempts made at `from_level`.
    pub attempts_at_previous_level: u32,
    /// Most recent error signatures, oldest first.
    pub recent_errors: Vec<ErrorSignature>,
    pub accumulated_cost: f64,
    pub reason: EscalationReason,
    pub created_at: DateTime<Utc>,
}

impl EscalationContext {
    pub fn from_ledger(
        request: &Request,
        ledger: &AttemptLedger,
        from_level: &str,
        to_level: &str,
        recent_error_count: usize,
        reason: EscalationReason,
    ) -> Self {
        Self {
            request: request.clone(),
            from_level: from_level.to_string(),
            to_level: to_level.to_string(),
            attempts_so_far: ledger.total_attempts(),
            attempts_at_previous_level: ledger.attempts_at(from_level),
            recent_errors: ledger.recent_errors(recent_error_count),
            accumulated_cost: ledger.total_cost(),
            reason,
            created_at: Utc::now(),
        }
    }

    /// Same hand-off, addressed to `to_level`. Used when the intended
    /// receiver is skipped; origin, counts and reason are unchanged.
    pub fn retargeted(&self, to_level: &str) -> Self {
        Self {
            to_level: to_level.to_string(),
            ..self.clone()
        }
    }

    /// Prompt-ready briefing for the receiving capability.
    pub fn briefing(&self) -> String {
        let mut out = format!(
            "Escalated from {} to {} after {} attempt(s) ({} at {}), cost so far {:.3}.\nReason: {}\n",
            self.from_level,
            self.to_level,
            self.attempts_so_far,
            self.attempts_at_previous_level,
            self.from_level,
            self.accumulated_cost,
            self.reason,
        );
        if !self.recent_errors.is_empty() {
            out.push_str("Recent errors:\n");
            for err in &self.recent_errors {
                out.push_str(&format!("- {}\n", err.raw()));
            }
        }
        out
    }
}
