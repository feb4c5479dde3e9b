//! Dispositions: the single terminal outcome of a routing session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::state_machine::{SessionState, TransitionRecord};
use crate::ledger::{AttemptLedger, ErrorSignature};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        content: Value,
        level: String,
        confidence: f64,
    },
    Exhausted {
        reason: String,
    },
    TimedOut {
        reason: String,
    },
    BudgetExceeded {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> SessionState {
        match self {
            Self::Success { .. } => SessionState::Succeeded,
            Self::Exhausted { .. } => SessionState::Exhausted,
            Self::TimedOut { .. } => SessionState::TimedOut,
            Self::BudgetExceeded { .. } => SessionState::BudgetExceeded,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Exhausted { reason }
            | Self::TimedOut { reason }
            | Self::BudgetExceeded { reason } => Some(reason),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success {
                level, confidence, ..
            } => write!(f, "success at {} (confidence {:.2})", level, confidence),
            Self::Exhausted { reason } => write!(f, "exhausted: {}", reason),
            Self::TimedOut { reason } => write!(f, "timed out: {}", reason),
            Self::BudgetExceeded { reason } => write!(f, "budget exceeded: {}", reason),
        }
    }
}

/// Outcome plus the session bookkeeping a caller needs to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disposition {
    pub session_id: String,
    pub request_id: String,
    pub outcome: Outcome,
    pub total_cost: f64,
    pub total_attempts: u32,
    pub attempts_by_level: BTreeMap<String, u32>,
    /// Most recent error signatures, oldest first.
    pub recent_errors: Vec<ErrorSignature>,
    /// Level of the last recorded attempt; `None` when nothing was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_level: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl Disposition {
    /// Snapshot the ledger into a disposition. Does not seal the ledger.
    pub fn from_ledger(
        request_id: &str,
        ledger: &AttemptLedger,
        outcome: Outcome,
        final_level: Option<String>,
        recent_error_count: usize,
        elapsed_ms: u64,
        transitions: Vec<TransitionRecord>,
    ) -> Self {
        Self {
            session_id: ledger.session_id().to_string(),
            request_id: request_id.to_string(),
            outcome,
            total_cost: ledger.total_cost(),
            total_attempts: ledger.total_attempts(),
            attempts_by_level: ledger.distribution(),
            recent_errors: ledger.recent_errors(recent_error_count),
            final_level,
            elapsed_ms,
            transitions,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} | attempts={} cost={:.3} elapsed={}ms final_level={}",
            self.outcome,
            self.total_attempts,
            self.total_cost,
            self.elapsed_ms,
            self.final_level.as_deref().unwrap_or("-"),
        )
    }
}
