//! Stagnation Detector: flags non-convergent attempt histories
//!
//! Checks run in a fixed priority order and the first match wins:
//!
//! ```text
//! 1. Timeout            elapsed > session timeout, or last attempt cancelled by it → stop
//! 2. Attempt budget     total attempts >= max_total_attempts                      → stop
//! 3. Exact repeat       last two fingerprints identical                           → escalate
//! 4. Repeated error     last K attempts failed with one normalized signature      → escalate
//! 5. Oscillation        last four fingerprints form A-B-A-B, A != B               → escalate
//! 6. No loop                                                                      → continue
//! ```
//!
//! Detection is a pure function of the ledger and the elapsed session time,
//! so every verdict can be reproduced from a recorded ledger.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::context::EscalationReason;
use crate::ledger::{Attempt, AttemptLedger};

/// Default error-repeat window (K).
pub const DEFAULT_ERROR_REPEAT_WINDOW: usize = 3;
/// Length of the A-B-A-B oscillation pattern.
pub const OSCILLATION_WINDOW: usize = 4;

/// Which attempts the pattern checks (3-5) look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionScope {
    /// Only the trailing run of attempts at the latest attempt's level.
    #[default]
    CurrentLevel,
    /// Every retained attempt in the session.
    Session,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub session_timeout: Duration,
    pub max_total_attempts: u32,
    /// K: consecutive identical failures needed for `RepeatedError`.
    pub error_repeat_window: usize,
    pub scope: DetectionScope,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(600),
            max_total_attempts: 12,
            error_repeat_window: DEFAULT_ERROR_REPEAT_WINDOW,
            scope: DetectionScope::CurrentLevel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagnationKind {
    NoLoop,
    Timeout,
    AttemptBudgetExhausted,
    ExactRepeat,
    RepeatedError,
    Oscillation,
}

impl StagnationKind {
    pub fn recommendation(self) -> Recommendation {
        match self {
            Self::NoLoop => Recommendation::Continue,
            Self::Timeout | Self::AttemptBudgetExhausted => Recommendation::Stop,
            Self::ExactRepeat | Self::RepeatedError | Self::Oscillation => {
                Recommendation::Escalate
            }
        }
    }
}

impl std::fmt::Display for StagnationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLoop => write!(f, "no_loop"),
            Self::Timeout => write!(f, "timeout"),
            Self::AttemptBudgetExhausted => write!(f, "attempt_budget_exhausted"),
            Self::ExactRepeat => write!(f, "exact_repeat"),
            Self::RepeatedError => write!(f, "repeated_error"),
            Self::Oscillation => write!(f, "oscillation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Continue,
    Escalate,
    Stop,
}

/// Result of one detector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagnationVerdict {
    pub kind: StagnationKind,
    /// How sure the detector is that the pattern is real (0 for `NoLoop`).
    pub confidence: f64,
    /// Human-readable lines supporting the verdict.
    pub evidence: Vec<String>,
    /// Set for the loop kinds that recommend escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
}

impl StagnationVerdict {
    fn new(kind: StagnationKind, confidence: f64, evidence: Vec<String>) -> Self {
        Self {
            kind,
            confidence,
            evidence,
            escalation_reason: None,
        }
    }

    fn because(mut self, reason: EscalationReason) -> Self {
        self.escalation_reason = Some(reason);
        self
    }

    pub fn recommendation(&self) -> Recommendation {
        self.kind.recommendation()
    }

    pub fn is_loop(&self) -> bool {
        self.recommendation() == Recommendation::Escalate
    }
}

#[derive(Debug, Clone)]
pub struct StagnationDetector {
    config: DetectorConfig,
}

impl StagnationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify the ledger as it stands after `elapsed` session time.
    pub fn detect(&self, ledger: &AttemptLedger, elapsed: Duration) -> StagnationVerdict {
        if let Some(v) = self.check_timeout(ledger, elapsed) {
            return v;
        }
        if let Some(v) = self.check_attempt_budget(ledger) {
            return v;
        }

        let window: Vec<&Attempt> = match self.config.scope {
            DetectionScope::CurrentLevel => ledger.current_level_run(),
            DetectionScope::Session => ledger.iter().collect(),
        };

        if let Some(v) = check_exact_repeat(&window) {
            return v;
        }
        if let Some(v) = check_repeated_error(&window, self.config.error_repeat_window) {
            return v;
        }
        if let Some(v) = check_oscillation(&window) {
            return v;
        }

        StagnationVerdict::new(
            StagnationKind::NoLoop,
            0.0,
            vec![format!(
                "{} attempt(s) in window, no repeat or oscillation",
                window.len()
            )],
        )
    }

    fn check_timeout(&self, ledger: &AttemptLedger, elapsed: Duration) -> Option<StagnationVerdict> {
        let limit = self.config.session_timeout;
        if elapsed > limit {
            return Some(StagnationVerdict::new(
                StagnationKind::Timeout,
                1.0,
                vec![format!(
                    "elapsed {:.1}s exceeds session timeout {:.1}s",
                    elapsed.as_secs_f64(),
                    limit.as_secs_f64()
                )],
            ));
        }
        let last = ledger.last()?;
        let cancelled_by_deadline = last
            .error
            .as_ref()
            .is_some_and(|e| e.normalized() == crate::ledger::signature::CANCELLED_TIMEOUT);
        cancelled_by_deadline.then(|| {
            StagnationVerdict::new(
                StagnationKind::Timeout,
                1.0,
                vec![format!("{} cancelled by session deadline", last.describe())],
            )
        })
    }

    fn check_attempt_budget(&self, ledger: &AttemptLedger) -> Option<StagnationVerdict> {
        let max = self.config.max_total_attempts;
        (ledger.total_attempts() >= max).then(|| {
            StagnationVerdict::new(
                StagnationKind::AttemptBudgetExhausted,
                1.0,
                vec![format!(
                    "{} attempts recorded, session budget is {}",
                    ledger.total_attempts(),
                    max
                )],
            )
        })
    }
}

impl Default for StagnationDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

fn check_exact_repeat(window: &[&Attempt]) -> Option<StagnationVerdict> {
    let [.., prev, last] = window else {
        return None;
    };
    let (Some(a), Some(b)) = (prev.fingerprint, last.fingerprint) else {
        return None;
    };
    if a != b || prev.iteration == last.iteration {
        return None;
    }
    Some(
        StagnationVerdict::new(
            StagnationKind::ExactRepeat,
            1.0,
            vec![prev.describe(), last.describe()],
        )
        .because(EscalationReason::ExactRepeat {
            fingerprint: a.short(),
        }),
    )
}

fn check_repeated_error(window: &[&Attempt], k: usize) -> Option<StagnationVerdict> {
    if k == 0 || window.len() < k {
        return None;
    }
    let tail = &window[window.len() - k..];
    let first = tail[0].error.as_ref()?;
    let all_same = tail
        .iter()
        .all(|a| !a.success && a.error.as_ref() == Some(first));
    if !all_same {
        return None;
    }
    Some(
        StagnationVerdict::new(
            StagnationKind::RepeatedError,
            0.9,
            tail.iter().map(|a| a.describe()).collect(),
        )
        .because(EscalationReason::RepeatedError {
            signature: first.normalized().to_string(),
            count: k as u32,
        }),
    )
}

fn check_oscillation(window: &[&Attempt]) -> Option<StagnationVerdict> {
    if window.len() < OSCILLATION_WINDOW {
        return None;
    }
    let tail = &window[window.len() - OSCILLATION_WINDOW..];
    let fps: Vec<_> = tail.iter().filter_map(|a| a.fingerprint).collect();
    let [a, b, c, d] = fps.as_slice() else {
        return None;
    };
    if a == b || a != c || b != d {
        return None;
    }
    Some(
        StagnationVerdict::new(
            StagnationKind::Oscillation,
            0.85,
            tail.iter().map(|a| a.describe()).collect(),
        )
        .because(EscalationReason::Oscillation),
    )
}
