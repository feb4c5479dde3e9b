//! Session State Machine: explicit states and legal transition guards.
//!
//! Provides a typed state model for one routing session so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected with a typed error.
//! 3. Offline replay can reconstruct the exact sequence of states.
//!
//! The orchestrator calls `advance()` to move between states. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;
use tokio::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The set of session states.
///
/// Every session starts at `Selecting` and ends in exactly one of the four
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Choosing the entry level (classifier or forced level).
    Selecting,
    /// A capability call is in flight.
    Attempting,
    /// Running the stagnation detector over the ledger.
    Detecting,
    /// Retrying at the same level.
    Continuing,
    /// Moving to the next level.
    Escalating,
    /// Terminal: accepted success.
    Succeeded,
    /// Terminal: attempts or levels ran out.
    Exhausted,
    /// Terminal: session deadline hit.
    TimedOut,
    /// Terminal: accumulated cost over the configured budget.
    BudgetExceeded,
}

impl SessionState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::TimedOut | Self::BudgetExceeded
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selecting => write!(f, "Selecting"),
            Self::Attempting => write!(f, "Attempting"),
            Self::Detecting => write!(f, "Detecting"),
            Self::Continuing => write!(f, "Continuing"),
            Self::Escalating => write!(f, "Escalating"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::TimedOut => write!(f, "TimedOut"),
            Self::BudgetExceeded => write!(f, "BudgetExceeded"),
        }
    }
}

/// Legal transitions between session states.
///
/// ```text
/// Selecting  → Attempting
/// Attempting → Succeeded | Detecting | Escalating (level skipped)
/// Detecting  → Continuing | Escalating | BudgetExceeded
/// Continuing → Attempting
/// Escalating → Attempting
/// any non-terminal → Exhausted | TimedOut
/// ```
fn is_legal_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    if from.is_terminal() {
        return false;
    }
    if matches!(to, Exhausted | TimedOut) {
        return true;
    }

    matches!(
        (from, to),
        (Selecting, Attempting)
            | (Attempting, Succeeded)
            | (Attempting, Detecting)
            | (Attempting, Escalating)
            | (Detecting, Continuing)
            | (Detecting, Escalating)
            | (Detecting, BudgetExceeded)
            | (Continuing, Attempting)
            | (Escalating, Attempting)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SessionState,
    pub to: SessionState,
    /// Level the session was at when the transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Session iteration at the time of transition (0 before the first attempt).
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal state transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Per-session state machine.
#[derive(Debug)]
pub struct SessionStateMachine {
    session_id: String,
    current: SessionState,
    level: Option<String>,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl SessionStateMachine {
    /// Create a new state machine starting at `Selecting`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current: SessionState::Selecting,
            level: None,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    pub fn set_level(&mut self, level: impl Into<String>) {
        self.level = Some(level.into());
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: SessionState,
        reason: Option<&str>,
    ) -> Result<&TransitionRecord, IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            level: self.level.clone(),
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            session_id = %self.session_id,
            from = %self.current,
            to = %to,
            level = self.level.as_deref().unwrap_or("-"),
            iteration = self.iteration,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        let newest = self.transitions.len() - 1;
        Ok(&self.transitions[newest])
    }

    /// Move to `Exhausted` from any non-terminal state.
    pub fn exhaust(&mut self, reason: &str) -> Result<&TransitionRecord, IllegalTransition> {
        self.advance(SessionState::Exhausted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Compact history for logging.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            SessionState::Selecting,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(state: SessionState) -> SessionStateMachine {
        let mut sm = SessionStateMachine::new("t");
        sm.current = state;
        sm
    }

    #[test]
    fn test_initial_state() {
        let sm = SessionStateMachine::new("s");
        assert_eq!(sm.current(), SessionState::Selecting);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_retry_then_escalate_then_succeed() {
        let mut sm = SessionStateMachine::new("s");
        sm.set_level("fast");
        sm.advance(SessionState::Attempting, None).unwrap();
        sm.set_iteration(1);
        sm.advance(SessionState::Detecting, Some("attempt failed"))
            .unwrap();
        sm.advance(SessionState::Continuing, None).unwrap();
        sm.advance(SessionState::Attempting, None).unwrap();
        sm.set_iteration(2);
        sm.advance(SessionState::Detecting, None).unwrap();
        sm.advance(SessionState::Escalating, Some("repeated error"))
            .unwrap();
        sm.set_level("balanced");
        sm.advance(SessionState::Attempting, None).unwrap();
        sm.set_iteration(3);
        let last = sm.advance(SessionState::Succeeded, None).unwrap();
        assert_eq!(last.level.as_deref(), Some("balanced"));
        assert_eq!(last.iteration, 3);

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 8);
        assert_eq!(sm.transitions()[5].reason.as_deref(), Some("repeated error"));
    }

    #[test]
    fn test_skip_goes_straight_to_escalating() {
        let mut sm = at(SessionState::Attempting);
        assert!(sm.advance(SessionState::Escalating, Some("skipped")).is_ok());
    }

    #[test]
    fn test_exhausted_and_timed_out_from_any_non_terminal() {
        for state in [
            SessionState::Selecting,
            SessionState::Attempting,
            SessionState::Detecting,
            SessionState::Continuing,
            SessionState::Escalating,
        ] {
            assert!(at(state).exhaust("x").is_ok());
            assert!(at(state).advance(SessionState::TimedOut, None).is_ok());
        }
    }

    #[test]
    fn test_budget_exceeded_only_from_detecting() {
        assert!(at(SessionState::Detecting)
            .advance(SessionState::BudgetExceeded, None)
            .is_ok());
        assert!(at(SessionState::Attempting)
            .advance(SessionState::BudgetExceeded, None)
            .is_err());
    }

    #[test]
    fn test_cannot_leave_terminal() {
        for state in [
            SessionState::Succeeded,
            SessionState::Exhausted,
            SessionState::TimedOut,
            SessionState::BudgetExceeded,
        ] {
            let mut sm = at(state);
            let err = sm.advance(SessionState::Attempting, None).unwrap_err();
            assert_eq!(err.from, state);
            assert!(sm.exhaust("nope").is_err());
        }
    }

    #[test]
    fn test_illegal_skip_transition() {
        let mut sm = SessionStateMachine::new("s");
        let err = sm.advance(SessionState::Detecting, None).unwrap_err();
        assert_eq!(err.to, SessionState::Detecting);
        assert!(sm.advance(SessionState::Succeeded, None).is_err());
        assert_eq!(sm.current(), SessionState::Selecting);
    }
}
