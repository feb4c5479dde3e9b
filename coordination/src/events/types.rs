//! Routing event types
//!
//! One envelope (`session_id`, `timestamp`) around a `type`-tagged payload.
//! Every state transition, entry selection, attempt, skip, verdict,
//! escalation and session finish produces exactly one event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::{Recommendation, StagnationKind, StagnationVerdict};
use crate::ledger::Attempt;
use crate::router::{ClassificationSource, ComplexityBucket, RoutingDecision};
use crate::session::SessionState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RoutingEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEventKind {
    SessionStarted {
        request_id: String,
        task_preview: String,
    },

    /// The classifier backend could not be used; the heuristic decided.
    ClassifierFallback { error: String },

    EntrySelected {
        level: String,
        source: ClassificationSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket: Option<ComplexityBucket>,
        confidence: f64,
        reasoning: String,
    },

    StateChanged {
        from: SessionState,
        to: SessionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    AttemptRecorded {
        level: String,
        iteration: u32,
        level_iteration: u32,
        success: bool,
        confidence: f64,
        cost: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    LevelSkipped { level: String, reason: String },

    VerdictReached {
        level: String,
        iteration: u32,
        verdict: StagnationKind,
        recommendation: Recommendation,
        confidence: f64,
        evidence: Vec<String>,
    },

    Escalated {
        from_level: String,
        to_level: String,
        reason: String,
        attempts_so_far: u32,
    },

    SessionFinished {
        state: SessionState,
        summary: String,
        total_attempts: u32,
        total_cost: f64,
        elapsed_ms: u64,
    },
}

impl RoutingEvent {
    pub fn new(session_id: impl Into<String>, kind: RoutingEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn entry_selected(session_id: &str, decision: &RoutingDecision) -> Self {
        Self::new(
            session_id,
            RoutingEventKind::EntrySelected {
                level: decision.level.clone(),
                source: decision.source,
                bucket: decision.bucket,
                confidence: decision.confidence,
                reasoning: decision.reasoning.clone(),
            },
        )
    }

    pub fn attempt_recorded(session_id: &str, attempt: &Attempt) -> Self {
        Self::new(
            session_id,
            RoutingEventKind::AttemptRecorded {
                level: attempt.level.clone(),
                iteration: attempt.iteration,
                level_iteration: attempt.level_iteration,
                success: attempt.success,
                confidence: attempt.confidence,
                cost: attempt.cost,
                fingerprint: attempt.fingerprint.map(|f| f.short()),
                error: attempt.error.as_ref().map(|e| e.raw().to_string()),
            },
        )
    }

    pub fn verdict_reached(
        session_id: &str,
        level: &str,
        iteration: u32,
        verdict: &StagnationVerdict,
    ) -> Self {
        Self::new(
            session_id,
            RoutingEventKind::VerdictReached {
                level: level.to_string(),
                iteration,
                verdict: verdict.kind,
                recommendation: verdict.recommendation(),
                confidence: verdict.confidence,
                evidence: verdict.evidence.clone(),
            },
        )
    }

    /// Snake-case name of the payload variant.
    pub fn event_type(&self) -> &'static str {
        match &self.kind {
            RoutingEventKind::SessionStarted { .. } => "session_started",
            RoutingEventKind::ClassifierFallback { .. } => "classifier_fallback",
            RoutingEventKind::EntrySelected { .. } => "entry_selected",
            RoutingEventKind::StateChanged { .. } => "state_changed",
            RoutingEventKind::AttemptRecorded { .. } => "attempt_recorded",
            RoutingEventKind::LevelSkipped { .. } => "level_skipped",
            RoutingEventKind::VerdictReached { .. } => "verdict_reached",
            RoutingEventKind::Escalated { .. } => "escalated",
            RoutingEventKind::SessionFinished { .. } => "session_finished",
        }
    }

    /// Level the event concerns, if any.
    pub fn level(&self) -> Option<&str> {
        match &self.kind {
            RoutingEventKind::EntrySelected { level, .. }
            | RoutingEventKind::AttemptRecorded { level, .. }
            | RoutingEventKind::LevelSkipped { level, .. }
            | RoutingEventKind::VerdictReached { level, .. } => Some(level),
            RoutingEventKind::StateChanged { level, .. } => level.as_deref(),
            RoutingEventKind::Escalated { to_level, .. } => Some(to_level),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = RoutingEvent::new(
            "s-1",
            RoutingEventKind::LevelSkipped {
                level: "balanced".into(),
                reason: "no capability registered for balanced".into(),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "level_skipped");
        assert_eq!(json["session_id"], "s-1");

        let parsed: RoutingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.event_type(), "level_skipped");
        assert_eq!(parsed.level(), Some("balanced"));
    }

    #[test]
    fn test_state_change_accessors() {
        let event = RoutingEvent::new(
            "s-2",
            RoutingEventKind::StateChanged {
                from: SessionState::Detecting,
                to: SessionState::Escalating,
                level: None,
                iteration: 2,
                reason: Some("oscillation".into()),
            },
        );
        assert_eq!(event.event_type(), "state_changed");
        assert_eq!(event.level(), None);
    }
}
