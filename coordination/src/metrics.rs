//! Aggregate routing counters, shared by every session of one orchestrator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::escalation::StagnationKind;
use crate::router::ClassificationSource;
use crate::session::Outcome;

#[derive(Debug, Default)]
pub struct RoutingMetrics {
    sessions: AtomicU64,
    succeeded: AtomicU64,
    exhausted: AtomicU64,
    timed_out: AtomicU64,
    budget_exceeded: AtomicU64,
    attempts: AtomicU64,
    escalations: AtomicU64,
    skips: AtomicU64,
    model_classifications: AtomicU64,
    heuristic_fallbacks: AtomicU64,
    forced_entries: AtomicU64,
    exact_repeats: AtomicU64,
    repeated_errors: AtomicU64,
    oscillations: AtomicU64,
    /// Cost in thousandths, so it fits an atomic integer.
    cost_milli: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetricsSnapshot {
    pub sessions: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub timed_out: u64,
    pub budget_exceeded: u64,
    pub attempts: u64,
    pub escalations: u64,
    pub skips: u64,
    pub model_classifications: u64,
    pub heuristic_fallbacks: u64,
    pub forced_entries: u64,
    pub exact_repeats: u64,
    pub repeated_errors: u64,
    pub oscillations: u64,
    pub total_cost: f64,
}

impl RoutingMetricsSnapshot {
    /// Fraction of finished sessions that succeeded.
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.exhausted + self.timed_out + self.budget_exceeded;
        if finished == 0 {
            0.0
        } else {
            self.succeeded as f64 / finished as f64
        }
    }
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_started(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry(&self, source: ClassificationSource) {
        match source {
            ClassificationSource::Model => self.model_classifications.fetch_add(1, Ordering::Relaxed),
            ClassificationSource::Heuristic => self.heuristic_fallbacks.fetch_add(1, Ordering::Relaxed),
            ClassificationSource::Forced => self.forced_entries.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_attempt(&self, cost: f64) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if cost.is_finite() && cost > 0.0 {
            self.cost_milli
                .fetch_add((cost * 1000.0).round() as u64, Ordering::Relaxed);
        }
    }

    pub fn record_verdict(&self, kind: StagnationKind) {
        match kind {
            StagnationKind::ExactRepeat => self.exact_repeats.fetch_add(1, Ordering::Relaxed),
            StagnationKind::RepeatedError => self.repeated_errors.fetch_add(1, Ordering::Relaxed),
            StagnationKind::Oscillation => self.oscillations.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Outcome::Exhausted { .. } => self.exhausted.fetch_add(1, Ordering::Relaxed),
            Outcome::TimedOut { .. } => self.timed_out.fetch_add(1, Ordering::Relaxed),
            Outcome::BudgetExceeded { .. } => self.budget_exceeded.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> RoutingMetricsSnapshot {
        RoutingMetricsSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            model_classifications: self.model_classifications.load(Ordering::Relaxed),
            heuristic_fallbacks: self.heuristic_fallbacks.load(Ordering::Relaxed),
            forced_entries: self.forced_entries.load(Ordering::Relaxed),
            exact_repeats: self.exact_repeats.load(Ordering::Relaxed),
            repeated_errors: self.repeated_errors.load(Ordering::Relaxed),
            oscillations: self.oscillations.load(Ordering::Relaxed),
            total_cost: self.cost_milli.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}
