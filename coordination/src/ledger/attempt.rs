//! Attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;
use super::signature::ErrorSignature;

/// One execution of a tier capability at a given level.
///
/// Created by the orchestrator right after the capability returns and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Session-wide sequence number (1-indexed, strictly increasing).
    pub iteration: u32,
    /// Attempt number within its level (1-indexed).
    pub level_iteration: u32,
    /// Level name.
    pub level: String,
    /// Position of the level in the hierarchy.
    pub level_index: usize,
    /// Digest of the produced content; `None` when nothing was produced.
    pub fingerprint: Option<Fingerprint>,
    /// Normalized failure message, if the attempt failed or reported one.
    pub error: Option<ErrorSignature>,
    pub success: bool,
    /// Confidence as used for the threshold comparison.
    pub confidence: f64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl Attempt {
    /// Whether the attempt was cut short by a cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.is_cancellation())
    }

    /// One-line description used in verdict evidence.
    pub fn describe(&self) -> String {
        let fp = self
            .fingerprint
            .map(|f| f.short())
            .unwrap_or_else(|| "-".to_string());
        match &self.error {
            Some(err) => format!(
                "#{} {} fp={} ok={} err=\"{}\"",
                self.iteration, self.level, fp, self.success, err
            ),
            None => format!("#{} {} fp={} ok={}", self.iteration, self.level, fp, self.success),
        }
    }
}

/// Everything about an attempt except the bookkeeping the ledger assigns.
#[derive(Debug, Clone)]
pub struct AttemptDraft {
    pub level: String,
    pub level_index: usize,
    pub fingerprint: Option<Fingerprint>,
    pub error: Option<ErrorSignature>,
    pub success: bool,
    pub confidence: f64,
    pub cost: f64,
}

impl AttemptDraft {
    /// A failed attempt with no content and the given signature.
    pub fn failed(level: impl Into<String>, level_index: usize, error: ErrorSignature) -> Self {
        Self {
            level: level.into(),
            level_index,
            fingerprint: None,
            error: Some(error),
            success: false,
            confidence: 0.0,
            cost: 0.0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}
