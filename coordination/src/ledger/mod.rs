//! Attempt Ledger: append-only per-session attempt history
//!
//! The ledger keeps the most recent attempts in a bounded ring and a set of
//! counters (total attempts, per-level attempts, accumulated cost) that
//! survive eviction. Once a session reaches its disposition the ledger is
//! sealed and rejects further appends.

pub mod attempt;
pub mod fingerprint;
pub mod signature;

pub use attempt::{Attempt, AttemptDraft};
pub use fingerprint::Fingerprint;
pub use signature::ErrorSignature;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Default number of attempts retained per session.
pub const DEFAULT_LEDGER_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger for session {session_id} is sealed; no further attempts may be recorded")]
    Sealed { session_id: String },
}

/// Append-only record of every attempt in one routing session.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    session_id: String,
    capacity: usize,
    attempts: VecDeque<Attempt>,
    total: u32,
    per_level: BTreeMap<String, u32>,
    total_cost: f64,
    sealed: bool,
    started_at: DateTime<Utc>,
}

impl AttemptLedger {
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id: session_id.into(),
            capacity,
            attempts: VecDeque::with_capacity(capacity.min(DEFAULT_LEDGER_CAPACITY)),
            total: 0,
            per_level: BTreeMap::new(),
            total_cost: 0.0,
            sealed: false,
            started_at: Utc::now(),
        }
    }

    /// Record an attempt, assigning its iteration numbers and timestamp.
    pub fn append(&mut self, draft: AttemptDraft) -> Result<&Attempt, LedgerError> {
        if self.sealed {
            return Err(LedgerError::Sealed {
                session_id: self.session_id.clone(),
            });
        }

        self.total += 1;
        let level_count = self.per_level.entry(draft.level.clone()).or_insert(0);
        *level_count += 1;
        self.total_cost += draft.cost;

        let attempt = Attempt {
            iteration: self.total,
            level_iteration: *level_count,
            level: draft.level,
            level_index: draft.level_index,
            fingerprint: draft.fingerprint,
            error: draft.error,
            success: draft.success,
            confidence: draft.confidence,
            cost: draft.cost,
            timestamp: Utc::now(),
        };

        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
        let newest = self.attempts.len() - 1;
        Ok(&self.attempts[newest])
    }

    /// Mark the session terminal. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts currently retained (at most `capacity`).
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Total attempts ever recorded, including evicted ones.
    pub fn total_attempts(&self) -> u32 {
        self.total
    }

    pub fn attempts_at(&self, level: &str) -> u32 {
        self.per_level.get(level).copied().unwrap_or(0)
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Attempt count per level name.
    pub fn distribution(&self) -> BTreeMap<String, u32> {
        self.per_level.clone()
    }

    /// Retained attempts, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Attempt> {
        self.attempts.iter()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.back()
    }

    /// The last `n` retained attempts, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&Attempt> {
        let skip = self.attempts.len().saturating_sub(n);
        self.attempts.iter().skip(skip).collect()
    }

    /// Trailing attempts made at the same level as the latest one, oldest first.
    pub fn current_level_run(&self) -> Vec<&Attempt> {
        let Some(last) = self.attempts.back() else {
            return Vec::new();
        };
        let mut run: Vec<&Attempt> = self
            .attempts
            .iter()
            .rev()
            .take_while(|a| a.level_index == last.level_index)
            .collect();
        run.reverse();
        run
    }

    /// Up to `n` most recent error signatures, oldest first.
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorSignature> {
        let mut errors: Vec<ErrorSignature> = self
            .attempts
            .iter()
            .rev()
            .filter_map(|a| a.error.clone())
            .take(n)
            .collect();
        errors.reverse();
        errors
    }

    /// Compact one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "session={} attempts={} cost={:.3} sealed={}",
            self.session_id, self.total, self.total_cost, self.sealed
        )
    }
}
