//! Complexity buckets and the table that collapses them onto the hierarchy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::EscalationHierarchy;

/// The six complexity codes a classifier may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    Trivial = 1,
    Simple = 2,
    Moderate = 3,
    Complex = 4,
    Advanced = 5,
    Critical = 6,
}

impl ComplexityBucket {
    pub const ALL: [ComplexityBucket; 6] = [
        Self::Trivial,
        Self::Simple,
        Self::Moderate,
        Self::Complex,
        Self::Advanced,
        Self::Critical,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Trivial),
            2 => Some(Self::Simple),
            3 => Some(Self::Moderate),
            4 => Some(Self::Complex),
            5 => Some(Self::Advanced),
            6 => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// One step up, saturating at `Critical`.
    pub fn bump(self) -> Self {
        Self::from_code(self.code() as i64 + 1).unwrap_or(Self::Critical)
    }
}

impl std::fmt::Display for ComplexityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivial => write!(f, "trivial"),
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
            Self::Advanced => write!(f, "advanced"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComplexityTableError {
    #[error("complexity_table must list exactly 6 level names, got {0}")]
    WrongLength(usize),

    #[error("complexity_table entry {bucket} names unknown level {name}")]
    UnknownLevel { bucket: u8, name: String },

    #[error("complexity_table is not monotonic: {bucket} maps to {name} which is below the previous entry")]
    NonMonotonic { bucket: u8, name: String },
}

/// Fixed mapping from bucket code to level index. Never decreasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityTable {
    levels: [usize; 6],
}

impl ComplexityTable {
    /// `floor((code - 1) * n / 6)` for a hierarchy of `n` levels.
    pub fn proportional(level_count: usize) -> Self {
        let n = level_count.max(1);
        let mut levels = [0usize; 6];
        for (i, slot) in levels.iter_mut().enumerate() {
            *slot = (i * n / 6).min(n - 1);
        }
        Self { levels }
    }

    /// Build from six level names, validated against the hierarchy.
    pub fn from_names(
        names: &[String],
        hierarchy: &EscalationHierarchy,
    ) -> Result<Self, ComplexityTableError> {
        if names.len() != 6 {
            return Err(ComplexityTableError::WrongLength(names.len()));
        }
        let mut levels = [0usize; 6];
        let mut previous = 0usize;
        for (i, name) in names.iter().enumerate() {
            let bucket = (i + 1) as u8;
            let index =
                hierarchy
                    .index_of(name)
                    .ok_or_else(|| ComplexityTableError::UnknownLevel {
                        bucket,
                        name: name.clone(),
                    })?;
            if index < previous {
                return Err(ComplexityTableError::NonMonotonic {
                    bucket,
                    name: name.clone(),
                });
            }
            previous = index;
            levels[i] = index;
        }
        Ok(Self { levels })
    }

    pub fn level_for(&self, bucket: ComplexityBucket) -> usize {
        self.levels[bucket.code() as usize - 1]
    }
}
