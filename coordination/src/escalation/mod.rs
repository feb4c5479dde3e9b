//! Escalation: hierarchy, stagnation detection and hand-off context
//!
//! Deterministic pieces of tier routing. Nothing in here calls a capability
//! or a classifier; every decision is a function of configuration and the
//! attempt ledger.
//!
//! # Escalation Ladder
//!
//! ```text
//! fast            (cost 1)   - retry while the detector says "continue"
//!     │
//!     ├─ exact repeat / repeated error / oscillation → escalate
//!     ├─ capability requested escalation             → escalate
//!     ├─ level attempt budget spent                  → escalate
//!     │
//!     ▼
//! balanced        (cost 3)
//!     │
//!     ▼
//! deep_reasoning  (cost 8)
//!     │
//!     ▼
//! maximum         (cost 20)  - terminal: no escalation, session ends
//! ```

pub mod context;
pub mod hierarchy;
pub mod level;
pub mod stagnation;

pub use context::{EscalationContext, EscalationReason};
pub use hierarchy::{
    AttemptAssessment, EscalationHierarchy, EscalationPolicy, EscalationTrigger, HierarchyError,
};
pub use level::CapabilityLevel;
pub use stagnation::{
    DetectionScope, DetectorConfig, Recommendation, StagnationDetector, StagnationKind,
    StagnationVerdict,
};
