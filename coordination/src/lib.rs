//! Tier Coordination Library
//!
//! Deterministic core of the tiered escalation router:
//! - Escalation hierarchy of capability levels and the escalation rule
//! - Append-only attempt ledger with content fingerprints and error signatures
//! - Stagnation detection (exact repeat, repeated error, oscillation)
//! - Entry routing: classifier output parsing, keyword heuristic, complexity table
//! - Session state machine and terminal dispositions
//! - Structured routing events and aggregate metrics
//!
//! Nothing in this crate performs I/O beyond reading a config file; the async
//! driver lives in `tier-router`.
//!
//! # Usage
//!
//! ```ignore
//! use tier_coordination::{RouterConfig, StagnationDetector, AttemptLedger};
//!
//! let config = RouterConfig::load("router.toml")?;
//! let hierarchy = config.hierarchy()?;
//! let detector = StagnationDetector::new(config.detector_config());
//! let ledger = AttemptLedger::new("session-1", config.ledger_capacity);
//! let verdict = detector.detect(&ledger, elapsed);
//! ```

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod escalation;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod request;
pub mod router;
pub mod session;

pub use config::{ConfigError, RouterConfig};
pub use escalation::{
    AttemptAssessment, CapabilityLevel, DetectionScope, DetectorConfig, EscalationContext,
    EscalationHierarchy, EscalationPolicy, EscalationReason, EscalationTrigger, HierarchyError,
    Recommendation, StagnationDetector, StagnationKind, StagnationVerdict,
};
pub use events::{
    EventBus, EventFilter, EventSink, FanoutSink, MemorySink, RoutingEvent, RoutingEventKind,
    SharedEventSink, TracingSink,
};
pub use ledger::{Attempt, AttemptDraft, AttemptLedger, ErrorSignature, Fingerprint, LedgerError};
pub use metrics::{RoutingMetrics, RoutingMetricsSnapshot};
pub use request::{Request, RequestContext};
pub use router::{
    ClassificationError, ClassificationSource, ComplexityBucket, ComplexityTable, EntrySelector,
    RoutingDecision,
};
pub use session::{
    Disposition, IllegalTransition, Outcome, SessionState, SessionStateMachine, TransitionRecord,
};
