//! Tier Router
//!
//! Async driver for the tiered escalation router. The deterministic core
//! (hierarchy, ledger, detector, heuristic, state machine) lives in
//! `tier_coordination`; this crate adds:
//! - `TierCapability` workers and their registry
//! - entry classification through an injected backend with heuristic fallback
//! - an OpenAI-compatible HTTP classifier
//! - the execution-loop orchestrator producing a `Disposition`
//! - scripted capabilities for replay and the `tier-router` CLI
//!
//! # Usage
//!
//! ```ignore
//! use tier_router::{CapabilityRegistry, RoutingOrchestrator};
//! use tier_coordination::{Request, RouterConfig};
//!
//! let registry = CapabilityRegistry::new().with("fast", Arc::new(MyWorker));
//! let orchestrator = RoutingOrchestrator::new(RouterConfig::load("router.toml")?, registry)?;
//! let disposition = orchestrator.route(Request::new("fix the flaky test"), None).await;
//! ```

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod capability;
pub mod classification;
pub mod config;
pub mod http_classifier;
pub mod orchestrator;
pub mod scripted;
pub mod telemetry;

pub use capability::{
    AttemptContext, CapabilityError, CapabilityOutcome, CapabilityRegistry, TierCapability,
};
pub use classification::{ClassifierBackend, EntrySelection, RequestRouter, UnknownForcedLevel};
pub use config::ClassifierEndpoint;
pub use http_classifier::HttpClassifier;
pub use orchestrator::RoutingOrchestrator;
pub use scripted::{LevelScript, ScenarioScript, ScriptStep, ScriptedCapability};
