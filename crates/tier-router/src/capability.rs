//! Tier capabilities: the async workers behind each level.
//!
//! ## Lifecycle per attempt
//!
//! ```text
//! first entry to a non-terminal level:
//!   capability.assess(request, ctx)     - cheap, side-effect free, 0..=1
//! every attempt:
//!   capability.attempt(request, ctx)    - may be cancelled via ctx.cancel
//! ```
//!
//! Implementors only need `attempt`; `assess` defaults to full confidence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use tier_coordination::{AttemptAssessment, CapabilityLevel, EscalationContext, Request};

/// Errors a capability may raise. The orchestrator never propagates these;
/// each one becomes a failed attempt with an `internal exception:` signature.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a capability reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,
    /// Produced content. `Null` means nothing was produced.
    #[serde(default)]
    pub content: Value,
    pub confidence: f64,
    #[serde(default)]
    pub cost: f64,
    /// Ask the router to hand off to a more capable level.
    #[serde(default)]
    pub escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityOutcome {
    pub fn success(content: impl Into<Value>, confidence: f64) -> Self {
        Self {
            success: true,
            content: content.into(),
            confidence,
            cost: 0.0,
            escalate: false,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Value::Null,
            confidence: 0.0,
            cost: 0.0,
            escalate: false,
            reason: Some(reason.into()),
        }
    }

    pub fn with_content(mut self, content: impl Into<Value>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn requesting_escalation(mut self, reason: impl Into<String>) -> Self {
        self.escalate = true;
        self.reason = Some(reason.into());
        self
    }

    pub fn assessment(&self) -> AttemptAssessment {
        AttemptAssessment {
            success: self.success,
            confidence: self.confidence,
            escalate: self.escalate,
            reason: self.reason.clone(),
        }
    }
}

/// Per-attempt context handed to a capability.
#[derive(Clone)]
pub struct AttemptContext {
    pub session_id: Arc<str>,
    pub level: CapabilityLevel,
    /// Session iteration this attempt will be recorded as.
    pub iteration: u32,
    /// Attempt number within the level.
    pub level_iteration: u32,
    /// Set when the level was entered through escalation.
    pub escalation: Option<Arc<EscalationContext>>,
    /// Cancelled on attempt timeout, session deadline or caller cancellation.
    pub cancel: CancellationToken,
}

impl AttemptContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn was_escalated(&self) -> bool {
        self.escalation.is_some()
    }
}

/// One worker per level.
#[async_trait]
pub trait TierCapability: Send + Sync {
    /// Cheap, side-effect-free estimate of how well this level can handle the
    /// request, in `[0, 1]`.
    async fn assess(&self, _request: &Request, _ctx: &AttemptContext) -> f64 {
        1.0
    }

    /// Execute one attempt. Implementations should watch `ctx.cancel`.
    async fn attempt(
        &self,
        request: &Request,
        ctx: &AttemptContext,
    ) -> Result<CapabilityOutcome, CapabilityError>;
}

/// Level name → capability. Populated once at startup.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn TierCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, level: impl Into<String>, capability: Arc<dyn TierCapability>) {
        self.capabilities.insert(level.into(), capability);
    }

    pub fn with(mut self, level: impl Into<String>, capability: Arc<dyn TierCapability>) -> Self {
        self.register(level, capability);
        self
    }

    pub fn get(&self, level: &str) -> Option<Arc<dyn TierCapability>> {
        self.capabilities.get(level).cloned()
    }

    pub fn contains(&self, level: &str) -> bool {
        self.capabilities.contains_key(level)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Registered level names, sorted.
    pub fn levels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
