//! Scripted capabilities for replay and simulation.
//!
//! A script assigns each level a sequence of steps. Each attempt consumes
//! the next step; once the sequence is spent the last step repeats.
//!
//! ```json
//! {
//!   "levels": {
//!     "fast":     { "steps": [ {"outcome": {"success": false, "confidence": 0.2,
//!                                           "reason": "missing import X"}} ] },
//!     "balanced": { "assess": 0.8,
//!                   "steps": [ {"error": "backend refused"},
//!                              {"delayed": {"delay_ms": 50,
//!                                           "outcome": {"success": true, "confidence": 0.9,
//!                                                       "content": "done"}}} ] },
//!     "maximum":  { "steps": [ "hang" ] }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tier_coordination::Request;

use crate::capability::{
    AttemptContext, CapabilityError, CapabilityOutcome, CapabilityRegistry, TierCapability,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    Outcome(CapabilityOutcome),
    /// Raise a capability error with this message.
    Error(String),
    /// Return `outcome` after `delay_ms`, unless cancelled first.
    Delayed {
        delay_ms: u64,
        outcome: CapabilityOutcome,
    },
    /// Never return on its own; resolves only through cancellation.
    Hang,
}

fn full_assessment() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelScript {
    #[serde(default = "full_assessment")]
    pub assess: f64,
    pub steps: Vec<ScriptStep>,
}

/// Per-level scripts keyed by level name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioScript {
    pub levels: BTreeMap<String, LevelScript>,
}

impl ScenarioScript {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse scenario script")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario script {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid script {}", path.display()))
    }

    /// One `ScriptedCapability` per scripted level.
    pub fn into_registry(self) -> CapabilityRegistry {
        self.levels
            .into_iter()
            .fold(CapabilityRegistry::new(), |registry, (level, script)| {
                registry.with(level, Arc::new(ScriptedCapability::from(script)))
            })
    }
}

/// Plays back a fixed sequence of steps.
#[derive(Debug)]
pub struct ScriptedCapability {
    steps: Vec<ScriptStep>,
    assess: f64,
    cursor: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            assess: 1.0,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_assessment(mut self, assess: f64) -> Self {
        self.assess = assess;
        self
    }

    /// Number of attempts played so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<&ScriptStep> {
        let n = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.steps.get(n).or_else(|| self.steps.last())
    }
}

impl From<LevelScript> for ScriptedCapability {
    fn from(script: LevelScript) -> Self {
        Self::new(script.steps).with_assessment(script.assess)
    }
}

#[async_trait]
impl TierCapability for ScriptedCapability {
    async fn assess(&self, _request: &Request, _ctx: &AttemptContext) -> f64 {
        self.assess
    }

    async fn attempt(
        &self,
        _request: &Request,
        ctx: &AttemptContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        match self.next_step() {
            None => Err(CapabilityError::InvalidOutput("script has no steps".into())),
            Some(ScriptStep::Outcome(outcome)) => Ok(outcome.clone()),
            Some(ScriptStep::Error(message)) => Err(CapabilityError::Backend(message.clone())),
            Some(ScriptStep::Delayed { delay_ms, outcome }) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(*delay_ms)) => Ok(outcome.clone()),
                    _ = ctx.cancel.cancelled() => Err(CapabilityError::Cancelled),
                }
            }
            Some(ScriptStep::Hang) => {
                ctx.cancel.cancelled().await;
                Err(CapabilityError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tier_coordination::CapabilityLevel;
    use tokio_util::sync::CancellationToken;

    fn ctx(cancel: CancellationToken) -> AttemptContext {
        AttemptContext {
            session_id: Arc::from("s"),
            level: CapabilityLevel::new("fast", 1.0, 0.5, 2),
            iteration: 1,
            level_iteration: 1,
            escalation: None,
            cancel,
        }
    }

    const SCRIPT: &str = r#"{
        "levels": {
            "fast": {"steps": [
                {"outcome": {"success": false, "confidence": 0.1, "reason": "missing import X"}},
                {"error": "boom"}
            ]},
            "maximum": {"assess": 0.4, "steps": ["hang"]}
        }
    }"#;

    #[test]
    fn test_parse_script() {
        let script = ScenarioScript::from_json(SCRIPT).unwrap();
        assert_eq!(script.levels.len(), 2);
        assert_eq!(script.levels["maximum"].assess, 0.4);
        assert_eq!(script.levels["fast"].assess, 1.0);
        assert_eq!(script.levels["maximum"].steps, vec![ScriptStep::Hang]);

        let registry = script.into_registry();
        assert_eq!(registry.levels(), vec!["fast", "maximum"]);
    }

    #[test]
    fn test_bad_script_is_error() {
        assert!(ScenarioScript::from_json(r#"{"levels": {"fast": {"steps": [{"explode": 1}]}}}"#).is_err());
    }

    #[tokio::test]
    async fn test_steps_play_in_order_and_last_repeats() {
        let script = ScenarioScript::from_json(SCRIPT).unwrap();
        let cap = ScriptedCapability::from(script.levels["fast"].clone());
        let req = Request::new("t");

        let first = cap.attempt(&req, &ctx(CancellationToken::new())).await.unwrap();
        assert_eq!(first.reason.as_deref(), Some("missing import X"));
        for _ in 0..2 {
            let err = cap.attempt(&req, &ctx(CancellationToken::new())).await.unwrap_err();
            assert!(matches!(err, CapabilityError::Backend(ref m) if m == "boom"));
        }
        assert_eq!(cap.calls(), 3);
    }

    #[tokio::test]
    async fn test_hang_resolves_on_cancel() {
        let cap = ScriptedCapability::new(vec![ScriptStep::Hang]);
        let token = CancellationToken::new();
        let c = ctx(token.clone());
        let req = Request::new("t");
        let handle = async { cap.attempt(&req, &c).await };
        token.cancel();
        assert!(matches!(handle.await, Err(CapabilityError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_step_waits() {
        let outcome = CapabilityOutcome::success("late", 0.9);
        let cap = ScriptedCapability::new(vec![ScriptStep::Delayed {
            delay_ms: 5_000,
            outcome: outcome.clone(),
        }]);
        let started = tokio::time::Instant::now();
        let got = cap
            .attempt(&Request::new("t"), &ctx(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(got, outcome);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
