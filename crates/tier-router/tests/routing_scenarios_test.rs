//! End-to-end routing scenarios through the real orchestrator.
//!
//! Hierarchy used throughout: fast(0.6, 2) → balanced(0.5, 2) → premium(0.0, 1)
//! with a repeated-error window of 2. Capabilities are scripted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tier_coordination::{
    EscalationContext, EscalationReason, MemorySink, Outcome, Request, RouterConfig,
    RoutingEventKind, SessionState,
};
use tier_router::{
    AttemptContext, CapabilityError, CapabilityOutcome, CapabilityRegistry, RoutingOrchestrator,
    ScriptStep, ScriptedCapability, TierCapability,
};

const LADDER: &str = r#"
[[levels]]
name = "fast"
cost_weight = 1.0
confidence_threshold = 0.6
max_attempts = 2

[[levels]]
name = "balanced"
cost_weight = 2.0
confidence_threshold = 0.5
max_attempts = 2

[[levels]]
name = "premium"
cost_weight = 5.0
confidence_threshold = 0.0
max_attempts = 1
"#;

fn config(extra: &str) -> RouterConfig {
    let text = format!("error_repeat_window = 2\n{}\n{}", extra, LADDER);
    RouterConfig::from_toml_str(&text).unwrap()
}

fn failure(content: &str, reason: &str) -> ScriptStep {
    ScriptStep::Outcome(CapabilityOutcome::failure(reason).with_content(content))
}

fn success(content: &str, confidence: f64) -> ScriptStep {
    ScriptStep::Outcome(CapabilityOutcome::success(content, confidence))
}

fn scripted(steps: Vec<ScriptStep>) -> Arc<ScriptedCapability> {
    Arc::new(ScriptedCapability::new(steps))
}

/// Succeeds and remembers the escalation context it was handed.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Option<Arc<EscalationContext>>>,
}

#[async_trait]
impl TierCapability for Recorder {
    async fn attempt(
        &self,
        _request: &Request,
        ctx: &AttemptContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        *self.seen.lock().unwrap() = ctx.escalation.clone();
        Ok(CapabilityOutcome::success("handled", 0.9))
    }
}

fn orchestrator(cfg: RouterConfig, registry: CapabilityRegistry) -> (RoutingOrchestrator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let orch = RoutingOrchestrator::new(cfg, registry)
        .unwrap()
        .with_sink(sink.clone());
    (orch, sink)
}

#[tokio::test]
async fn test_repeated_error_escalates_with_context() {
    let recorder = Arc::new(Recorder::default());
    let registry = CapabilityRegistry::new()
        .with(
            "fast",
            scripted(vec![
                failure("attempt a", "missing import X"),
                failure("attempt b", "missing import X"),
            ]),
        )
        .with("balanced", recorder.clone());
    let (orch, sink) = orchestrator(config(""), registry);

    let d = orch
        .route(Request::new("wire up the loader"), Some("fast"))
        .await;

    assert!(d.is_success(), "{}", d.summary());
    assert_eq!(d.final_level.as_deref(), Some("balanced"));
    assert_eq!(d.attempts_by_level.get("fast"), Some(&2));

    let ctx = recorder.seen.lock().unwrap().clone().expect("escalation context");
    assert_eq!(ctx.from_level, "fast");
    assert_eq!(ctx.to_level, "balanced");
    assert_eq!(ctx.recent_errors.len(), 2);
    assert!(ctx.recent_errors.iter().all(|e| e.raw() == "missing import X"));
    assert!(matches!(
        ctx.reason,
        EscalationReason::RepeatedError { count: 2, .. }
    ));

    let escalations = sink.of_type("escalated");
    assert_eq!(escalations.len(), 1);
}

#[tokio::test]
async fn test_skipped_level_keeps_original_hand_off() {
    let recorder = Arc::new(Recorder::default());
    let registry = CapabilityRegistry::new()
        .with(
            "fast",
            scripted(vec![
                failure("attempt a", "missing import X"),
                failure("attempt b", "missing import X"),
            ]),
        )
        .with("premium", recorder.clone());
    let (orch, sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("wire up the loader"), Some("fast")).await;

    assert!(d.is_success(), "{}", d.summary());
    assert_eq!(d.final_level.as_deref(), Some("premium"));

    let ctx = recorder.seen.lock().unwrap().clone().expect("escalation context");
    assert_eq!(ctx.from_level, "fast");
    assert_eq!(ctx.to_level, "premium");
    assert_eq!(ctx.attempts_at_previous_level, 2);
    assert_eq!(ctx.recent_errors.len(), 2);
    assert!(matches!(
        ctx.reason,
        EscalationReason::RepeatedError { count: 2, .. }
    ));
    assert_eq!(sink.of_type("level_skipped").len(), 1);
}

#[tokio::test]
async fn test_session_scope_sees_repeat_across_levels() {
    let registry = || {
        CapabilityRegistry::new()
            .with("fast", scripted(vec![failure("A", "e1"), failure("B", "e2")]))
            .with("balanced", scripted(vec![failure("B", "e3"), failure("C", "e4")]))
            .with("premium", scripted(vec![success("done", 0.9)]))
    };

    // balanced repeats fast's last output on its first try.
    let (orch, _sink) = orchestrator(config("detection_scope = \"session\""), registry());
    let d = orch.route(Request::new("task"), Some("fast")).await;
    assert!(d.is_success(), "{}", d.summary());
    assert_eq!(d.attempts_by_level.get("balanced"), Some(&1));
    assert_eq!(d.final_level.as_deref(), Some("premium"));

    let (orch, _sink) = orchestrator(config(""), registry());
    let d = orch.route(Request::new("task"), Some("fast")).await;
    assert!(d.is_success(), "{}", d.summary());
    assert_eq!(d.attempts_by_level.get("balanced"), Some(&2));
}

#[tokio::test]
async fn test_exact_repeat_escalates_after_two_attempts() {
    let registry = CapabilityRegistry::new()
        .with(
            "fast",
            scripted(vec![failure("F1", "wrong answer"), failure("F1", "still wrong")]),
        )
        .with("balanced", scripted(vec![success("fixed", 0.8)]));
    let (orch, sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(d.is_success());
    assert_eq!(d.attempts_by_level.get("fast"), Some(&2));
    let verdicts: Vec<_> = sink
        .of_type("verdict_reached")
        .into_iter()
        .filter_map(|e| match e.kind {
            RoutingEventKind::VerdictReached {
                verdict,
                confidence,
                ..
            } => Some((verdict, confidence)),
            _ => None,
        })
        .collect();
    assert_eq!(
        verdicts.last().map(|(v, c)| (v.to_string(), *c)),
        Some(("exact_repeat".to_string(), 1.0))
    );
}

#[tokio::test]
async fn test_forced_terminal_failure_is_exhausted() {
    let registry = CapabilityRegistry::new().with(
        "premium",
        scripted(vec![failure("nope", "could not do it")]),
    );
    let (orch, _sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("premium")).await;

    match &d.outcome {
        Outcome::Exhausted { reason } => assert!(reason.contains("terminal level premium"), "{}", reason),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(d.total_attempts, 1);
    assert!(!d.transitions.iter().any(|t| t.to == SessionState::Escalating));
    assert_eq!(d.transitions.last().map(|t| t.to), Some(SessionState::Exhausted));
}

#[tokio::test]
async fn test_failing_levels_escalate_monotonically_to_exhaustion() {
    let registry = CapabilityRegistry::new()
        .with("fast", scripted(vec![failure("f1", "e1"), failure("f2", "e2")]))
        .with("balanced", scripted(vec![failure("b1", "e3"), failure("b2", "e4")]))
        .with("premium", scripted(vec![failure("p1", "e5")]));
    let (orch, _sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(matches!(d.outcome, Outcome::Exhausted { .. }));
    assert_eq!(d.total_attempts, 5);
    assert_eq!(d.attempts_by_level.get("fast"), Some(&2));
    assert_eq!(d.attempts_by_level.get("balanced"), Some(&2));
    assert_eq!(d.attempts_by_level.get("premium"), Some(&1));

    let levels: Vec<_> = d
        .transitions
        .iter()
        .filter(|t| t.to == SessionState::Attempting)
        .filter_map(|t| t.level.clone())
        .collect();
    let mut sorted = levels.clone();
    sorted.sort_by_key(|l| ["fast", "balanced", "premium"].iter().position(|n| *n == l.as_str()));
    assert_eq!(levels, sorted, "levels must never go back down");
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_mid_attempt() {
    let registry = CapabilityRegistry::new().with("fast", scripted(vec![ScriptStep::Hang]));
    let (orch, _sink) = orchestrator(
        config("session_timeout_secs = 5\nattempt_timeout_secs = 30"),
        registry,
    );

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(matches!(d.outcome, Outcome::TimedOut { .. }), "{:?}", d.outcome);
    assert_eq!(d.total_attempts, 1);
    assert_eq!(d.recent_errors.last().map(|e| e.raw()), Some("cancelled: timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_flows_through_detection() {
    let registry = CapabilityRegistry::new()
        .with("fast", scripted(vec![ScriptStep::Hang]))
        .with("balanced", scripted(vec![success("done", 0.9)]));
    let (orch, _sink) = orchestrator(config("attempt_timeout_secs = 2"), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(d.is_success(), "{}", d.summary());
    assert_eq!(d.final_level.as_deref(), Some("balanced"));
    assert_eq!(
        d.recent_errors.first().map(|e| e.raw()),
        Some("attempt timed out after 2s")
    );
}

#[tokio::test]
async fn test_capability_error_becomes_failed_attempt() {
    let registry = CapabilityRegistry::new()
        .with("fast", scripted(vec![ScriptStep::Error("boom".into())]))
        .with("balanced", scripted(vec![success("ok", 0.7)]));
    let (orch, _sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(d.is_success());
    assert_eq!(d.attempts_by_level.get("fast"), Some(&2));
    assert!(d
        .recent_errors
        .iter()
        .all(|e| e.raw().starts_with("internal exception: ")));
}

#[tokio::test]
async fn test_missing_capability_is_skipped_without_attempt() {
    let registry = CapabilityRegistry::new()
        .with("fast", scripted(vec![failure("f1", "e1"), failure("f2", "e2")]))
        .with("premium", scripted(vec![success("done", 0.1)]));
    let (orch, sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(d.is_success());
    assert_eq!(d.final_level.as_deref(), Some("premium"));
    assert_eq!(d.attempts_by_level.get("balanced"), None);
    assert_eq!(d.total_attempts, 3);

    let skipped = sink.of_type("level_skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].level(), Some("balanced"));
}

#[tokio::test]
async fn test_assessment_gate_skips_non_terminal_level() {
    let registry = CapabilityRegistry::new()
        .with(
            "fast",
            Arc::new(ScriptedCapability::new(vec![success("x", 0.9)]).with_assessment(0.2)),
        )
        .with("balanced", scripted(vec![success("y", 0.9)]));
    let (orch, sink) = orchestrator(config("skip_below_assessment = 0.5"), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(d.is_success());
    assert_eq!(d.final_level.as_deref(), Some("balanced"));
    assert_eq!(d.attempts_by_level.get("fast"), None);
    match &sink.of_type("level_skipped")[0].kind {
        RoutingEventKind::LevelSkipped { reason, .. } => assert!(reason.contains("assessment")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_cost_budget_exceeded() {
    let registry = CapabilityRegistry::new()
        .with("fast", scripted(vec![failure("f1", "e1"), failure("f2", "e2")]));
    let (orch, _sink) = orchestrator(config("cost_budget = 1.5"), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;

    assert!(matches!(d.outcome, Outcome::BudgetExceeded { .. }), "{:?}", d.outcome);
    assert_eq!(d.total_attempts, 2);
    assert_eq!(d.total_cost, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancellation_ends_exhausted() {
    let registry = CapabilityRegistry::new().with("fast", scripted(vec![ScriptStep::Hang]));
    let (orch, _sink) = orchestrator(config(""), registry);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let d = orch
        .route_with_cancel(Request::new("task"), Some("fast"), token)
        .await;

    match &d.outcome {
        Outcome::Exhausted { reason } => assert_eq!(reason, "cancelled: caller"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(d.recent_errors.last().map(|e| e.raw()), Some("cancelled: caller"));
}

/// Never finishes assessing itself.
struct SlowToAssess;

#[async_trait]
impl TierCapability for SlowToAssess {
    async fn assess(&self, _request: &Request, _ctx: &AttemptContext) -> f64 {
        std::future::pending().await
    }

    async fn attempt(
        &self,
        _request: &Request,
        _ctx: &AttemptContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        Ok(CapabilityOutcome::success("unreachable", 0.9))
    }
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancellation_interrupts_assessment() {
    let registry = CapabilityRegistry::new()
        .with("fast", Arc::new(SlowToAssess))
        .with("balanced", scripted(vec![success("y", 0.9)]));
    let (orch, sink) = orchestrator(
        config("skip_below_assessment = 0.5\nattempt_timeout_secs = 60"),
        registry,
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let d = orch
        .route_with_cancel(Request::new("task"), Some("fast"), token)
        .await;

    match &d.outcome {
        Outcome::Exhausted { reason } => assert_eq!(reason, "cancelled by caller"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(d.total_attempts, 0);
    assert!(d.elapsed_ms < 60_000, "{}", d.elapsed_ms);
    assert!(sink.of_type("level_skipped").is_empty());
    assert!(sink.of_type("escalated").is_empty());
}

#[tokio::test]
async fn test_events_bracket_the_session() {
    let registry = CapabilityRegistry::new().with("fast", scripted(vec![success("hi", 0.9)]));
    let (orch, sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("say hi"), None).await;
    assert!(d.is_success());

    let events = sink.events();
    assert_eq!(events.first().map(|e| e.event_type()), Some("session_started"));
    assert_eq!(events.last().map(|e| e.event_type()), Some("session_finished"));
    assert!(events.iter().all(|e| e.session_id == d.session_id));
    assert_eq!(sink.of_type("state_changed").len(), d.transitions.len());
    assert_eq!(sink.of_type("attempt_recorded").len() as u32, d.total_attempts);
    assert_eq!(sink.of_type("entry_selected").len(), 1);
}

#[tokio::test]
async fn test_concurrent_sessions_share_one_orchestrator() {
    let registry = CapabilityRegistry::new().with("fast", scripted(vec![success("ok", 0.9)]));
    let orch = Arc::new(RoutingOrchestrator::new(config(""), registry).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.route(Request::new(format!("task {}", i)), Some("fast"))
                    .await
            })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let d = handle.await.unwrap();
        assert!(d.is_success());
        ids.insert(d.session_id);
    }
    assert_eq!(ids.len(), 8);

    let snapshot = orch.metrics().snapshot();
    assert_eq!(snapshot.sessions, 8);
    assert_eq!(snapshot.succeeded, 8);
    assert_eq!(snapshot.forced_entries, 8);
}

#[tokio::test]
async fn test_content_is_returned_verbatim() {
    let registry = CapabilityRegistry::new().with(
        "fast",
        scripted(vec![ScriptStep::Outcome(CapabilityOutcome::success(
            json!({"patch": "diff --git"}),
            0.95,
        ))]),
    );
    let (orch, _sink) = orchestrator(config(""), registry);

    let d = orch.route(Request::new("task"), Some("fast")).await;
    match d.outcome {
        Outcome::Success {
            content,
            level,
            confidence,
        } => {
            assert_eq!(content, json!({"patch": "diff --git"}));
            assert_eq!(level, "fast");
            assert_eq!(confidence, 0.95);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
