//! Regression tests for stagnation patterns
//!
//! Validates that the detector flags exact repeats, repeated errors and
//! oscillation exactly at their thresholds, honours the priority order, and
//! stays a pure function of the ledger.

use std::time::Duration;
use tier_coordination::escalation::{
    DetectionScope, DetectorConfig, EscalationContext, EscalationReason, Recommendation,
    StagnationDetector, StagnationKind,
};
use tier_coordination::ledger::{AttemptDraft, AttemptLedger, ErrorSignature, Fingerprint};
use tier_coordination::Request;

fn attempt(level: &str, idx: usize, content: Option<&str>, error: Option<&str>) -> AttemptDraft {
    AttemptDraft {
        level: level.to_string(),
        level_index: idx,
        fingerprint: content.map(|c| Fingerprint::of_bytes(c.as_bytes())),
        error: error.map(ErrorSignature::new),
        success: false,
        confidence: 0.2,
        cost: 1.0,
    }
}

fn detector(k: usize) -> StagnationDetector {
    StagnationDetector::new(DetectorConfig {
        error_repeat_window: k,
        ..Default::default()
    })
}

#[test]
fn test_exact_repeat_short_circuits_regardless_of_errors() {
    let mut ledger = AttemptLedger::new("exact", 100);
    ledger
        .append(attempt("fast", 0, Some("F1"), Some("missing import X")))
        .unwrap();
    ledger
        .append(attempt("fast", 0, Some("F1"), Some("completely different")))
        .unwrap();

    let v = detector(3).detect(&ledger, Duration::from_secs(1));
    assert_eq!(v.kind, StagnationKind::ExactRepeat);
    assert_eq!(v.confidence, 1.0);
    assert_eq!(v.recommendation(), Recommendation::Escalate);
}

#[test]
fn test_repeated_error_k_minus_one_then_different_does_not_trigger() {
    let mut ledger = AttemptLedger::new("k-1", 100);
    ledger.append(attempt("fast", 0, Some("a"), Some("E"))).unwrap();
    ledger.append(attempt("fast", 0, Some("b"), Some("E"))).unwrap();
    ledger.append(attempt("fast", 0, Some("c"), Some("F"))).unwrap();

    let v = detector(3).detect(&ledger, Duration::ZERO);
    assert_eq!(v.kind, StagnationKind::NoLoop, "E, E, F must not trigger K=3");
}

#[test]
fn test_repeated_error_matches_after_normalization() {
    let mut ledger = AttemptLedger::new("norm", 100);
    ledger
        .append(attempt(
            "fast",
            0,
            Some("a"),
            Some("Missing import X at /home/a/src/lib.rs:12:4"),
        ))
        .unwrap();
    ledger
        .append(attempt(
            "fast",
            0,
            Some("b"),
            Some("missing   import x at /tmp/other/lib.rs:80"),
        ))
        .unwrap();

    let v = detector(2).detect(&ledger, Duration::ZERO);
    assert_eq!(v.kind, StagnationKind::RepeatedError);
    match v.escalation_reason {
        Some(EscalationReason::RepeatedError { signature, count }) => {
            assert_eq!(signature, "missing import x at <path>");
            assert_eq!(count, 2);
        }
        other => panic!("unexpected reason {:?}", other),
    }
}

#[test]
fn test_successful_attempts_break_the_error_run() {
    let mut ledger = AttemptLedger::new("success-break", 100);
    ledger.append(attempt("fast", 0, Some("a"), Some("E"))).unwrap();
    let mut ok = attempt("fast", 0, Some("b"), Some("E"));
    ok.success = true;
    ledger.append(ok).unwrap();

    assert_eq!(detector(2).detect(&ledger, Duration::ZERO).kind, StagnationKind::NoLoop);
}

#[test]
fn test_oscillation_requires_strict_abab() {
    let mut ledger = AttemptLedger::new("abab", 100);
    for content in ["A", "B", "A"] {
        ledger.append(attempt("fast", 0, Some(content), None)).unwrap();
    }
    assert_eq!(detector(3).detect(&ledger, Duration::ZERO).kind, StagnationKind::NoLoop);

    ledger.append(attempt("fast", 0, Some("C"), None)).unwrap();
    assert_eq!(detector(3).detect(&ledger, Duration::ZERO).kind, StagnationKind::NoLoop);

    let mut ledger = AttemptLedger::new("abab-2", 100);
    for content in ["A", "B", "A", "B"] {
        ledger.append(attempt("fast", 0, Some(content), None)).unwrap();
    }
    let v = detector(3).detect(&ledger, Duration::ZERO);
    assert_eq!(v.kind, StagnationKind::Oscillation);
    assert_eq!(v.evidence.len(), 4);
}

#[test]
fn test_missing_fingerprints_never_match() {
    let mut ledger = AttemptLedger::new("none", 100);
    ledger.append(attempt("fast", 0, None, Some("x"))).unwrap();
    ledger.append(attempt("fast", 0, None, Some("y"))).unwrap();
    assert_eq!(detector(3).detect(&ledger, Duration::ZERO).kind, StagnationKind::NoLoop);
}

#[test]
fn test_priority_timeout_then_budget_then_patterns() {
    let mut ledger = AttemptLedger::new("prio", 100);
    ledger.append(attempt("fast", 0, Some("F"), Some("E"))).unwrap();
    ledger.append(attempt("fast", 0, Some("F"), Some("E"))).unwrap();

    let d = StagnationDetector::new(DetectorConfig {
        session_timeout: Duration::from_secs(10),
        max_total_attempts: 2,
        error_repeat_window: 2,
        scope: DetectionScope::CurrentLevel,
    });
    assert_eq!(d.detect(&ledger, Duration::from_secs(11)).kind, StagnationKind::Timeout);
    assert_eq!(
        d.detect(&ledger, Duration::from_secs(1)).kind,
        StagnationKind::AttemptBudgetExhausted
    );
}

#[test]
fn test_detection_is_pure() {
    let mut ledger = AttemptLedger::new("pure", 100);
    for content in ["A", "B", "A", "B"] {
        ledger.append(attempt("fast", 0, Some(content), Some("E"))).unwrap();
    }
    let d = detector(5);
    let first = d.detect(&ledger, Duration::from_secs(3));
    let second = d.detect(&ledger, Duration::from_secs(3));
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.evidence, second.evidence);
    assert_eq!(ledger.total_attempts(), 4);
}

#[test]
fn test_escalation_context_after_repeated_error() {
    let request = Request::new("wire up the config loader");
    let mut ledger = AttemptLedger::new("ctx", 100);
    ledger
        .append(attempt("fast", 0, Some("a"), Some("missing import X")))
        .unwrap();
    ledger
        .append(attempt("fast", 0, Some("b"), Some("missing import X")))
        .unwrap();

    let verdict = detector(2).detect(&ledger, Duration::ZERO);
    let reason = verdict.escalation_reason.expect("loop verdict carries a reason");
    let ctx = EscalationContext::from_ledger(&request, &ledger, "fast", "balanced", 3, reason);

    assert_eq!(ctx.recent_errors.len(), 2);
    assert_eq!(ctx.attempts_at_previous_level, 2);
    assert!(ctx.briefing().contains("missing import X"));
}
