//! Execution-loop orchestrator
//!
//! Drives one routing session per `route` call:
//!
//! ```text
//! Selecting ──► Attempting ──success──────────────► Succeeded
//!                  │   ▲  └─skip (no capability)──► Escalating
//!                  ▼   │
//!              Detecting ──no loop──► Continuing ──► Attempting
//!                  │
//!                  ├─loop / requested / level spent ──► Escalating ──► Attempting (L+1)
//!                  └─stop / cost budget / terminal   ──► Exhausted | TimedOut | BudgetExceeded
//! ```
//!
//! The orchestrator keeps only immutable configuration between sessions.
//! Each session owns its ledger and state machine; nothing is shared across
//! sessions except the atomic metrics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tier_coordination::{
    AttemptDraft, AttemptLedger, CapabilityLevel, ConfigError, Disposition, EntrySelector,
    ErrorSignature, EscalationContext, EscalationHierarchy, EscalationReason,
    EscalationTrigger, Fingerprint, IllegalTransition, LedgerError, Outcome, Recommendation,
    Request, RouterConfig, RoutingEvent, RoutingEventKind, RoutingMetrics, SessionState,
    SessionStateMachine, SharedEventSink, StagnationDetector, StagnationKind, TracingSink,
};

use crate::capability::{
    AttemptContext, CapabilityError, CapabilityOutcome, CapabilityRegistry, TierCapability,
};
use crate::classification::{ClassifierBackend, RequestRouter};

/// How one bounded attempt ended.
enum AttemptRun {
    Completed(Result<CapabilityOutcome, CapabilityError>),
    /// The per-attempt timeout fired first.
    TimedOut(Duration),
    /// The session deadline fired first.
    SessionDeadline,
    CallerCancelled,
}

/// Internal invariant violations. Mapped to `Exhausted`, never raised.
#[derive(Debug, Error)]
enum SessionFault {
    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Routes requests through the escalation hierarchy.
///
/// `Send + Sync`; share it behind an `Arc` and call `route` concurrently.
pub struct RoutingOrchestrator {
    config: Arc<RouterConfig>,
    hierarchy: Arc<EscalationHierarchy>,
    registry: CapabilityRegistry,
    router: RequestRouter,
    detector: StagnationDetector,
    sink: SharedEventSink,
    metrics: Arc<RoutingMetrics>,
}

impl RoutingOrchestrator {
    /// Validate `config` and build an orchestrator over `registry`.
    pub fn new(config: RouterConfig, registry: CapabilityRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let hierarchy = config.hierarchy()?;
        let table = config.complexity_table_for(&hierarchy)?;
        let router = RequestRouter::new(
            EntrySelector::new(&hierarchy, table),
            config.classifier_timeout(),
        );
        let detector = StagnationDetector::new(config.detector_config());

        for level in hierarchy.levels() {
            if !registry.contains(&level.name) {
                warn!(level = %level.name, "No capability registered, level will be skipped");
            }
        }

        Ok(Self {
            config: Arc::new(config),
            hierarchy: Arc::new(hierarchy),
            registry,
            router,
            detector,
            sink: Arc::new(TracingSink),
            metrics: Arc::new(RoutingMetrics::new()),
        })
    }

    pub fn with_classifier(mut self, backend: Arc<dyn ClassifierBackend>) -> Self {
        self.router = self.router.with_backend(backend);
        self
    }

    /// Replace the default `TracingSink`.
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Share counters with another component (e.g. several orchestrators).
    pub fn with_metrics(mut self, metrics: Arc<RoutingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &EscalationHierarchy {
        &self.hierarchy
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    /// Route one request to a disposition.
    pub async fn route(&self, request: Request, forced_level: Option<&str>) -> Disposition {
        self.route_with_cancel(request, forced_level, CancellationToken::new())
            .await
    }

    /// Like [`route`](Self::route), ending `Exhausted` with a
    /// `cancelled: caller` attempt when `cancel` fires mid-attempt.
    pub async fn route_with_cancel(
        &self,
        request: Request,
        forced_level: Option<&str>,
        cancel: CancellationToken,
    ) -> Disposition {
        Session::new(self, request, cancel).run(forced_level).await
    }
}

/// Per-session state, dropped once the disposition is produced.
struct Session<'a> {
    orch: &'a RoutingOrchestrator,
    request: Request,
    session_id: String,
    ledger: AttemptLedger,
    sm: SessionStateMachine,
    started: Instant,
    deadline: Instant,
    caller: CancellationToken,
    token: CancellationToken,
    level: Option<usize>,
    escalation: Option<Arc<EscalationContext>>,
    assessed: HashSet<usize>,
}

impl<'a> Session<'a> {
    fn new(orch: &'a RoutingOrchestrator, request: Request, caller: CancellationToken) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let token = caller.child_token();
        Self {
            ledger: AttemptLedger::new(session_id.clone(), orch.config.ledger_capacity),
            sm: SessionStateMachine::new(session_id.clone()),
            deadline: started + orch.config.session_timeout(),
            orch,
            request,
            session_id,
            started,
            caller,
            token,
            level: None,
            escalation: None,
            assessed: HashSet::new(),
        }
    }

    async fn run(mut self, forced_level: Option<&str>) -> Disposition {
        self.orch.metrics.record_session_started();
        self.emit(RoutingEventKind::SessionStarted {
            request_id: self.request.id.clone(),
            task_preview: self.request.preview(80),
        });

        let outcome = match self.drive(forced_level).await {
            Ok(outcome) => outcome,
            Err(fault) => {
                error!(session_id = %self.session_id, error = %fault, "Routing session aborted");
                Outcome::Exhausted {
                    reason: format!("internal error: {}", fault),
                }
            }
        };
        self.finish(outcome)
    }

    /// Run the loop until a terminal outcome is known. The terminal
    /// transition itself is applied by `finish`.
    async fn drive(&mut self, forced_level: Option<&str>) -> Result<Outcome, SessionFault> {
        let selection = match self.orch.router.select(&self.request, forced_level).await {
            Ok(selection) => selection,
            Err(unknown) => {
                return Ok(Outcome::Exhausted {
                    reason: unknown.to_string(),
                })
            }
        };
        if let Some(cause) = &selection.fallback_cause {
            self.emit(RoutingEventKind::ClassifierFallback {
                error: cause.to_string(),
            });
        }
        let decision = selection.decision;
        self.orch.metrics.record_entry(decision.source);
        self.orch
            .sink
            .emit(&RoutingEvent::entry_selected(&self.session_id, &decision));

        self.enter_level(decision.level_index);
        self.go(
            SessionState::Attempting,
            Some(&format!("entry at {} ({})", decision.level, decision.source)),
        )?;

        loop {
            let index = self.current_index();
            let level = self.orch.hierarchy.levels()[index].clone();

            if self.caller.is_cancelled() {
                return Ok(Outcome::Exhausted {
                    reason: "cancelled by caller".to_string(),
                });
            }
            if Instant::now() >= self.deadline {
                return Ok(Outcome::TimedOut {
                    reason: format!(
                        "session deadline of {}s reached",
                        self.orch.config.session_timeout_secs
                    ),
                });
            }

            let capability = match self.resolve_capability(index, &level).await {
                Ok(capability) => capability,
                Err(reason) => {
                    if self.caller.is_cancelled() {
                        return Ok(Outcome::Exhausted {
                            reason: "cancelled by caller".to_string(),
                        });
                    }
                    self.orch.metrics.record_skip();
                    self.emit(RoutingEventKind::LevelSkipped {
                        level: level.name.clone(),
                        reason: reason.to_string(),
                    });
                    match self.skip(index, &level, reason)? {
                        Some(outcome) => return Ok(outcome),
                        None => continue,
                    }
                }
            };

            let iteration = self.ledger.total_attempts() + 1;
            self.sm.set_iteration(iteration);
            let ctx = self.attempt_context(&level);
            let run = self.run_attempt(capability.as_ref(), &ctx).await;
            let caller_cancelled = matches!(run, AttemptRun::CallerCancelled);

            let (draft, completed) = self.draft(index, &level, run);
            let (event, cost) = {
                let attempt = self.ledger.append(draft)?;
                (
                    RoutingEvent::attempt_recorded(&self.session_id, attempt),
                    attempt.cost,
                )
            };
            self.orch.metrics.record_attempt(cost);
            self.orch.sink.emit(&event);

            if caller_cancelled {
                return Ok(Outcome::Exhausted {
                    reason: "cancelled: caller".to_string(),
                });
            }

            let trigger = match &completed {
                Some(out) => {
                    match self.orch.hierarchy.escalation_trigger(
                        index,
                        &out.assessment(),
                        self.escalation.is_some(),
                    ) {
                        None => {
                            return Ok(Outcome::Success {
                                content: out.content.clone(),
                                level: level.name.clone(),
                                confidence: self
                                    .orch
                                    .hierarchy
                                    .effective_confidence(out.confidence, self.escalation.is_some()),
                            })
                        }
                        Some(trigger) => trigger,
                    }
                }
                None => EscalationTrigger::Failed {
                    reason: self
                        .ledger
                        .last()
                        .and_then(|a| a.error.as_ref())
                        .map(|e| e.raw().to_string()),
                },
            };

            self.go(SessionState::Detecting, Some(&trigger.to_string()))?;
            let verdict = self.orch.detector.detect(&self.ledger, self.started.elapsed());
            self.orch.metrics.record_verdict(verdict.kind);
            self.orch.sink.emit(&RoutingEvent::verdict_reached(
                &self.session_id,
                &level.name,
                iteration,
                &verdict,
            ));

            if verdict.recommendation() == Recommendation::Stop {
                let reason = verdict.evidence.join("; ");
                return Ok(match verdict.kind {
                    StagnationKind::Timeout => Outcome::TimedOut { reason },
                    _ => Outcome::Exhausted { reason },
                });
            }

            if let Some(budget) = self.orch.config.cost_budget {
                let spent = self.ledger.total_cost();
                if spent > budget {
                    return Ok(Outcome::BudgetExceeded {
                        reason: format!("accumulated cost {:.3} exceeds budget {:.3}", spent, budget),
                    });
                }
            }

            let at_level = self.ledger.attempts_at(&level.name);
            let escalation = if let EscalationTrigger::Requested { reason } = &trigger {
                Some(EscalationReason::Requested {
                    reason: reason.clone(),
                })
            } else if let Some(reason) = verdict.escalation_reason.clone() {
                Some(reason)
            } else if at_level >= level.max_attempts {
                Some(EscalationReason::LevelBudgetExhausted {
                    level: level.name.clone(),
                    attempts: at_level,
                })
            } else {
                None
            };

            match escalation {
                Some(reason) => {
                    if let Some(outcome) = self.escalate(index, &level, reason)? {
                        return Ok(outcome);
                    }
                }
                None => {
                    self.go(SessionState::Continuing, Some("no loop detected"))?;
                    self.go(
                        SessionState::Attempting,
                        Some(&format!("retry {} of {}", at_level + 1, level.max_attempts)),
                    )?;
                }
            }
        }
    }

    /// Capability for `level`, or the reason to skip it.
    async fn resolve_capability(
        &mut self,
        index: usize,
        level: &CapabilityLevel,
    ) -> Result<Arc<dyn TierCapability>, EscalationReason> {
        let capability =
            self.orch
                .registry
                .get(&level.name)
                .ok_or_else(|| EscalationReason::Unregistered {
                    level: level.name.clone(),
                })?;

        let gate = self.orch.config.skip_below_assessment;
        if gate > 0.0 && !self.orch.hierarchy.is_terminal(index) && self.assessed.insert(index) {
            let ctx = self.attempt_context(level);
            let bound = self.attempt_deadline();
            // A hung, cancelled or non-finite assessment counts as no confidence.
            let assessment = tokio::select! {
                biased;
                _ = self.caller.cancelled() => 0.0,
                result = tokio::time::timeout_at(bound, capability.assess(&self.request, &ctx)) => {
                    match result {
                        Ok(value) if value.is_finite() => value.clamp(0.0, 1.0),
                        _ => 0.0,
                    }
                }
            };
            debug!(
                session_id = %self.session_id,
                level = %level.name,
                assessment,
                gate,
                "Level assessed"
            );
            if assessment < gate {
                return Err(EscalationReason::LowAssessment {
                    level: level.name.clone(),
                    assessment,
                });
            }
        }
        Ok(capability)
    }

    /// Hand off to the next level, or produce `Exhausted` at the terminal one.
    fn escalate(
        &mut self,
        index: usize,
        level: &CapabilityLevel,
        reason: EscalationReason,
    ) -> Result<Option<Outcome>, SessionFault> {
        let Some(next) = self.orch.hierarchy.next(index) else {
            return Ok(Some(Outcome::Exhausted {
                reason: format!("{} at terminal level {}", reason, level.name),
            }));
        };
        let to_level = self.orch.hierarchy.levels()[next].name.clone();
        let context = EscalationContext::from_ledger(
            &self.request,
            &self.ledger,
            &level.name,
            &to_level,
            self.orch.config.recent_error_count,
            reason,
        );
        let reason = context.reason.to_string();
        self.hand_off(level, next, reason, context)?;
        Ok(None)
    }

    /// Pass over `level` without attempting it.
    ///
    /// The context from the last level that attempted is carried forward
    /// with only its destination changed. Before any attempt, the skipped
    /// level itself is recorded as the origin.
    fn skip(
        &mut self,
        index: usize,
        level: &CapabilityLevel,
        reason: EscalationReason,
    ) -> Result<Option<Outcome>, SessionFault> {
        let Some(next) = self.orch.hierarchy.next(index) else {
            return Ok(Some(Outcome::Exhausted {
                reason: format!("{} at terminal level {}", reason, level.name),
            }));
        };
        let to_level = self.orch.hierarchy.levels()[next].name.clone();
        let context = match &self.escalation {
            Some(prior) => prior.retargeted(&to_level),
            None => EscalationContext::from_ledger(
                &self.request,
                &self.ledger,
                &level.name,
                &to_level,
                self.orch.config.recent_error_count,
                reason.clone(),
            ),
        };
        self.hand_off(level, next, reason.to_string(), context)?;
        Ok(None)
    }

    /// Move from `level` to `next`, handing `context` to every later attempt.
    fn hand_off(
        &mut self,
        level: &CapabilityLevel,
        next: usize,
        reason: String,
        context: EscalationContext,
    ) -> Result<(), SessionFault> {
        self.go(SessionState::Escalating, Some(&reason))?;
        self.orch.metrics.record_escalation();
        self.emit(RoutingEventKind::Escalated {
            from_level: level.name.clone(),
            to_level: context.to_level.clone(),
            reason,
            attempts_so_far: context.attempts_so_far,
        });

        let to_level = context.to_level.clone();
        self.escalation = Some(Arc::new(context));
        self.enter_level(next);
        self.go(
            SessionState::Attempting,
            Some(&format!("escalated to {}", to_level)),
        )?;
        Ok(())
    }

    /// Run one attempt bounded by `min(attempt_timeout, session deadline)`
    /// and caller cancellation.
    async fn run_attempt(&self, capability: &dyn TierCapability, ctx: &AttemptContext) -> AttemptRun {
        let deadline = self.attempt_deadline();
        let session_bound = deadline >= self.deadline;
        let mut attempt = capability.attempt(&self.request, ctx);

        let cause = tokio::select! {
            biased;
            result = &mut attempt => return AttemptRun::Completed(result),
            _ = self.caller.cancelled() => AttemptRun::CallerCancelled,
            _ = tokio::time::sleep_until(deadline) => {
                if session_bound {
                    AttemptRun::SessionDeadline
                } else {
                    AttemptRun::TimedOut(self.orch.config.attempt_timeout())
                }
            }
        };

        ctx.cancel.cancel();
        let grace = self.orch.config.cancel_grace();
        match tokio::time::timeout(grace, &mut attempt).await {
            Ok(_) => debug!(
                session_id = %self.session_id,
                level = %ctx.level.name,
                "Capability returned within cancellation grace"
            ),
            Err(_) => debug!(
                session_id = %self.session_id,
                level = %ctx.level.name,
                grace_ms = grace.as_millis() as u64,
                "Capability dropped after cancellation grace"
            ),
        }
        cause
    }

    /// Turn an attempt run into a ledger draft. Returns the capability's
    /// outcome when it completed without error.
    fn draft(
        &self,
        index: usize,
        level: &CapabilityLevel,
        run: AttemptRun,
    ) -> (AttemptDraft, Option<CapabilityOutcome>) {
        let failed = |signature: ErrorSignature| -> (AttemptDraft, Option<CapabilityOutcome>) {
            (
                AttemptDraft::failed(level.name.clone(), index, signature).with_cost(level.cost_weight),
                None,
            )
        };

        match run {
            AttemptRun::Completed(Ok(outcome)) => {
                let error = (!outcome.success).then(|| {
                    ErrorSignature::new(
                        outcome
                            .reason
                            .clone()
                            .unwrap_or_else(|| "attempt failed".to_string()),
                    )
                });
                // Capabilities that do not meter themselves are charged the level weight.
                let cost = if outcome.cost.is_finite() && outcome.cost > 0.0 {
                    outcome.cost
                } else {
                    level.cost_weight
                };
                let draft = AttemptDraft {
                    level: level.name.clone(),
                    level_index: index,
                    fingerprint: Fingerprint::of_content(&outcome.content),
                    error,
                    success: outcome.success,
                    confidence: self
                        .orch
                        .hierarchy
                        .effective_confidence(outcome.confidence, self.escalation.is_some()),
                    cost,
                };
                (draft, Some(outcome))
            }
            AttemptRun::Completed(Err(err)) => {
                warn!(
                    session_id = %self.session_id,
                    level = %level.name,
                    error = %err,
                    "Capability raised an error"
                );
                failed(ErrorSignature::internal_exception(&err))
            }
            AttemptRun::TimedOut(limit) => failed(ErrorSignature::new(format!(
                "attempt timed out after {}s",
                limit.as_secs()
            ))),
            AttemptRun::SessionDeadline => failed(ErrorSignature::cancelled_timeout()),
            AttemptRun::CallerCancelled => failed(ErrorSignature::cancelled_caller()),
        }
    }

    fn finish(mut self, outcome: Outcome) -> Disposition {
        let reason = outcome.reason().map(str::to_string);
        let outcome = match self.go(outcome.state(), reason.as_deref()) {
            Ok(()) => outcome,
            Err(illegal) => {
                error!(session_id = %self.session_id, error = %illegal, "Terminal transition rejected");
                let reason = illegal.to_string();
                if !self.sm.is_terminal() {
                    let _ = self.go(SessionState::Exhausted, Some(&reason));
                }
                Outcome::Exhausted { reason }
            }
        };

        self.token.cancel();
        self.ledger.seal();
        // Skipped levels never count as the level the session worked at.
        let final_level = self.ledger.last().map(|a| a.level.clone());
        let disposition = Disposition::from_ledger(
            &self.request.id,
            &self.ledger,
            outcome,
            final_level,
            self.orch.config.recent_error_count,
            self.started.elapsed().as_millis() as u64,
            self.sm.transitions().to_vec(),
        );

        self.orch.metrics.record_outcome(&disposition.outcome);
        self.emit(RoutingEventKind::SessionFinished {
            state: disposition.outcome.state(),
            summary: disposition.summary(),
            total_attempts: disposition.total_attempts,
            total_cost: disposition.total_cost,
            elapsed_ms: disposition.elapsed_ms,
        });
        disposition
    }

    /// Advance the state machine and emit the transition.
    fn go(&mut self, to: SessionState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        let record = self.sm.advance(to, reason)?.clone();
        self.emit(RoutingEventKind::StateChanged {
            from: record.from,
            to: record.to,
            level: record.level,
            iteration: record.iteration,
            reason: record.reason,
        });
        Ok(())
    }

    fn emit(&self, kind: RoutingEventKind) {
        self.orch
            .sink
            .emit(&RoutingEvent::new(self.session_id.clone(), kind));
    }

    fn enter_level(&mut self, index: usize) {
        self.level = Some(index);
        if let Some(level) = self.orch.hierarchy.level(index) {
            self.sm.set_level(level.name.clone());
        }
    }

    fn current_index(&self) -> usize {
        self.level.unwrap_or(0)
    }

    fn attempt_deadline(&self) -> Instant {
        (Instant::now() + self.orch.config.attempt_timeout()).min(self.deadline)
    }

    fn attempt_context(&self, level: &CapabilityLevel) -> AttemptContext {
        AttemptContext {
            session_id: Arc::from(self.session_id.as_str()),
            level: level.clone(),
            iteration: self.ledger.total_attempts() + 1,
            level_iteration: self.ledger.attempts_at(&level.name) + 1,
            escalation: self.escalation.clone(),
            cancel: self.token.child_token(),
        }
    }
}
