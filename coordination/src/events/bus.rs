//! Event sinks for routing events
//!
//! The orchestrator emits to one injected `EventSink`. Provided sinks:
//! structured `tracing` output, a tokio broadcast bus for live subscribers,
//! an in-memory collector for tests and replay, and a fan-out combinator.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{RoutingEvent, RoutingEventKind};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Destination for routing events. Emission must never fail the session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RoutingEvent);
}

/// Shared reference to a sink
pub type SharedEventSink = Arc<dyn EventSink>;

/// Writes each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RoutingEvent) {
        let sid = event.session_id.as_str();
        match &event.kind {
            RoutingEventKind::SessionStarted {
                request_id,
                task_preview,
            } => info!(session_id = sid, request_id, task = %task_preview, "Routing session started"),
            RoutingEventKind::ClassifierFallback { error } => {
                debug!(session_id = sid, error = %error, "Entry chosen by keyword heuristic")
            }
            RoutingEventKind::EntrySelected {
                level,
                source,
                confidence,
                ..
            } => info!(session_id = sid, level, source = %source, confidence, "Entry level selected"),
            RoutingEventKind::StateChanged {
                from,
                to,
                iteration,
                reason,
                ..
            } => debug!(
                session_id = sid,
                from = %from,
                to = %to,
                iteration,
                reason = reason.as_deref().unwrap_or(""),
                "Session state changed"
            ),
            RoutingEventKind::AttemptRecorded {
                level,
                iteration,
                success,
                confidence,
                cost,
                error,
                ..
            } => info!(
                session_id = sid,
                level,
                iteration,
                success,
                confidence,
                cost,
                error = error.as_deref().unwrap_or(""),
                "Attempt recorded"
            ),
            RoutingEventKind::LevelSkipped { level, reason } => {
                warn!(session_id = sid, level, reason = %reason, "Level skipped")
            }
            RoutingEventKind::VerdictReached {
                level,
                iteration,
                verdict,
                recommendation,
                confidence,
                evidence,
            } => info!(
                session_id = sid,
                level,
                iteration,
                verdict = %verdict,
                recommendation = ?recommendation,
                confidence,
                evidence = ?evidence,
                "Stagnation verdict"
            ),
            RoutingEventKind::Escalated {
                from_level,
                to_level,
                reason,
                attempts_so_far,
            } => warn!(
                session_id = sid,
                from = %from_level,
                to = %to_level,
                attempts_so_far,
                reason = %reason,
                "Escalating"
            ),
            RoutingEventKind::SessionFinished {
                state,
                summary,
                total_attempts,
                total_cost,
                elapsed_ms,
            } => info!(
                session_id = sid,
                state = %state,
                total_attempts,
                total_cost,
                elapsed_ms,
                "Routing session finished: {}",
                summary
            ),
        }
    }
}

/// Tokio broadcast fan-out to live subscribers.
pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &RoutingEvent) {
        let event_type = event.event_type();
        // No receivers is OK
        match self.sender.send(event.clone()) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }
}

/// Collects events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RoutingEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<RoutingEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<RoutingEvent> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Events matching `filter`, in emission order.
    pub fn filtered(&self, filter: &EventFilter) -> Vec<RoutingEvent> {
        self.guard()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<RoutingEvent> {
        self.filtered(&EventFilter::new().types(vec![event_type]))
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RoutingEvent) {
        self.guard().push(event.clone());
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<SharedEventSink>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedEventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &RoutingEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Event filter for selective reads
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &RoutingEvent) -> bool {
        if let Some(ref sid) = self.session_id {
            if &event.session_id != sid {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        true
    }
}
