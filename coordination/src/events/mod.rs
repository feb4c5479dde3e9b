//! Routing events
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Orchestrator │────▶│  EventSink   │────▶│ TracingSink  │
//! │    (emit)    │     │              │────▶│ EventBus     │──▶ subscribers
//! └──────────────┘     └──────────────┘────▶│ MemorySink   │──▶ tests / replay
//!                                           └──────────────┘
//! ```
//!
//! The core persists nothing; sinks decide what to keep.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, EventSink, FanoutSink, MemorySink, SharedEventSink, TracingSink};
pub use types::{RoutingEvent, RoutingEventKind};
