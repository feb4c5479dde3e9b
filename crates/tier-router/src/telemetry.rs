//! Tracing initialisation and event sinks for the binary.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tier_coordination::{FanoutSink, MemorySink, SharedEventSink, TracingSink};

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Structured logs plus an in-memory copy for the final report.
pub fn recording_sink() -> (SharedEventSink, Arc<MemorySink>) {
    let memory = Arc::new(MemorySink::new());
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(memory.clone());
    (Arc::new(sink), memory)
}
