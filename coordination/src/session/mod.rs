//! Per-session values: the state machine and the terminal disposition.

pub mod disposition;
pub mod state_machine;

pub use disposition::{Disposition, Outcome};
pub use state_machine::{IllegalTransition, SessionState, SessionStateMachine, TransitionRecord};
