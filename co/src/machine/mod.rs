//! Project state machine with actor pattern
//!
//! StatusManager owns the StatusStore and processes commands via channels,
//! so every transition is validated against the table and persisted atomically.

mod manager;
mod messages;
mod transitions;

pub use manager::{StateMachine, StatusManager};
pub use messages::{MachineError, MachineResponse, StatusCommand};
pub use transitions::{Action, Target, actions, next};
