//! Conductor - supervise a long-running CLI tool and track its progress
//!
//! The project record lives in a human-readable status file (see the
//! `statusstore` crate). Conductor drives it through a fixed lifecycle:
//!
//! ```text
//! reset -> configured -> planning -> planned -> executing -> complete
//!                                               |     ^
//!                                               v     |
//!                                             questions
//! ```
//!
//! with `error` reachable from planning and executing, and `retry` returning
//! to wherever the error was raised.
//!
//! # Modules
//!
//! - [`machine`] - transition table and the StatusManager actor
//! - [`supervisor`] - single external process with exit signal and output capture
//! - [`timeout`] - stall and hard-timeout checks
//! - [`plan`] / [`questions`] - files the tool writes for the operator
//! - [`orchestrator`] - composition root tying it all together
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod machine;
pub mod orchestrator;
pub mod plan;
pub mod questions;
pub mod supervisor;
pub mod timeout;

pub use config::Config;
pub use machine::{Action, MachineError, StateMachine, StatusManager};
pub use orchestrator::{CancelOutcome, Conductor, RunKind, StatusView};
pub use supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorError, ToolCommand};
pub use timeout::{TimeoutConfig, TimeoutMonitor, TimeoutSnapshot};
