//! StatusStore - durable project status record in a human-readable file
//!
//! The status file doubles as the operator's dashboard and as the single
//! source of truth for the conductor's state machine.
//!
//! # File layout
//!
//! ```text
//! ---
//! state: executing
//! phase: 2
//! total_phases: 5
//! ...                      # structured header (YAML)
//! ---
//! # Project Status: ...    # readable body, regenerated on every write
//! ```
//!
//! Files written before the structured header existed are still readable:
//! [`legacy`] recovers the same fields from the body text.
//!
//! # Example
//!
//! ```ignore
//! use statusstore::{StatusStore, State};
//!
//! let store = StatusStore::new("STATUS.md");
//! let mut record = store.read().state;
//! record.state = State::Configured;
//! record.touch(chrono::Utc::now());
//! store.write(&record)?;
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod cli;
pub mod header;
pub mod legacy;
mod model;
pub mod render;
mod store;

pub use model::{DEFAULT_ACTIVITY, ProjectState, State, StateUpdate};
pub use store::{RecordSource, StatusRecord, StatusStore, parse};

/// Default status file name
pub const STATUS_FILE: &str = "STATUS.md";

/// Errors from status store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid status record: {0}")]
    Invalid(String),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render status header: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl StoreError {
    pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
