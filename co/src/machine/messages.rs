//! Status manager messages
//!
//! Commands and responses for the actor pattern.

use statusstore::{ProjectState, State, StateUpdate, StatusRecord, StoreError};
use thiserror::Error;
use tokio::sync::oneshot;

use super::transitions::Action;

/// Errors from state machine operations
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Invalid action '{action}' from state '{state}'. Valid actions: {valid:?}")]
    InvalidAction {
        action: Action,
        state: State,
        valid: Vec<Action>,
    },

    #[error("Unknown current state: {0}")]
    UnknownState(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

impl MachineError {
    /// True for the validation failures: illegal action or invalid state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MachineError::InvalidAction { .. }
                | MachineError::UnknownState(_)
                | MachineError::UnknownAction(_)
                | MachineError::Store(StoreError::Invalid(_))
                | MachineError::Store(StoreError::UnknownState(_))
        )
    }
}

/// Response from state machine operations
pub type MachineResponse<T> = Result<T, MachineError>;

/// Commands sent to the StatusManager actor
#[derive(Debug)]
pub enum StatusCommand {
    Read {
        reply: oneshot::Sender<StatusRecord>,
    },
    Write {
        state: Box<ProjectState>,
        reply: oneshot::Sender<MachineResponse<ProjectState>>,
    },
    Transition {
        action: Action,
        update: StateUpdate,
        reply: oneshot::Sender<MachineResponse<ProjectState>>,
    },
    SetState {
        state: State,
        update: StateUpdate,
        reply: oneshot::Sender<MachineResponse<ProjectState>>,
    },
    Update {
        update: StateUpdate,
        reply: oneshot::Sender<MachineResponse<ProjectState>>,
    },
    Shutdown,
}
