//! StatusManager - actor that owns the StatusStore
//!
//! Every read, write and transition is a command processed by one task, so
//! concurrent callers serialize in arrival order and never interleave a
//! read-modify-write cycle.

use chrono::Utc;
use statusstore::{DEFAULT_ACTIVITY, ProjectState, State, StateUpdate, StatusRecord, StatusStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{MachineError, MachineResponse, StatusCommand};
use super::transitions::{self, Action, Target};

/// State machine over the persisted record
///
/// Synchronous core used by the actor; also usable directly where a single
/// owner is already guaranteed.
#[derive(Debug)]
pub struct StateMachine {
    store: StatusStore,
}

impl StateMachine {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn read(&self) -> StatusRecord {
        self.store.read()
    }

    /// Persist `state` as given, refreshing `last_updated`
    pub fn write(&mut self, mut state: ProjectState) -> MachineResponse<ProjectState> {
        let previous = self.store.read().state.last_updated;
        state.last_updated = state.last_updated.max(previous);
        state.touch(Utc::now());
        self.store.write(&state)?;
        Ok(state)
    }

    /// Apply `action` to the current record
    pub fn transition(&mut self, action: Action, update: StateUpdate) -> MachineResponse<ProjectState> {
        debug!(%action, "StateMachine::transition: called");
        let record = self.store.read();
        if let Some(raw) = record.unrecognized_state {
            debug!(%raw, "StateMachine::transition: stored state is not valid");
            return Err(MachineError::UnknownState(raw));
        }

        let current = record.state.state;
        let target = transitions::next(current, action).ok_or_else(|| MachineError::InvalidAction {
            action,
            state: current,
            valid: transitions::actions(current),
        })?;

        let mut state = record.state;
        let next = match target {
            Target::To(next) => next,
            Target::Previous => state.previous_state.unwrap_or(State::Reset),
        };

        state.state = next;
        if current == State::Error && next != State::Error {
            state.error = None;
        }
        update.apply(&mut state);
        state.previous_state = (next == State::Error).then_some(current);
        state.touch(Utc::now());

        self.store.write(&state)?;
        info!(from = %current, %action, to = %next, "State transition");
        Ok(state)
    }

    /// Write `new_state` directly, bypassing the transition table
    ///
    /// For bootstrapping and recovery only.
    pub fn set_state(&mut self, new_state: State, update: StateUpdate) -> MachineResponse<ProjectState> {
        debug!(%new_state, "StateMachine::set_state: called");
        let record = self.store.read();
        let leaving = record.unrecognized_state.is_none().then_some(record.state.state);
        let mut state = record.state;

        state.state = new_state;
        update.apply(&mut state);
        state.previous_state = match (new_state, leaving) {
            (State::Error, Some(current)) if current != State::Error => Some(current),
            (State::Error, _) => state.previous_state,
            _ => None,
        };
        state.touch(Utc::now());

        self.store.write(&state)?;
        if let Some(raw) = &record.unrecognized_state {
            warn!(%raw, %new_state, "Recovered status record from unrecognized state");
        }
        info!(to = %new_state, "State set directly");
        Ok(state)
    }

    /// Merge `update` without changing the state
    pub fn update(&mut self, update: StateUpdate) -> MachineResponse<ProjectState> {
        debug!(?update, "StateMachine::update: called");
        let record = self.store.read();
        if let Some(raw) = record.unrecognized_state {
            return Err(MachineError::UnknownState(raw));
        }
        let mut state = record.state;
        update.apply(&mut state);
        state.touch(Utc::now());
        self.store.write(&state)?;
        Ok(state)
    }
}

/// Handle to send commands to the StatusManager actor
#[derive(Clone)]
pub struct StatusManager {
    tx: mpsc::Sender<StatusCommand>,
}

impl StatusManager {
    /// Spawn a new StatusManager actor owning `store`
    pub fn spawn(store: StatusStore) -> Self {
        debug!(path = ?store.path(), "StatusManager::spawn: called");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(StateMachine::new(store), rx));
        info!("StatusManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<MachineResponse<T>>) -> StatusCommand,
    ) -> MachineResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| MachineError::ChannelError)?;
        reply_rx.await.map_err(|_| MachineError::ChannelError)?
    }

    /// Read the current record
    pub async fn read(&self) -> MachineResponse<StatusRecord> {
        debug!("read: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatusCommand::Read { reply: reply_tx })
            .await
            .map_err(|_| MachineError::ChannelError)?;
        reply_rx.await.map_err(|_| MachineError::ChannelError)
    }

    /// Overwrite the whole record
    pub async fn write(&self, state: ProjectState) -> MachineResponse<ProjectState> {
        debug!(state = %state.state, "write: called");
        self.request(|reply| StatusCommand::Write {
            state: Box::new(state),
            reply,
        })
        .await
    }

    /// Apply a transition-table action
    pub async fn transition(&self, action: Action, update: StateUpdate) -> MachineResponse<ProjectState> {
        debug!(%action, "transition: called");
        self.request(|reply| StatusCommand::Transition { action, update, reply })
            .await
    }

    /// Write a state directly, bypassing edge validation
    pub async fn set_state(&self, state: State, update: StateUpdate) -> MachineResponse<ProjectState> {
        debug!(%state, "set_state: called");
        self.request(|reply| StatusCommand::SetState { state, update, reply })
            .await
    }

    /// Merge fields without changing the state
    pub async fn update(&self, update: StateUpdate) -> MachineResponse<ProjectState> {
        self.request(|reply| StatusCommand::Update { update, reply }).await
    }

    /// Update phase progress without changing the state
    pub async fn update_phase(&self, phase: u32, total: u32, name: Option<String>) -> MachineResponse<ProjectState> {
        debug!(phase, total, ?name, "update_phase: called");
        let mut update = StateUpdate::new().phase(phase).total_phases(total);
        if name.is_some() {
            update = update.phase_name(name);
        }
        self.update(update).await
    }

    /// Update the activity line
    pub async fn set_activity(&self, activity: impl Into<String>) -> MachineResponse<ProjectState> {
        self.update(StateUpdate::new().activity(activity)).await
    }

    /// Transition to `error` with a message
    pub async fn set_error(&self, message: impl Into<String>) -> MachineResponse<ProjectState> {
        let message = message.into();
        debug!(%message, "set_error: called");
        self.transition(Action::Error, StateUpdate::new().error(Some(message)))
            .await
    }

    /// Record the running process, or clear it with None
    pub async fn set_process(&self, pid: Option<u32>) -> MachineResponse<ProjectState> {
        debug!(?pid, "set_process: called");
        let started = pid.map(|_| Utc::now());
        self.update(StateUpdate::new().process(pid, started)).await
    }

    /// Reset every field to its default, keeping `last_updated` monotonic
    pub async fn reset_record(&self, activity: Option<String>) -> MachineResponse<ProjectState> {
        debug!(?activity, "reset_record: called");
        let defaults = ProjectState::default();
        let update = StateUpdate::new()
            .phase(defaults.phase)
            .total_phases(defaults.total_phases)
            .phase_name(None::<String>)
            .process(None, None)
            .error(None::<String>)
            .activity(activity.unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()));
        self.set_state(State::Reset, update).await
    }

    /// Shut down the actor
    pub async fn shutdown(&self) -> MachineResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StatusCommand::Shutdown)
            .await
            .map_err(|_| MachineError::ChannelError)
    }
}

async fn actor_loop(mut machine: StateMachine, mut rx: mpsc::Receiver<StatusCommand>) {
    debug!("StatusManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StatusCommand::Read { reply } => {
                debug!("actor_loop: Read command");
                let _ = reply.send(machine.read());
            }
            StatusCommand::Write { state, reply } => {
                debug!(state = %state.state, "actor_loop: Write command");
                let _ = reply.send(machine.write(*state));
            }
            StatusCommand::Transition { action, update, reply } => {
                debug!(%action, "actor_loop: Transition command");
                let _ = reply.send(machine.transition(action, update));
            }
            StatusCommand::SetState { state, update, reply } => {
                debug!(%state, "actor_loop: SetState command");
                let _ = reply.send(machine.set_state(state, update));
            }
            StatusCommand::Update { update, reply } => {
                debug!("actor_loop: Update command");
                let _ = reply.send(machine.update(update));
            }
            StatusCommand::Shutdown => {
                info!("StatusManager shutting down");
                break;
            }
        }
    }

    debug!("StatusManager actor stopped");
}
