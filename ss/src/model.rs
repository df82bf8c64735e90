//! ProjectState record and the lifecycle states it moves through

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Default activity line for a fresh record
pub const DEFAULT_ACTIVITY: &str = "Ready to start";

/// Lifecycle state of the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Reset,
    Configured,
    Planning,
    Planned,
    Executing,
    Questions,
    Complete,
    Error,
}

impl State {
    /// Every valid state, in lifecycle order
    pub const ALL: [State; 8] = [
        State::Reset,
        State::Configured,
        State::Planning,
        State::Planned,
        State::Executing,
        State::Questions,
        State::Complete,
        State::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Reset => "reset",
            State::Configured => "configured",
            State::Planning => "planning",
            State::Planned => "planned",
            State::Executing => "executing",
            State::Questions => "questions",
            State::Complete => "complete",
            State::Error => "error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| StoreError::UnknownState(s.to_string()))
    }
}

/// The persisted status record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub state: State,
    pub phase: u32,
    pub total_phases: u32,
    pub phase_name: Option<String>,
    pub process_id: Option<u32>,
    pub process_start: Option<DateTime<Utc>>,
    /// None only for a record that was never written
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub previous_state: Option<State>,
    pub activity: String,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            state: State::Reset,
            phase: 0,
            total_phases: 0,
            phase_name: None,
            process_id: None,
            process_start: None,
            last_updated: None,
            error: None,
            previous_state: None,
            activity: DEFAULT_ACTIVITY.to_string(),
        }
    }
}

impl ProjectState {
    /// Whether a plan with at least one phase exists
    pub fn plan_generated(&self) -> bool {
        self.total_phases > 0
    }

    /// Number of phases shown as finished in the status table
    pub fn completed_phases(&self) -> u32 {
        match self.state {
            State::Complete => self.total_phases,
            State::Reset | State::Configured | State::Planning => 0,
            _ => self.phase.saturating_sub(1),
        }
    }

    /// Check the record invariants that hold for every persisted record
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.total_phases > 0 && self.phase > self.total_phases {
            return Err(StoreError::Invalid(format!(
                "phase {} exceeds total_phases {}",
                self.phase, self.total_phases
            )));
        }
        if self.previous_state.is_some() && self.state != State::Error {
            return Err(StoreError::Invalid(format!(
                "previous_state is only recorded in the error state (state is {})",
                self.state
            )));
        }
        Ok(())
    }

    /// Refresh `last_updated`, never moving it backwards or leaving it unchanged
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let next = match self.last_updated {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_updated = Some(next);
    }
}

/// Partial update merged into a record before it is persisted
///
/// Nullable fields use `Option<Option<T>>`: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub phase: Option<u32>,
    pub total_phases: Option<u32>,
    pub phase_name: Option<Option<String>>,
    pub process_id: Option<Option<u32>>,
    pub process_start: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<String>>,
    pub previous_state: Option<Option<State>>,
    pub activity: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: u32) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn total_phases(mut self, total: u32) -> Self {
        self.total_phases = Some(total);
        self
    }

    pub fn phase_name(mut self, name: Option<impl Into<String>>) -> Self {
        self.phase_name = Some(name.map(Into::into));
        self
    }

    pub fn process(mut self, pid: Option<u32>, started: Option<DateTime<Utc>>) -> Self {
        self.process_id = Some(pid);
        self.process_start = Some(started);
        self
    }

    pub fn error(mut self, message: Option<impl Into<String>>) -> Self {
        self.error = Some(message.map(Into::into));
        self
    }

    pub fn previous_state(mut self, state: Option<State>) -> Self {
        self.previous_state = Some(state);
        self
    }

    pub fn activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    /// True when the caller explicitly set the `error` field
    pub fn sets_error(&self) -> bool {
        self.error.is_some()
    }

    /// Merge the supplied fields into `state`
    pub fn apply(self, state: &mut ProjectState) {
        if let Some(phase) = self.phase {
            state.phase = phase;
        }
        if let Some(total) = self.total_phases {
            state.total_phases = total;
        }
        if let Some(name) = self.phase_name {
            state.phase_name = name;
        }
        if let Some(pid) = self.process_id {
            state.process_id = pid;
        }
        if let Some(started) = self.process_start {
            state.process_start = started;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(previous) = self.previous_state {
            state.previous_state = previous;
        }
        if let Some(activity) = self.activity {
            state.activity = activity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_from_str_accepts_all_names() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
    }

    #[test]
    fn test_state_from_str_rejects_unknown() {
        let err = "paused".parse::<State>().unwrap_err();
        assert!(matches!(err, StoreError::UnknownState(ref s) if s == "paused"));
    }

    #[test]
    fn test_default_record() {
        let state = ProjectState::default();
        assert_eq!(state.state, State::Reset);
        assert_eq!(state.phase, 0);
        assert_eq!(state.total_phases, 0);
        assert_eq!(state.activity, DEFAULT_ACTIVITY);
        assert!(state.last_updated.is_none());
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_completed_phases_formula() {
        let mut state = ProjectState {
            phase: 3,
            total_phases: 5,
            ..Default::default()
        };

        state.state = State::Complete;
        assert_eq!(state.completed_phases(), 5);

        for early in [State::Reset, State::Configured, State::Planning] {
            state.state = early;
            assert_eq!(state.completed_phases(), 0);
        }

        state.state = State::Executing;
        assert_eq!(state.completed_phases(), 2);

        state.phase = 0;
        assert_eq!(state.completed_phases(), 0);
    }

    #[test]
    fn test_validate_phase_range() {
        let state = ProjectState {
            phase: 6,
            total_phases: 5,
            ..Default::default()
        };
        assert!(matches!(state.validate(), Err(StoreError::Invalid(_))));

        // No plan yet: phase is unconstrained
        let state = ProjectState {
            phase: 2,
            total_phases: 0,
            ..Default::default()
        };
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_validate_previous_state_only_in_error() {
        let mut state = ProjectState {
            previous_state: Some(State::Executing),
            ..Default::default()
        };
        assert!(state.validate().is_err());
        state.state = State::Error;
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_touch_strictly_increases() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let mut state = ProjectState::default();
        state.touch(t);
        assert_eq!(state.last_updated, Some(t));

        // Same instant again still advances
        state.touch(t);
        assert!(state.last_updated.unwrap() > t);

        // A clock that went backwards does not rewind the record
        let before = state.last_updated.unwrap();
        state.touch(t - chrono::Duration::seconds(30));
        assert!(state.last_updated.unwrap() > before);
    }

    #[test]
    fn test_update_apply_and_clear() {
        let mut state = ProjectState {
            phase_name: Some("Setup".to_string()),
            error: Some("boom".to_string()),
            ..Default::default()
        };

        StateUpdate::new()
            .phase(1)
            .total_phases(3)
            .phase_name(None::<String>)
            .error(None::<String>)
            .activity("Working")
            .apply(&mut state);

        assert_eq!(state.phase, 1);
        assert_eq!(state.total_phases, 3);
        assert!(state.phase_name.is_none());
        assert!(state.error.is_none());
        assert_eq!(state.activity, "Working");
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let original = ProjectState {
            phase: 2,
            total_phases: 4,
            ..Default::default()
        };
        let mut state = original.clone();
        StateUpdate::new().apply(&mut state);
        assert_eq!(state, original);
    }
}
