//! Transition table - the sole authority for legal state changes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use statusstore::State;

use super::messages::MachineError;

/// Operator or supervisor action that drives a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Configure,
    GeneratePlan,
    PlanComplete,
    Cancel,
    Error,
    Execute,
    QuestionsDetected,
    PhaseComplete,
    AllComplete,
    Answer,
    Skip,
    Retry,
    Reset,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::Configure,
        Action::GeneratePlan,
        Action::PlanComplete,
        Action::Cancel,
        Action::Error,
        Action::Execute,
        Action::QuestionsDetected,
        Action::PhaseComplete,
        Action::AllComplete,
        Action::Answer,
        Action::Skip,
        Action::Retry,
        Action::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Configure => "configure",
            Action::GeneratePlan => "generate_plan",
            Action::PlanComplete => "plan_complete",
            Action::Cancel => "cancel",
            Action::Error => "error",
            Action::Execute => "execute",
            Action::QuestionsDetected => "questions_detected",
            Action::PhaseComplete => "phase_complete",
            Action::AllComplete => "all_complete",
            Action::Answer => "answer",
            Action::Skip => "skip",
            Action::Retry => "retry",
            Action::Reset => "reset",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| MachineError::UnknownAction(s.to_string()))
    }
}

/// Destination of a legal edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    To(State),
    /// Resolve to the `previous_state` captured when `error` was entered
    Previous,
}

/// Look up the edge for `action` out of `state`
pub fn next(state: State, action: Action) -> Option<Target> {
    use Action as A;
    use State as S;

    let target = match (state, action) {
        (S::Reset, A::Configure) => Target::To(S::Configured),

        (S::Configured, A::GeneratePlan) => Target::To(S::Planning),
        (S::Configured, A::Reset) => Target::To(S::Reset),

        (S::Planning, A::PlanComplete) => Target::To(S::Planned),
        (S::Planning, A::Cancel) => Target::To(S::Configured),
        (S::Planning, A::Error) => Target::To(S::Error),

        (S::Planned, A::Execute) => Target::To(S::Executing),
        (S::Planned, A::Reset) => Target::To(S::Reset),

        (S::Executing, A::QuestionsDetected) => Target::To(S::Questions),
        (S::Executing, A::PhaseComplete) => Target::To(S::Executing),
        (S::Executing, A::AllComplete) => Target::To(S::Complete),
        (S::Executing, A::Cancel) => Target::To(S::Planned),
        (S::Executing, A::Error) => Target::To(S::Error),

        (S::Questions, A::Answer) => Target::To(S::Executing),
        (S::Questions, A::Skip) => Target::To(S::Executing),
        (S::Questions, A::Cancel) => Target::To(S::Planned),

        (S::Complete, A::Reset) => Target::To(S::Reset),

        (S::Error, A::Retry) => Target::Previous,
        (S::Error, A::Reset) => Target::To(S::Reset),

        _ => return None,
    };
    Some(target)
}

/// Legal actions out of `state`, in table order
pub fn actions(state: State) -> Vec<Action> {
    Action::ALL
        .iter()
        .copied()
        .filter(|action| next(state, *action).is_some())
        .collect()
}
