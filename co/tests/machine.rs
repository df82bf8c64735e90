//! State machine behavior against the on-disk record

use std::fs;

use conductor::machine::{Action, MachineError, StateMachine, StatusManager, Target, next};
use proptest::prelude::*;
use statusstore::{State, StateUpdate, StatusStore};
use tempfile::TempDir;

fn make_machine() -> (StateMachine, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = StatusStore::new(dir.path().join("STATUS.md"));
    (StateMachine::new(store), dir)
}

/// Seed the record in `state`, with a plan so phase updates validate
fn seed(machine: &mut StateMachine, state: State) {
    machine.set_state(State::Executing, StateUpdate::new().phase(1).total_phases(3)).unwrap();
    machine.set_state(state, StateUpdate::new()).unwrap();
}

// =============================================================================
// Every (state, action) pair
// =============================================================================

#[test]
fn test_every_pair_follows_the_table() {
    for state in State::ALL {
        for action in Action::ALL {
            let (mut machine, _dir) = make_machine();
            seed(&mut machine, state);
            let before = machine.read();
            let before_bytes = fs::read(machine.store().path()).unwrap();

            let result = machine.transition(action, StateUpdate::new());
            match next(state, action) {
                None => {
                    let err = result.expect_err("illegal edge accepted");
                    assert!(
                        matches!(err, MachineError::InvalidAction { .. }),
                        "{} --{}--> gave {:?}",
                        state,
                        action,
                        err
                    );
                    assert!(err.is_validation());
                    assert_eq!(fs::read(machine.store().path()).unwrap(), before_bytes);
                }
                Some(target) => {
                    let after = result.unwrap_or_else(|e| panic!("{} --{}--> failed: {}", state, action, e));
                    let expected = match target {
                        Target::To(s) => s,
                        Target::Previous => before.state.previous_state.unwrap_or(State::Reset),
                    };
                    assert_eq!(after.state, expected, "{} --{}-->", state, action);
                    assert!(after.last_updated > before.state.last_updated);
                    assert_eq!(machine.read().state, after);
                }
            }
        }
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_plan_scenario() {
    let (mut machine, _dir) = make_machine();
    assert_eq!(machine.read().state.state, State::Reset);

    let s = machine.transition(Action::Configure, StateUpdate::new()).unwrap();
    assert_eq!(s.state, State::Configured);
    let s = machine.transition(Action::GeneratePlan, StateUpdate::new()).unwrap();
    assert_eq!(s.state, State::Planning);

    // Tool exited 0 and the plan declares three phases
    let s = machine
        .transition(
            Action::PlanComplete,
            StateUpdate::new().phase(1).total_phases(3).phase_name(Some("Scaffold")),
        )
        .unwrap();
    assert_eq!(s.state, State::Planned);
    assert_eq!(s.total_phases, 3);
    assert_eq!(s.phase, 1);
}

#[test]
fn test_error_and_retry_scenario() {
    let (mut machine, _dir) = make_machine();
    seed(&mut machine, State::Executing);

    let s = machine
        .transition(Action::Error, StateUpdate::new().error(Some("tool exited with code 1")))
        .unwrap();
    assert_eq!(s.state, State::Error);
    assert_eq!(s.previous_state, Some(State::Executing));
    assert_eq!(s.error.as_deref(), Some("tool exited with code 1"));

    let s = machine.transition(Action::Retry, StateUpdate::new()).unwrap();
    assert_eq!(s.state, State::Executing);
}

#[test]
fn test_reset_from_error_clears_error_fields() {
    let (mut machine, _dir) = make_machine();
    seed(&mut machine, State::Planning);
    machine
        .transition(Action::Error, StateUpdate::new().error(Some("boom")))
        .unwrap();

    let s = machine.transition(Action::Reset, StateUpdate::new()).unwrap();
    assert_eq!(s.state, State::Reset);
    assert!(s.error.is_none());
    assert!(s.previous_state.is_none());
}

#[test]
fn test_state_parse_rejects_unknown_name() {
    let err = "paused".parse::<State>().unwrap_err();
    assert!(err.to_string().contains("paused"));
}

#[test]
fn test_legacy_record_drives_transitions() {
    let (mut machine, _dir) = make_machine();
    fs::write(
        machine.store().path(),
        "| Plan Generated | Yes |\n| Current Phase | Phase 1 of 2 |\n| Phases Completed | 0 / 2 |\n",
    )
    .unwrap();
    let s = machine.transition(Action::Execute, StateUpdate::new()).unwrap();
    assert_eq!(s.state, State::Executing);
    assert_eq!(s.total_phases, 2);
}

#[tokio::test]
async fn test_manager_rejects_invalid_action() {
    let dir = TempDir::new().unwrap();
    let manager = StatusManager::spawn(StatusStore::new(dir.path().join("STATUS.md")));

    let err = manager.transition(Action::Execute, StateUpdate::new()).await.unwrap_err();
    match err {
        MachineError::InvalidAction { state, valid, .. } => {
            assert_eq!(state, State::Reset);
            assert_eq!(valid, vec![Action::Configure]);
        }
        other => panic!("Expected InvalidAction, got {:?}", other),
    }
    assert!(!dir.path().join("STATUS.md").exists());

    let s = manager.set_error("ignored").await;
    assert!(s.is_err(), "error is not reachable from reset");
    manager.shutdown().await.unwrap();
}

// =============================================================================
// Properties
// =============================================================================

fn arb_action() -> impl Strategy<Value = Action> {
    (0usize..Action::ALL.len()).prop_map(|i| Action::ALL[i])
}

fn arb_state() -> impl Strategy<Value = State> {
    (0usize..State::ALL.len()).prop_map(|i| State::ALL[i])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_record_invariants_hold_for_any_action_sequence(
        actions in proptest::collection::vec(arb_action(), 1..25)
    ) {
        let (mut machine, _dir) = make_machine();
        let mut last = machine.read().state;

        for action in actions {
            match machine.transition(action, StateUpdate::new()) {
                Ok(s) => {
                    prop_assert!(s.last_updated > last.last_updated);
                    prop_assert_eq!(s.previous_state.is_some(), s.state == State::Error);
                    prop_assert!(s.validate().is_ok());
                    last = s;
                }
                Err(e) => {
                    prop_assert!(e.is_validation());
                    prop_assert_eq!(machine.read().state, last.clone());
                }
            }
        }
    }

    #[test]
    fn prop_retry_returns_to_state_error_was_entered_from(prior in arb_state()) {
        let (mut machine, _dir) = make_machine();
        seed(&mut machine, prior);
        prop_assume!(prior != State::Error);

        // Enter error from `prior` the way a failed run would, legal edge or not
        let s = machine
            .set_state(State::Error, StateUpdate::new().error(Some("failed")))
            .unwrap();
        prop_assert_eq!(s.previous_state, Some(prior));

        let s = machine.transition(Action::Retry, StateUpdate::new()).unwrap();
        prop_assert_eq!(s.state, prior);
        prop_assert!(s.error.is_none());
        prop_assert!(s.previous_state.is_none());
    }
}
