//! Integration tests for the status file format and the statusstore binary

use std::fs;

use assert_cmd::Command;
use chrono::{TimeZone, Utc};
use predicates::prelude::*;
use proptest::option;
use proptest::prelude::*;
use statusstore::{ProjectState, RecordSource, State, StatusStore};
use tempfile::TempDir;

// =============================================================================
// Store properties
// =============================================================================

fn arb_record() -> impl Strategy<Value = ProjectState> {
    (
        (0usize..8, 0u32..20, 0u32..20),
        option::of("[ \n\t]{0,2}[A-Za-z][A-Za-z0-9 :_-]{0,30}[ \n\t]{0,2}"),
        option::of(1u32..4_000_000),
        option::of(0i64..2_000_000_000),
        option::of("[ \n]{0,2}[A-Za-z][A-Za-z0-9 ._\n-]{0,40}[ \n]{0,3}"),
        0usize..8,
        "[ \n]{0,2}[A-Za-z][A-Za-z0-9 .,!\n-]{0,60}[ \n]{0,3}",
    )
        .prop_map(|((s, total, phase), name, pid, start, error, prev, activity)| {
            let state = State::ALL[s];
            ProjectState {
                state,
                phase: if total > 0 { phase.min(total) } else { phase },
                total_phases: total,
                phase_name: name,
                process_id: pid,
                process_start: start.map(|secs| Utc.timestamp_opt(secs, 0).unwrap()),
                last_updated: Some(Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap()),
                error,
                previous_state: (state == State::Error).then_some(State::ALL[prev]),
                activity,
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_write_then_read_keeps_every_field(record in arb_record()) {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path().join("STATUS.md"));
        store.write(&record).unwrap();

        let read = store.read();
        prop_assert_eq!(read.source, RecordSource::Structured);
        prop_assert!(read.parse_error.is_none(), "{:?}", read.parse_error);
        prop_assert_eq!(read.state, record);
    }
}

#[test]
fn test_title_appears_in_body() {
    let dir = TempDir::new().unwrap();
    let store = StatusStore::new(dir.path().join("STATUS.md")).with_title("Website Rebuild");
    store.write(&ProjectState::default()).unwrap();
    let content = fs::read_to_string(store.path()).unwrap();
    assert!(content.contains("# Project Status: Website Rebuild"));
}

#[test]
fn test_legacy_file_upgraded_on_write() {
    let dir = TempDir::new().unwrap();
    let store = StatusStore::new(dir.path().join("STATUS.md"));
    fs::write(
        store.path(),
        "# Project Status\n\n| Plan Generated | Yes |\n| Current Phase | Phase 2 of 4: API |\n| Phases Completed | 1 / 4 |\n",
    )
    .unwrap();

    let record = store.read();
    assert_eq!(record.source, RecordSource::Legacy);
    assert_eq!(record.state.state, State::Planned);

    store.write(&record.state).unwrap();
    let upgraded = store.read();
    assert_eq!(upgraded.source, RecordSource::Structured);
    assert_eq!(upgraded.state.phase, 2);
    assert_eq!(upgraded.state.phase_name.as_deref(), Some("API"));
}

// =============================================================================
// Binary
// =============================================================================

fn statusstore() -> Command {
    Command::cargo_bin("statusstore").expect("binary built")
}

#[test]
fn test_init_then_show_json() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("STATUS.md");

    statusstore()
        .args(["init", "--title", "Demo"])
        .arg(&file)
        .assert()
        .success();
    assert!(file.exists());

    statusstore()
        .args(["show", "--format", "json"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"reset\""))
        .stdout(predicate::str::contains("\"source\": \"structured\""));
}

#[test]
fn test_check_flags_garbage() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("STATUS.md");
    fs::write(&file, "nothing useful here").unwrap();

    statusstore().arg("check").arg(&file).assert().failure();
}

#[test]
fn test_check_flags_unknown_state() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("STATUS.md");
    fs::write(&file, "---\nstate: paused\n---\n").unwrap();

    statusstore()
        .arg("check")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("paused"));
}

#[test]
fn test_check_accepts_written_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("STATUS.md");
    StatusStore::new(&file).write(&ProjectState::default()).unwrap();

    statusstore().arg("check").arg(&file).assert().success();
}
