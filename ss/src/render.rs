//! Human-readable status document

use chrono::{DateTime, Local};

use crate::StoreError;
use crate::header;
use crate::model::ProjectState;

/// Title used when the caller does not name the project
pub const DEFAULT_TITLE: &str = "Conductor Project";

/// Render the full status file: structured header followed by the readable body
pub fn render(state: &ProjectState, title: &str, now: DateTime<Local>) -> Result<String, StoreError> {
    let header = header::render(state)?;
    Ok(format!("{}{}", header, body(state, title, now)))
}

/// Render only the readable part of the file
pub fn body(state: &ProjectState, title: &str, now: DateTime<Local>) -> String {
    let updated = state
        .last_updated
        .map(|ts| ts.with_timezone(&Local))
        .unwrap_or(now)
        .format("%Y-%m-%d %H:%M");

    let current_phase = if state.plan_generated() {
        let mut phase = format!("Phase {} of {}", state.phase, state.total_phases);
        if let Some(name) = &state.phase_name {
            phase.push_str(": ");
            phase.push_str(name);
        }
        phase
    } else {
        "-".to_string()
    };

    format!(
        "# Project Status: {title}

**Last Updated**: {updated}

---

## 👉 WHAT TO DO NEXT

{activity}

---

## Quick Status

| Item | Status |
|------|--------|
| Plan Generated | {plan} |
| Current Phase | {current_phase} |
| Phases Completed | {completed} / {total} |

---

## Progress Log

_State managed by conductor_
",
        activity = state.activity,
        plan = if state.plan_generated() { "Yes" } else { "No" },
        completed = state.completed_phases(),
        total = state.total_phases,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::State;

    #[test]
    fn test_body_rows_for_executing_record() {
        let state = ProjectState {
            state: State::Executing,
            phase: 3,
            total_phases: 5,
            phase_name: Some("Wire the API".to_string()),
            activity: "Executing plan...".to_string(),
            ..Default::default()
        };
        let text = body(&state, "Demo", Local::now());
        assert!(text.contains("# Project Status: Demo"));
        assert!(text.contains("| Plan Generated | Yes |"));
        assert!(text.contains("| Current Phase | Phase 3 of 5: Wire the API |"));
        assert!(text.contains("| Phases Completed | 2 / 5 |"));
        assert!(text.contains("## 👉 WHAT TO DO NEXT\n\nExecuting plan...\n"));
    }

    #[test]
    fn test_body_without_plan() {
        let text = body(&ProjectState::default(), DEFAULT_TITLE, Local::now());
        assert!(text.contains("| Plan Generated | No |"));
        assert!(text.contains("| Current Phase | - |"));
        assert!(text.contains("| Phases Completed | 0 / 0 |"));
    }

    #[test]
    fn test_complete_record_counts_every_phase() {
        let state = ProjectState {
            state: State::Complete,
            phase: 4,
            total_phases: 4,
            ..Default::default()
        };
        assert!(body(&state, "x", Local::now()).contains("| Phases Completed | 4 / 4 |"));
    }

    #[test]
    fn test_render_starts_with_header() {
        let text = render(&ProjectState::default(), "x", Local::now()).unwrap();
        assert!(text.starts_with("---\nstate: reset\n"));
        assert!(text.contains("\n---\n# Project Status: x"));
    }
}
