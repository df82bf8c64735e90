//! Pattern-based recovery for status files written before the structured header
//!
//! These patterns track the exact wording of older files. Anything they do
//! not match is reported as a diagnostic instead of guessed.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::header::parse_timestamp;
use crate::model::{ProjectState, State};

static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Phase (\d+) of (\d+)").expect("valid regex"));
static PHASE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Current Phase.*?Phase \d+ of \d+:\s*(.+)").expect("valid regex"));
static UPDATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Last Updated\*\*:\s*(.+)").expect("valid regex"));
static NEXT_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s*(?:\S+\s+)?WHAT TO DO NEXT[ \t]*\r?$").expect("valid regex"));
static COMPLETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Phases Completed\s*\|\s*(\d+)\s*/\s*(\d+)").expect("valid regex"));

/// Marker an older record used when the tool was waiting on the operator
const QUESTIONS_FILE_MARKER: &str = "Questions_For_You.md";

/// Outcome of a legacy parse
#[derive(Debug, Clone, Default)]
pub struct LegacyParse {
    pub state: ProjectState,
    /// At least one pattern matched
    pub matched: bool,
    pub diagnostics: Vec<String>,
}

/// Recover record fields from the free-text body
pub fn parse(content: &str) -> LegacyParse {
    let mut out = LegacyParse::default();
    let state = &mut out.state;

    if let Some(caps) = PHASE_RE.captures(content) {
        state.phase = caps[1].parse().unwrap_or(0);
        state.total_phases = caps[2].parse().unwrap_or(0);
        out.matched = true;
    }

    if let Some(caps) = PHASE_NAME_RE.captures(content) {
        let name = caps[1].trim().trim_end_matches('|').trim();
        if !name.is_empty() {
            state.phase_name = Some(name.to_string());
        }
        out.matched = true;
    }

    if let Some(caps) = UPDATED_RE.captures(content) {
        let raw = caps[1].trim();
        match parse_timestamp(raw) {
            Some(ts) => state.last_updated = Some(ts),
            None => out.diagnostics.push(format!("unparsable Last Updated value '{}'", raw)),
        }
        out.matched = true;
    }

    if let Some(activity) = next_steps(content) {
        state.activity = activity;
        out.matched = true;
    }

    if let Some(caps) = COMPLETED_RE.captures(content) {
        let completed: u32 = caps[1].parse().unwrap_or(0);
        let total: u32 = caps[2].parse().unwrap_or(0);
        state.state = infer_state(content, state, completed, total);
        out.matched = true;
    }

    if state.total_phases > 0 && state.phase > state.total_phases {
        out.diagnostics.push(format!(
            "phase {} exceeds total {}, clamped",
            state.phase, state.total_phases
        ));
        state.phase = state.total_phases;
    }

    if !out.matched {
        out.diagnostics
            .push("no structured header and no recognizable status content".to_string());
    }
    debug!(matched = out.matched, state = %out.state.state, "legacy::parse: done");
    out
}

/// Text under the "WHAT TO DO NEXT" heading, up to the next rule or heading
fn next_steps(content: &str) -> Option<String> {
    let heading = NEXT_HEADING_RE.find(content)?;
    let rest = &content[heading.end()..];
    let end = [rest.find("\n---"), rest.find("\n##")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());
    let text = rest[..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn infer_state(content: &str, state: &ProjectState, completed: u32, total: u32) -> State {
    if total > 0 && completed == total {
        State::Complete
    } else if state.activity.contains(QUESTIONS_FILE_MARKER) {
        State::Questions
    } else if content.contains("Executing") || content.contains("In Progress") {
        State::Executing
    } else if state.phase > 0 && completed >= state.phase {
        // Older files were last written when a run ended with the current phase counted
        State::Complete
    } else if content.contains("Plan Generated | Yes") || state.total_phases > 0 {
        State::Planned
    } else {
        State::Reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_legacy_record_reads_as_complete() {
        let content = "Working on Phase 2 of 5 today.\n\n| Phases Completed | 2 / 5 |\n";
        let parsed = parse(content);
        assert!(parsed.matched);
        assert_eq!(parsed.state.phase, 2);
        assert_eq!(parsed.state.total_phases, 5);
        assert_eq!(parsed.state.state, State::Complete);
    }

    #[test]
    fn test_full_legacy_body() {
        let content = "\
# Project Status: Demo

**Last Updated**: 2024-05-02 14:30

---

## 👉 WHAT TO DO NEXT

Review the output folder.
Then close the ticket.

---

## Quick Status

| Item | Status |
|------|--------|
| Plan Generated | Yes |
| Current Phase | Phase 3 of 4: Integration |
| Phases Completed | 1 / 4 |
";
        let parsed = parse(content);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        assert_eq!(parsed.state.phase, 3);
        assert_eq!(parsed.state.total_phases, 4);
        assert_eq!(parsed.state.phase_name.as_deref(), Some("Integration"));
        assert_eq!(
            parsed.state.activity,
            "Review the output folder.\nThen close the ticket."
        );
        assert!(parsed.state.last_updated.is_some());
        assert_eq!(parsed.state.state, State::Planned);
    }

    #[test]
    fn test_all_phases_completed() {
        let parsed = parse("| Current Phase | Phase 4 of 4 |\n| Phases Completed | 4 / 4 |");
        assert_eq!(parsed.state.state, State::Complete);
    }

    #[test]
    fn test_in_progress_marker_means_executing() {
        let parsed = parse("Status: In Progress\n| Current Phase | Phase 3 of 5 |\n| Phases Completed | 2 / 5 |");
        assert_eq!(parsed.state.state, State::Executing);
    }

    #[test]
    fn test_questions_activity_means_questions() {
        let content = "## WHAT TO DO NEXT\n\nAnswer the questions in Questions_For_You.md\n\n---\n\
                       | Phases Completed | 1 / 3 |\nPhase 2 of 3";
        let parsed = parse(content);
        assert_eq!(parsed.state.state, State::Questions);
    }

    #[test]
    fn test_no_completed_row_keeps_default_state() {
        let parsed = parse("Phase 1 of 3");
        assert!(parsed.matched);
        assert_eq!(parsed.state.state, State::Reset);
        assert_eq!(parsed.state.phase, 1);
    }

    #[test]
    fn test_unrecognized_content_is_a_diagnostic() {
        let parsed = parse("just some notes\nnothing else");
        assert!(!parsed.matched);
        assert_eq!(parsed.state, ProjectState::default());
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_phase_past_total_is_clamped() {
        let parsed = parse("Phase 7 of 5");
        assert_eq!(parsed.state.phase, 5);
        assert_eq!(parsed.diagnostics.len(), 1);
    }
}
