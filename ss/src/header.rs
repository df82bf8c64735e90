//! Structured header block at the top of the status file
//!
//! The header is a YAML mapping between two `---` marker lines. Fields are
//! recovered one at a time so a single malformed value does not discard the
//! rest of the record.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::StoreError;
use crate::model::{ProjectState, State};

/// Marker line that opens and closes the header block
pub const MARKER: &str = "---";

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\r?\n(.*?\n)---[ \t]*(?:\r?\n|\z)").expect("valid header regex"));

/// Result of parsing a header block
#[derive(Debug, Clone, Default)]
pub struct HeaderParse {
    /// Defaults merged with every recoverable field
    pub state: ProjectState,
    /// One entry per field that could not be recovered
    pub diagnostics: Vec<String>,
    /// Raw `state` value when it is not one of the valid states
    pub unrecognized_state: Option<String>,
}

/// Split `content` into the raw YAML of the header and the body that follows
///
/// The YAML keeps its final newline; block scalars depend on it.
pub fn split(content: &str) -> Option<(&str, &str)> {
    let caps = HEADER_RE.captures(content)?;
    let whole = caps.get(0)?;
    let yaml = caps.get(1)?.as_str();
    Some((yaml, &content[whole.end()..]))
}

/// Parse the header block of `content`
///
/// Returns None when there is no header, or when the block is not a YAML
/// mapping; the caller then falls back to the legacy body patterns.
pub fn parse(content: &str) -> Option<HeaderParse> {
    let (yaml, _) = split(content)?;
    let mapping = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => mapping,
        Ok(other) => {
            debug!(kind = ?other, "header::parse: header block is not a mapping");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "header::parse: header block is not valid YAML");
            return None;
        }
    };
    Some(parse_mapping(&mapping))
}

fn parse_mapping(mapping: &Mapping) -> HeaderParse {
    let mut out = HeaderParse::default();
    let get = |key: &str| mapping.get(Value::String(key.to_string()));

    match get("state") {
        Some(Value::String(raw)) => match raw.parse::<State>() {
            Ok(state) => out.state.state = state,
            Err(_) => {
                out.diagnostics.push(format!("unrecognized state '{}'", raw));
                out.unrecognized_state = Some(raw.clone());
            }
        },
        Some(Value::Null) | None => out.diagnostics.push("missing state".to_string()),
        Some(other) => out.diagnostics.push(format!("state has wrong type: {:?}", other)),
    }

    if let Some(phase) = count_field(get("phase"), "phase", &mut out.diagnostics) {
        out.state.phase = phase;
    }
    if let Some(total) = count_field(get("total_phases"), "total_phases", &mut out.diagnostics) {
        out.state.total_phases = total;
    }

    out.state.phase_name = optional_string(get("phase_name"));
    out.state.error = optional_string(get("error"));
    if let Some(activity) = optional_string(get("activity")) {
        out.state.activity = activity;
    }

    match get("process_id") {
        Some(Value::Null) | None => {}
        Some(value) => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(pid) => out.state.process_id = Some(pid),
            None => out.diagnostics.push(format!("invalid process_id: {:?}", value)),
        },
    }

    out.state.process_start = timestamp_field(get("process_start"), "process_start", &mut out.diagnostics);
    out.state.last_updated = timestamp_field(get("last_updated"), "last_updated", &mut out.diagnostics);

    match get("previous_state") {
        Some(Value::Null) | None => {}
        Some(Value::String(raw)) => match raw.parse::<State>() {
            Ok(state) => out.state.previous_state = Some(state),
            Err(_) => out.diagnostics.push(format!("unrecognized previous_state '{}'", raw)),
        },
        Some(other) => out
            .diagnostics
            .push(format!("previous_state has wrong type: {:?}", other)),
    }

    out
}

fn count_field(value: Option<&Value>, name: &str, diagnostics: &mut Vec<String>) -> Option<u32> {
    match value {
        Some(Value::Null) | None => None,
        Some(value) => {
            let parsed = value.as_u64().and_then(|v| u32::try_from(v).ok());
            if parsed.is_none() {
                diagnostics.push(format!("invalid {}: {:?}", name, value));
            }
            parsed
        }
    }
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn timestamp_field(value: Option<&Value>, name: &str, diagnostics: &mut Vec<String>) -> Option<DateTime<Utc>> {
    match value {
        Some(Value::Null) | None => None,
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                diagnostics.push(format!("invalid {} timestamp '{}'", name, raw));
            }
            parsed
        }
        Some(other) => {
            diagnostics.push(format!("{} has wrong type: {:?}", name, other));
            None
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as local time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render the header block, markers included
pub fn render(state: &ProjectState) -> Result<String, StoreError> {
    let yaml = serde_yaml::to_string(state)?;
    let newline = if yaml.ends_with('\n') { "" } else { "\n" };
    Ok(format!("{MARKER}\n{yaml}{newline}{MARKER}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_then_parse_keeps_fields() {
        let state = ProjectState {
            state: State::Error,
            phase: 2,
            total_phases: 4,
            phase_name: Some("Build: core".to_string()),
            process_id: Some(4242),
            process_start: Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()),
            last_updated: Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 45, 12).unwrap()),
            error: Some("tool exited with code 1".to_string()),
            previous_state: Some(State::Executing),
            activity: "Fix the failure, then retry".to_string(),
        };
        let block = render(&state).unwrap();
        assert!(block.starts_with("---\n"));
        assert!(block.ends_with("---\n"));

        let parsed = parse(&block).unwrap();
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        assert_eq!(parsed.state, state);
    }

    #[test]
    fn test_nulls_are_written() {
        let block = render(&ProjectState::default()).unwrap();
        assert!(block.contains("phase_name: null"));
        assert!(block.contains("previous_state: null"));
        assert!(block.contains("last_updated: null"));
    }

    #[test]
    fn test_missing_header_returns_none() {
        assert!(parse("# Project Status\n\nPhase 1 of 2\n").is_none());
    }

    #[test]
    fn test_non_mapping_header_returns_none() {
        assert!(parse("---\n- a\n- b\n---\nbody").is_none());
    }

    #[test]
    fn test_partial_recovery_with_bad_field() {
        let content = "---\nstate: executing\nphase: many\ntotal_phases: 3\nactivity: Working\n---\nbody";
        let parsed = parse(content).unwrap();
        assert_eq!(parsed.state.state, State::Executing);
        assert_eq!(parsed.state.total_phases, 3);
        assert_eq!(parsed.state.phase, 0);
        assert_eq!(parsed.state.activity, "Working");
        assert_eq!(parsed.diagnostics.len(), 1);
        assert!(parsed.diagnostics[0].contains("phase"));
    }

    #[test]
    fn test_unrecognized_state_is_kept_raw() {
        let parsed = parse("---\nstate: paused\nphase: 1\n---\n").unwrap();
        assert_eq!(parsed.unrecognized_state.as_deref(), Some("paused"));
        assert_eq!(parsed.state.state, State::Reset);
        assert_eq!(parsed.state.phase, 1);
    }

    #[test]
    fn test_naive_iso_timestamp_accepted() {
        let parsed = parse("---\nstate: planned\nlast_updated: '2024-06-01T10:15:30.123456'\n---\n").unwrap();
        assert!(parsed.diagnostics.is_empty());
        assert!(parsed.state.last_updated.is_some());
    }

    #[test]
    fn test_split_returns_body() {
        let (yaml, body) = split("---\nstate: reset\n---\n# Title\n").unwrap();
        assert_eq!(yaml, "state: reset\n");
        assert_eq!(body, "# Title\n");
    }

    #[test]
    fn test_multiline_activity_keeps_trailing_newlines() {
        for activity in ["x\n", "\n", "first\nsecond\n\n", "  indented\n", "trailing  "] {
            let state = ProjectState {
                activity: activity.to_string(),
                ..Default::default()
            };
            let block = render(&state).unwrap();
            let parsed = parse(&format!("{block}# Body\n")).unwrap();
            assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
            assert_eq!(parsed.state.activity, activity, "block was:\n{block}");
        }
    }
}
