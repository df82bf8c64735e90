//! Plan file inspection

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Default location of the plan, relative to the project root
pub const PLAN_FILE: &str = "docs/planning/task-plan.md";

static PHASE_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)###\s+Phase\s+(\d+)[: \t-]+(.+?)[ \t]*\r?$").expect("valid regex"));
static COMPLETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Phases Completed\s*\|\s*(\d+)\s*/\s*(\d+)").expect("valid regex"));

/// A phase heading found in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPhase {
    pub number: u32,
    pub name: String,
}

/// Phases declared by `### Phase N: name` headings, in file order
///
/// A missing or unreadable plan yields no phases.
pub fn detect_phases(path: &Path) -> Vec<PlanPhase> {
    debug!(?path, "detect_phases: called");
    match fs::read_to_string(path) {
        Ok(content) => parse_phases(&content),
        Err(e) => {
            debug!(?path, error = %e, "detect_phases: plan not readable");
            Vec::new()
        }
    }
}

pub fn parse_phases(content: &str) -> Vec<PlanPhase> {
    PHASE_HEADING_RE
        .captures_iter(content)
        .filter_map(|caps| {
            Some(PlanPhase {
                number: caps[1].parse().ok()?,
                name: caps[2].trim().to_string(),
            })
        })
        .collect()
}

/// Whether status file content reports every phase finished
pub fn detect_completion(status_content: &str) -> bool {
    if let Some(caps) = COMPLETED_RE.captures(status_content) {
        let completed: u32 = caps[1].parse().unwrap_or(0);
        let total: u32 = caps[2].parse().unwrap_or(0);
        if total > 0 && completed >= total {
            return true;
        }
    }
    status_content.contains("Current Phase | Complete") || status_content.contains("Phase | Complete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_phase_headings() {
        let content = "\
# Task Plan

### Phase 1: Scaffold the project
Do things.

### Phase 2 - Core logic
More things.

### Phase 3 Polish
";
        let phases = parse_phases(content);
        assert_eq!(
            phases,
            vec![
                PlanPhase {
                    number: 1,
                    name: "Scaffold the project".to_string()
                },
                PlanPhase {
                    number: 2,
                    name: "Core logic".to_string()
                },
                PlanPhase {
                    number: 3,
                    name: "Polish".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_other_headings_ignored() {
        assert!(parse_phases("## Phase 1: wrong level\n### Overview\n").is_empty());
    }

    #[test]
    fn test_missing_plan_file() {
        let dir = tempdir().unwrap();
        assert!(detect_phases(&dir.path().join(PLAN_FILE)).is_empty());
    }

    #[test]
    fn test_plan_file_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PLAN_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "### Phase 1: Only\n").unwrap();
        assert_eq!(detect_phases(&path).len(), 1);
    }

    #[test]
    fn test_completion_from_counts() {
        assert!(detect_completion("| Phases Completed | 3 / 3 |"));
        assert!(detect_completion("| Phases Completed | 4 / 3 |"));
        assert!(!detect_completion("| Phases Completed | 2 / 3 |"));
        assert!(!detect_completion("| Phases Completed | 0 / 0 |"));
    }

    #[test]
    fn test_completion_from_phase_row() {
        assert!(detect_completion("| Current Phase | Complete |"));
        assert!(!detect_completion("| Current Phase | Phase 2 of 3 |"));
    }
}
