//! Conductor configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use statusstore::STATUS_FILE;
use tracing::{debug, info, warn};

use crate::plan::PLAN_FILE;
use crate::questions::QUESTIONS_FILE;
use crate::supervisor::SupervisorConfig;
use crate::timeout::TimeoutConfig;

/// Project-local config file name, looked up in the project root
pub const PROJECT_CONFIG_FILE: &str = ".conductor.yml";

/// Main conductor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project files
    pub project: ProjectConfig,

    /// External tool invocation
    pub tool: ToolConfig,

    /// Stall, hard-timeout and stop settings
    pub timeouts: TimeoutsConfig,

    /// Output capture
    pub output: OutputConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Resolve the configuration for a project
    ///
    /// Sources, first hit wins: `explicit`, `<root>/.conductor.yml`,
    /// `<config_dir>/conductor/conductor.yml`, then built-in defaults. An
    /// explicit file that cannot be read is an error; the others are skipped
    /// with a warning. `root`, when given, replaces the root the file names.
    pub fn load(explicit: Option<&PathBuf>, root: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => Self::search_paths(root)
                .iter()
                .find_map(|path| Self::load_candidate(path))
                .unwrap_or_else(|| {
                    debug!("Config::load: no config file, using defaults");
                    Self::default()
                }),
        };
        Ok(match root {
            Some(root) => config.with_root(root),
            None => config,
        })
    }

    fn search_paths(root: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![root.unwrap_or(Path::new(".")).join(PROJECT_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("conductor").join("conductor.yml"));
        }
        paths
    }

    fn load_candidate(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load_from_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unusable config file");
                None
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context(format!("Failed to read config {}", path.display()))?;
        let config = serde_yaml::from_str(&content).context(format!("Invalid config in {}", path.display()))?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Point the project at `root`, keeping the relative file names
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project.root = root.into();
        self
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            capture_output: self.tool.capture_output,
            output_buffer_lines: self.output.buffer_lines,
            stop_grace: self.timeouts.stop_grace(),
            detached: false,
        }
    }

    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            stall_secs: self.timeouts.stall_secs,
            hard_timeout_secs: self.timeouts.hard_timeout_secs,
        }
    }
}

/// Project file locations; relative paths resolve against `root`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root, also the tool's working directory
    pub root: PathBuf,

    #[serde(rename = "status-file")]
    pub status_file: PathBuf,

    #[serde(rename = "plan-file")]
    pub plan_file: PathBuf,

    #[serde(rename = "questions-file")]
    pub questions_file: PathBuf,

    /// Title shown in the status file
    pub title: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            status_file: PathBuf::from(STATUS_FILE),
            plan_file: PathBuf::from(PLAN_FILE),
            questions_file: PathBuf::from(QUESTIONS_FILE),
            title: statusstore::render::DEFAULT_TITLE.to_string(),
        }
    }
}

impl ProjectConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.resolve(&self.status_file)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.resolve(&self.plan_file)
    }

    pub fn questions_path(&self) -> PathBuf {
        self.resolve(&self.questions_file)
    }
}

/// External tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name or path
    pub command: String,

    /// Capture output instead of leaving the tool on the console
    #[serde(rename = "capture-output")]
    pub capture_output: bool,

    #[serde(rename = "plan-prompt")]
    pub plan_prompt: String,

    #[serde(rename = "execute-prompt")]
    pub execute_prompt: String,

    #[serde(rename = "continue-prompt")]
    pub continue_prompt: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            capture_output: true,
            plan_prompt: "Generate a plan".to_string(),
            execute_prompt: "Execute the plan".to_string(),
            continue_prompt: "Continue".to_string(),
        }
    }
}

/// Stall, hard-timeout and stop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(rename = "stall-secs")]
    pub stall_secs: u64,

    #[serde(rename = "hard-timeout-secs")]
    pub hard_timeout_secs: u64,

    /// Grace period between the termination request and a forced kill
    #[serde(rename = "stop-grace-secs")]
    pub stop_grace_secs: u64,

    /// How often a foreground run polls status and output
    #[serde(rename = "poll-ms")]
    pub poll_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let defaults = TimeoutConfig::default();
        Self {
            stall_secs: defaults.stall_secs,
            hard_timeout_secs: defaults.hard_timeout_secs,
            stop_grace_secs: 10,
            poll_ms: 500,
        }
    }
}

impl TimeoutsConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(10))
    }
}

/// Output capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Lines kept before the oldest are dropped
    #[serde(rename = "buffer-lines")]
    pub buffer_lines: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { buffer_lines: 1000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.tool.command, "claude");
        assert_eq!(config.timeouts.stall_secs, 300);
        assert_eq!(config.timeouts.hard_timeout_secs, 1800);
        assert_eq!(config.project.status_path(), PathBuf::from("./STATUS.md"));
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
project:
  root: /work/demo
  status-file: docs/STATUS.md
  title: Demo

tool:
  command: /opt/bin/claude
  capture-output: false
  execute-prompt: "Run the plan"

timeouts:
  stall-secs: 60
  hard-timeout-secs: 600
  stop-grace-secs: 3

output:
  buffer-lines: 50

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.project.status_path(), PathBuf::from("/work/demo/docs/STATUS.md"));
        assert_eq!(config.project.plan_path(), PathBuf::from("/work/demo").join(PLAN_FILE));
        assert_eq!(config.tool.execute_prompt, "Run the plan");
        assert!(!config.supervisor().capture_output);
        assert_eq!(config.supervisor().output_buffer_lines, 50);
        assert_eq!(config.supervisor().stop_grace, Duration::from_secs(3));
        assert_eq!(config.timeout().stall_secs, 60);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
tool:
  command: my-tool
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.tool.command, "my-tool");

        // Defaults for unspecified
        assert_eq!(config.tool.plan_prompt, "Generate a plan");
        assert!(config.tool.capture_output);
        assert_eq!(config.output.buffer_lines, 1000);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.yml");
        fs::write(&path, "timeouts:\n  poll-ms: 50\n").unwrap();

        let config = Config::load(Some(&path), None).unwrap();
        assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.project.root, PathBuf::from("."));
    }

    #[test]
    fn test_project_config_found_under_root() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "project:\n  root: /somewhere/else\ntool:\n  command: local-tool\n",
        )
        .unwrap();

        let config = Config::load(None, Some(dir.path())).unwrap();
        assert_eq!(config.tool.command, "local-tool");
        assert_eq!(config.project.root, dir.path());
        assert_eq!(config.project.status_path(), dir.path().join(STATUS_FILE));
    }

    #[test]
    fn test_root_override_applies_to_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.yml");
        fs::write(&path, "project:\n  root: /from/file\n").unwrap();

        let config = Config::load(Some(&path), Some(Path::new("/from/cli"))).unwrap();
        assert_eq!(config.project.root, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_load_explicit_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path), None).is_err());
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let config = Config::default().with_root("/srv/project");
        let mut project = config.project.clone();
        project.questions_file = PathBuf::from("/tmp/q.md");
        assert_eq!(project.questions_path(), PathBuf::from("/tmp/q.md"));
        assert_eq!(config.project.questions_path(), PathBuf::from("/srv/project").join(QUESTIONS_FILE));
    }
}
