//! External tool invocation and installation check

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// A command line for the supervised tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<tool> -p "<prompt>"`
    pub fn prompt(tool: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            program: tool.into(),
            args: vec!["-p".to_string(), prompt.into()],
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of checking whether the tool is installed
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: String,
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

/// Longest wait for `<tool> --version`
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Locate `tool` on PATH and ask it for its version
pub async fn tool_check(tool: &str) -> ToolStatus {
    tool_check_within(tool, VERSION_TIMEOUT).await
}

async fn tool_check_within(tool: &str, limit: Duration) -> ToolStatus {
    debug!(tool, ?limit, "tool_check: called");
    let path = match which::which(tool) {
        Ok(path) => path,
        Err(e) => {
            debug!(tool, error = %e, "tool_check: not found on PATH");
            return ToolStatus {
                tool: tool.to_string(),
                installed: false,
                path: None,
                version: None,
            };
        }
    };

    let output = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let version = match tokio::time::timeout(limit, output).await {
        Ok(Ok(output)) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string),
        Ok(Ok(output)) => {
            debug!(tool, status = %output.status, "tool_check: --version failed");
            None
        }
        Ok(Err(e)) => {
            debug!(tool, error = %e, "tool_check: --version did not run");
            None
        }
        Err(_) => {
            warn!(tool, ?limit, "Tool did not answer --version in time");
            None
        }
    };
    debug!(tool, ?path, ?version, "tool_check: returning");

    ToolStatus {
        tool: tool.to_string(),
        installed: true,
        path: Some(path),
        version,
    }
}
