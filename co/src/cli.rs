//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Conductor - supervise a CLI tool through plan, execution and questions
#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Supervise a long-running CLI tool and track its progress in STATUS.md",
    version,
    after_help = "Logs are written to: ~/.local/share/conductor/logs/conductor.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Project root (overrides the config file)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Show the status record with live process and timeout flags
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Mark the project configured
    Configure {
        /// Activity line to record
        #[arg(short, long)]
        activity: Option<String>,
    },

    /// Run the tool to generate the plan
    Plan {
        /// Return once the tool has started instead of waiting for it
        #[arg(short, long)]
        detach: bool,
    },

    /// Run the tool to execute the plan
    Execute {
        /// Return once the tool has started instead of waiting for it
        #[arg(short, long)]
        detach: bool,
    },

    /// Continue execution after questions
    Continue {
        /// Return once the tool has started instead of waiting for it
        #[arg(short, long)]
        detach: bool,
    },

    /// Answer questions and continue, e.g. `answer 1=Postgres 2="Use SSO"`
    Answer {
        /// Answers as NUMBER=TEXT
        #[arg(required = true, value_parser = parse_answer)]
        answers: Vec<(u32, String)>,

        /// Return once the tool has started instead of waiting for it
        #[arg(short, long)]
        detach: bool,
    },

    /// Skip unanswered questions and continue
    Skip {
        /// Return once the tool has started instead of waiting for it
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop the tool and step back to the state before the run
    Cancel,

    /// Return from error to the state it was entered from
    Retry,

    /// Stop everything and reset the record to defaults
    Reset,

    /// Record progress to a new phase
    Phase {
        /// Phase number
        phase: u32,

        /// Phase name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Write a state directly, bypassing the transition table
    SetState {
        /// One of: reset, configured, planning, planned, executing, questions, complete, error
        state: String,
    },

    /// Check that the tool is installed
    CheckTool,

    /// List questions from the questions file
    Questions {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

impl Command {
    /// Whether a run command asked to return once the tool has started
    pub fn detached(&self) -> bool {
        match self {
            Command::Plan { detach }
            | Command::Execute { detach }
            | Command::Continue { detach }
            | Command::Skip { detach }
            | Command::Answer { detach, .. } => *detach,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Parse `NUMBER=TEXT`
pub fn parse_answer(raw: &str) -> Result<(u32, String), String> {
    let (number, text) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NUMBER=TEXT, got '{}'", raw))?;
    let number = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid question number '{}'", number.trim()))?;
    Ok((number, text.trim().to_string()))
}
