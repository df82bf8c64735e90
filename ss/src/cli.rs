//! CLI argument parsing for statusstore

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "statusstore")]
#[command(author, version, about = "Inspect and initialize STATUS.md records", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the parsed record
    Show {
        /// Status file to read
        #[arg(default_value = crate::STATUS_FILE)]
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Exit non-zero when the file does not parse cleanly
    Check {
        /// Status file to read
        #[arg(default_value = crate::STATUS_FILE)]
        file: PathBuf,
    },

    /// Write a default record if none exists, or rewrite the current one in the structured format
    Init {
        /// Status file to write
        #[arg(default_value = crate::STATUS_FILE)]
        file: PathBuf,

        /// Project title for the readable body
        #[arg(short, long)]
        title: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
