//! Conductor - supervise a CLI tool through plan, execution and questions
//!
//! CLI entry point. Run commands stay in the foreground until the tool exits.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{info, warn};

use conductor::cli::{Cli, Command, OutputFormat};
use conductor::config::Config;
use conductor::orchestrator::{Conductor, StatusView};
use statusstore::State;

fn setup_logging(level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level: tracing::Level = level
        .parse()
        .map_err(|_| eyre!("Invalid log level '{}'", level))?;
    let log_file = fs::File::create(log_dir.join("conductor.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first: its log-level is the fallback for --log-level
    let config = Config::load(cli.config.as_ref(), cli.root.as_deref()).context("Failed to load configuration")?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    info!(root = %config.project.root.display(), tool = %config.tool.command, "Conductor loaded config");

    let mut supervisor = config.supervisor();
    supervisor.detached = cli.command.detached();
    let conductor = Conductor::with_supervisor(config, supervisor);

    match cli.command {
        Command::Status { format } => cmd_status(&conductor, format).await,
        Command::Configure { activity } => {
            let record = conductor.configure(activity).await?;
            println!("{} {}", "✓".green(), record.state.activity);
            Ok(())
        }
        Command::Plan { detach } => {
            let pid = conductor.generate_plan().await?;
            follow_run(&conductor, pid, detach).await
        }
        Command::Execute { detach } => {
            let pid = conductor.execute().await?;
            follow_run(&conductor, pid, detach).await
        }
        Command::Continue { detach } => {
            let pid = conductor.resume().await?;
            follow_run(&conductor, pid, detach).await
        }
        Command::Answer { answers, detach } => {
            let answers: BTreeMap<u32, String> = answers.into_iter().collect();
            let pid = conductor.answer_questions(&answers).await?;
            follow_run(&conductor, pid, detach).await
        }
        Command::Skip { detach } => {
            let pid = conductor.skip_questions().await?;
            follow_run(&conductor, pid, detach).await
        }
        Command::Cancel => {
            let outcome = conductor.cancel().await?;
            if outcome.was_running && !outcome.stopped_cleanly {
                println!("{} Tool did not stop gracefully and was killed", "!".yellow());
            }
            println!("{} Cancelled; state is now {}", "✓".green(), outcome.state.to_string().cyan());
            Ok(())
        }
        Command::Retry => {
            let record = conductor.retry().await?;
            println!("{} Back to {}", "✓".green(), record.state.state.to_string().cyan());
            Ok(())
        }
        Command::Reset => {
            conductor.reset().await?;
            println!("{} Project reset", "✓".green());
            Ok(())
        }
        Command::Phase { phase, name } => {
            let record = conductor.advance_phase(phase, name).await?;
            println!("{} {}", "✓".green(), record.state.activity);
            Ok(())
        }
        Command::SetState { state } => {
            let state: State = state.parse()?;
            let record = conductor.set_state(state).await?;
            warn!(%state, "State written directly from the command line");
            println!("{} State set to {}", "✓".green(), record.state.state.to_string().cyan());
            Ok(())
        }
        Command::CheckTool => cmd_check_tool(&conductor).await,
        Command::Questions { format } => cmd_questions(&conductor, format),
    }
}

/// Show the status record
async fn cmd_status(conductor: &Conductor, format: OutputFormat) -> Result<()> {
    let view = conductor.status().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => print_status(&view),
    }
    Ok(())
}

fn print_status(view: &StatusView) {
    let state = &view.record.state;
    let label = match state.state {
        State::Complete => state.state.to_string().green(),
        State::Error => state.state.to_string().red(),
        State::Questions => state.state.to_string().yellow(),
        _ => state.state.to_string().cyan(),
    };
    match &view.record.unrecognized_state {
        Some(raw) => println!("State:     {} ({})", raw.red(), "unrecognized".red()),
        None => println!("State:     {}", label),
    }
    if view.plan_generated {
        let mut phase = format!("{} of {}", state.phase, state.total_phases);
        if let Some(name) = &state.phase_name {
            phase.push_str(&format!(": {}", name));
        }
        println!("Phase:     {}", phase);
        println!("Completed: {} / {}", view.completed_phases, state.total_phases);
    }
    println!("Activity:  {}", state.activity);
    if let Some(error) = &state.error {
        println!("Error:     {}", error.red());
    }
    match view.pid {
        Some(pid) => println!("Tool:      running (PID {})", pid),
        None => println!("Tool:      {}", "idle".dimmed()),
    }
    if view.stalled && view.running {
        println!("{} No status update for a while; the tool may be stuck", "!".yellow());
    }
    if view.timed_out {
        println!("{} Run has exceeded the hard timeout", "!".red());
    }
    if let Some(err) = &view.record.parse_error {
        println!("{} {}", "Parse:".yellow(), err);
    }
    let actions: Vec<String> = view.valid_actions.iter().map(|a| a.to_string()).collect();
    println!("Next:      {}", actions.join(", ").dimmed());
}

/// Stream output and timeout warnings until the run is reconciled; Ctrl-C cancels
async fn follow_run(conductor: &Conductor, pid: u32, detach: bool) -> Result<()> {
    println!("{} Started {} (PID {})", "✓".green(), conductor.config().tool.command, pid);
    if detach {
        println!("  Output is not captured; `conductor status` picks up the result when it exits");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(conductor.config().timeouts.poll_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut warned_stall = false;
    let mut warned_timeout = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                println!("{} Interrupted, cancelling...", "!".yellow());
                let outcome = conductor.cancel().await?;
                println!("{} Cancelled; state is now {}", "✓".green(), outcome.state.to_string().cyan());
                return Ok(());
            }
            _ = ticker.tick() => {
                for line in conductor.recent_output(200) {
                    println!("{}", line);
                }

                if let Some(state) = conductor.refresh_questions().await? {
                    info!(%state, "Questions detected during run");
                    println!("{} The tool has questions; see `conductor questions`", "?".yellow());
                }

                let snapshot = conductor.check_timeouts();
                if snapshot.stalled && !warned_stall {
                    warned_stall = true;
                    println!("{} No status update for over {}s; the tool may be stuck", "!".yellow(),
                        conductor.config().timeouts.stall_secs);
                }
                if snapshot.timed_out && !warned_timeout {
                    warned_timeout = true;
                    println!("{} Run exceeded {}s; consider `conductor cancel`", "!".red(),
                        conductor.config().timeouts.hard_timeout_secs);
                }

                if !conductor.supervisor().is_running() {
                    break;
                }
            }
        }
    }

    conductor.wait_idle().await;
    for line in conductor.recent_output(usize::MAX) {
        println!("{}", line);
    }

    let view = conductor.status().await?;
    println!();
    print_status(&view);
    if view.record.state.state == State::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_check_tool(conductor: &Conductor) -> Result<()> {
    let status = conductor.check_tool().await;
    if status.installed {
        let path = status.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        println!("{} {} found at {}", "✓".green(), status.tool, path);
        if let Some(version) = &status.version {
            println!("  version: {}", version);
        }
        Ok(())
    } else {
        println!("{} {} not found on PATH", "✗".red(), status.tool);
        std::process::exit(1);
    }
}

fn cmd_questions(conductor: &Conductor, format: OutputFormat) -> Result<()> {
    let questions = conductor.questions()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&questions)?),
        OutputFormat::Text => {
            if questions.is_empty() {
                println!("No questions");
            }
            for q in &questions {
                println!("{} {}", format!("Question {}:", q.number).bold(), q.topic);
                println!("  {}", q.question.replace('\n', "\n  "));
                if q.answer.is_empty() {
                    println!("  {}", "(unanswered)".yellow());
                } else {
                    println!("  Answer: {}", q.answer.green());
                }
            }
        }
    }
    Ok(())
}
