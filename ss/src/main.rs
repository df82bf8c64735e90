use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use statusstore::StatusStore;
use statusstore::cli::{Cli, Command, OutputFormat};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    match cli.command {
        Command::Show { file, format } => {
            let record = StatusStore::new(&file).read();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                OutputFormat::Text => {
                    let state = &record.state;
                    println!("State:    {}", state.state.to_string().cyan());
                    println!("Phase:    {} of {}", state.phase, state.total_phases);
                    if let Some(name) = &state.phase_name {
                        println!("Name:     {}", name);
                    }
                    println!("Activity: {}", state.activity);
                    if let Some(error) = &state.error {
                        println!("Error:    {}", error.red());
                    }
                    if let Some(updated) = state.last_updated {
                        println!("Updated:  {}", updated.to_rfc3339().dimmed());
                    }
                    println!("Source:   {:?}", record.source);
                    if let Some(err) = &record.parse_error {
                        println!("{} {}", "Parse:".yellow(), err);
                    }
                }
            }
        }
        Command::Check { file } => {
            let record = StatusStore::new(&file).read();
            match (&record.parse_error, &record.unrecognized_state) {
                (None, None) => println!("{} {} ({:?})", "✓".green(), file.display(), record.source),
                (err, raw) => {
                    if let Some(raw) = raw {
                        eprintln!("{} unrecognized state '{}'", "✗".red(), raw);
                    }
                    if let Some(err) = err {
                        eprintln!("{} {}", "✗".red(), err);
                    }
                    std::process::exit(1);
                }
            }
        }
        Command::Init { file, title } => {
            let mut store = StatusStore::new(&file);
            if let Some(title) = title {
                store = store.with_title(title);
            }
            let mut state = store.read().state;
            state.touch(chrono::Utc::now());
            store
                .write(&state)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            info!("initialized {}", file.display());
            println!("{} Wrote {}", "✓".green(), file.display());
        }
    }

    Ok(())
}
