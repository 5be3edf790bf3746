//! Command-line interface module for tidyguard.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing (clap)
//! - Running operations through the orchestrator and rendering their progress
//! - Asking before a restore
//! - The `restore` and `history` commands
//!
//! It never touches the filesystem itself; every change goes through the
//! orchestrator.

use crate::classifier::DEFAULT_DATE_PATTERN;
use crate::config::Config;
use crate::events::ProgressEvent;
use crate::ledger::Ledger;
use crate::orchestrator::{Operation, OperationRequest, Orchestrator, RunOutcome};
use crate::output::{OutputFormatter, RunProgress};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use log::warn;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Sort and deduplicate files, with a backup taken before every change
#[derive(Parser, Debug)]
#[command(name = "tidyguard", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Descend into subdirectories
    #[arg(short, long, global = true)]
    pub recursive: bool,

    /// Show what would happen without changing anything
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Directory snapshots are written to (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub backup_root: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Restore without asking when a run fails
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Move files into folders named after their extension
    SortByType {
        directory: PathBuf,
    },

    /// Move files into folders named after their modification date
    SortByDate {
        directory: PathBuf,

        /// strftime pattern for the folder name, may contain '/'
        #[arg(long, default_value = DEFAULT_DATE_PATTERN)]
        pattern: String,
    },

    /// Find byte-identical files
    Dedupe {
        directory: PathBuf,

        /// report-only, delete, or move-to:<directory>
        #[arg(long, default_value = "report-only")]
        disposition: String,
    },

    /// Restore the most recent snapshot of a directory
    Restore {
        directory: PathBuf,
    },

    /// Show the operation history of a directory
    History {
        directory: PathBuf,
    },
}

/// Runs the parsed command. Returns `Ok(false)` when a run failed.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use tidyguard::cli::{run_command, Args};
/// use tidyguard::config::Config;
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
///
/// let args = Args::parse_from(["tidyguard", "--dry-run", "sort-by-type", "/tmp/inbox"]);
/// if let Err(e) = run_command(&args, &Config::default(), Arc::new(AtomicBool::new(false))) {
///     eprintln!("Error: {:#}", e);
/// }
/// ```
pub fn run_command(args: &Args, config: &Config, cancel: Arc<AtomicBool>) -> Result<bool> {
    let (directory, operation) = match &args.command {
        Command::SortByType { directory } => (directory, Operation::SortByType),
        Command::SortByDate { directory, pattern } => (
            directory,
            Operation::parse("sort-by-date", Some(pattern.as_str()), None)?,
        ),
        Command::Dedupe {
            directory,
            disposition,
        } => (
            directory,
            Operation::parse("dedupe", None, Some(disposition.as_str()))?,
        ),
        Command::Restore { directory } => {
            return restore_latest(args, &orchestrator(args, config, cancel)?, directory);
        }
        Command::History { directory } => return show_history(args, directory),
    };

    run_operation(args, orchestrator(args, config, cancel)?, directory, operation)
}

fn orchestrator(args: &Args, config: &Config, cancel: Arc<AtomicBool>) -> Result<Orchestrator> {
    let mut orchestrator = Orchestrator::new(config)
        .context("Error compiling filters")?
        .with_cancel_flag(cancel);
    if let Some(root) = &args.backup_root {
        orchestrator = orchestrator.with_backup_root(root);
    }
    Ok(orchestrator)
}

fn run_operation(
    args: &Args,
    orchestrator: Orchestrator,
    directory: &Path,
    operation: Operation,
) -> Result<bool> {
    let request = OperationRequest::new(directory, operation)
        .recursive(args.recursive)
        .dry_run(args.dry_run);

    let progress = RunProgress::new(!args.json && std::io::stdout().is_terminal());
    let handle = orchestrator.spawn(request);
    for event in handle.events.iter() {
        let finished = matches!(event, ProgressEvent::Finished { .. });
        progress.handle(&event);
        if finished {
            break;
        }
    }
    progress.finish();

    match handle.join()? {
        RunOutcome::Completed(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                OutputFormatter::run_report(&report);
            }
            Ok(true)
        }
        RunOutcome::Failed(failed) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(failed.report())?);
            } else {
                OutputFormatter::failure_report(failed.report(), &failed.error().to_string());
            }

            let Some(snapshot) = failed.snapshot() else {
                OutputFormatter::info("No changes were made.");
                failed.decline();
                return Ok(false);
            };
            OutputFormatter::snapshot_summary(snapshot);

            if confirm("Restore the previous layout from this snapshot?", args.yes) {
                let report = failed.restore()?;
                OutputFormatter::restore_summary(&report);
            } else {
                let report = failed.decline();
                OutputFormatter::warning(&format!(
                    "Left as is: {} actions applied, {} not applied. Run `tidyguard restore {}` to roll back later.",
                    report.applied.len(),
                    report.not_applied.len(),
                    directory.display()
                ));
            }
            Ok(false)
        }
    }
}

fn restore_latest(args: &Args, orchestrator: &Orchestrator, directory: &Path) -> Result<bool> {
    let Some(snapshot) = orchestrator.latest_snapshot(directory)? else {
        OutputFormatter::info(&format!(
            "No snapshot recorded for {}",
            directory.display()
        ));
        return Ok(true);
    };
    OutputFormatter::snapshot_summary(&snapshot);

    if args.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Would restore {} files and remove {} created files",
            snapshot.len(),
            snapshot.created_files.len()
        ));
        return Ok(true);
    }
    if !confirm(
        "Restore this snapshot? Files it covers will be overwritten.",
        args.yes,
    ) {
        OutputFormatter::info("Restore cancelled.");
        return Ok(true);
    }

    let report = orchestrator.restore_snapshot(&snapshot)?;
    OutputFormatter::restore_summary(&report);
    Ok(report.is_complete_success())
}

fn show_history(args: &Args, directory: &Path) -> Result<bool> {
    let records = Ledger::open(directory)
        .records()
        .with_context(|| format!("Error reading history of {}", directory.display()))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        OutputFormatter::history_table(&records);
    }
    Ok(true)
}

/// Asks a yes/no question. Without a terminal the answer is no.
fn confirm(prompt: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    if !std::io::stdin().is_terminal() {
        return false;
    }
    match Confirm::new().with_prompt(prompt).default(false).interact() {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Failed to read input: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::Disposition;

    #[test]
    fn test_parse_sort_by_date_defaults() {
        let args = Args::parse_from(["tidyguard", "sort-by-date", "/tmp/x"]);
        match args.command {
            Command::SortByDate { pattern, .. } => assert_eq!(pattern, "%Y-%m"),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(!args.dry_run);
        assert!(!args.recursive);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "tidyguard",
            "dedupe",
            "/tmp/x",
            "--disposition",
            "move-to:dupes",
            "-r",
            "--dry-run",
            "--json",
        ]);
        assert!(args.recursive);
        assert!(args.dry_run);
        assert!(args.json);
        let Command::Dedupe { disposition, .. } = &args.command else {
            panic!("expected dedupe");
        };
        assert_eq!(
            Operation::parse("dedupe", None, Some(disposition.as_str())).unwrap(),
            Operation::Dedupe {
                disposition: Disposition::MoveTo(PathBuf::from("dupes"))
            }
        );
    }

    #[test]
    fn test_unknown_disposition_is_an_error() {
        let args = Args::parse_from(["tidyguard", "dedupe", "/tmp/x", "--disposition", "shred"]);
        let result = run_command(&args, &Config::default(), Arc::new(AtomicBool::new(false)));
        assert!(result.is_err());
    }

    #[test]
    fn test_confirm_assumes_yes() {
        assert!(confirm("anything", true));
    }
}
