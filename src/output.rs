//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking, and formatted tables. The orchestrator never prints; the CLI
//! renders its reports and events through here.

use crate::backup::{RestoreReport, Snapshot};
use crate::events::ProgressEvent;
use crate::ledger::{OperationRecord, Outcome};
use crate::mutator::PlannedAction;
use crate::orchestrator::RunReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Plans, duplicate groups, failure reports and history tables
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidyguard::output::OutputFormatter;
    /// OutputFormatter::success("Sorted 12 files");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a regular message without styling.
    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Prints the full report of a finished (or dry) run.
    pub fn run_report(report: &RunReport) {
        Self::warnings(report);
        if !report.groups.is_empty() {
            Self::duplicate_groups(report);
        }

        let actions = if report.dry_run {
            &report.planned
        } else {
            &report.applied
        };
        if report.dry_run {
            Self::dry_run_notice(&format!(
                "{} on {} would perform {} actions:",
                report.operation,
                report.root.display(),
                actions.len()
            ));
        }
        for action in actions {
            Self::plain(&format!("  {}", describe(action, &report.root)));
        }

        if !report.skipped.is_empty() {
            Self::header("SKIPPED");
            for entry in &report.skipped {
                Self::warning(&entry.reason);
            }
        }

        Self::summary_table(actions, &report.root);

        if !report.dry_run {
            Self::success(&format!(
                "{} complete: {} actions applied",
                report.operation,
                report.applied.len()
            ));
            if let Some(id) = &report.snapshot {
                Self::info(&format!("Snapshot {} can restore the previous layout", id));
            }
        }
    }

    fn warnings(report: &RunReport) {
        let _ = write_warnings(&mut std::io::stdout().lock(), report);
    }

    /// Lists duplicate groups, marking the retained member.
    pub fn duplicate_groups(report: &RunReport) {
        Self::header(&format!("DUPLICATES ({} groups)", report.groups.len()));
        for group in &report.groups {
            println!(
                "{} {} bytes, {}",
                "●".cyan(),
                group.size,
                &group.fingerprint[..12]
            );
            for member in &group.members {
                let rel = relative(&member.path, &report.root);
                if member.retained {
                    println!("    {} {}", "keep  ".green(), rel);
                } else {
                    println!("    {} {}", "remove".red(), rel);
                }
            }
        }
    }

    /// Prints a summary table with action counts per destination directory.
    pub fn summary_table(actions: &[PlannedAction], root: &Path) {
        if actions.is_empty() {
            Self::info("Nothing to do.");
            return;
        }
        Self::header("SUMMARY");

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for action in actions {
            let target = match action {
                PlannedAction::Move { to, .. } => to
                    .parent()
                    .map(|dir| relative(dir, root))
                    .unwrap_or_default(),
                PlannedAction::Delete { .. } => "(deleted)".to_string(),
            };
            *counts.entry(target).or_insert(0) += 1;
        }

        let width = counts.keys().map(|name| name.len()).max().unwrap_or(0).max(11);

        println!(
            "{:<width$} | {}",
            "Destination".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));
        for (target, count) in &counts {
            println!(
                "{:<width$} | {} {}",
                target,
                count.to_string().green(),
                if *count == 1 { "file" } else { "files" },
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            actions.len().to_string().green().bold(),
            if actions.len() == 1 { "file" } else { "files" },
            width = width
        );
    }

    /// Reports exactly which actions of a failed run were and were not applied.
    pub fn failure_report(report: &RunReport, error: &str) {
        Self::warnings(report);
        Self::error(&format!(
            "{} on {} failed: {}",
            report.operation,
            report.root.display(),
            error
        ));

        Self::header(&format!("APPLIED ({})", report.applied.len()));
        for action in &report.applied {
            println!("  {} {}", "✓".green(), describe(action, &report.root));
        }
        Self::header(&format!("NOT APPLIED ({})", report.not_applied.len()));
        for action in &report.not_applied {
            println!("  {} {}", "✗".red(), describe(action, &report.root));
        }
    }

    /// Describes a snapshot before asking to restore it.
    pub fn snapshot_summary(snapshot: &Snapshot) {
        Self::info(&format!(
            "Snapshot {} of {} taken {} holds {} files",
            snapshot.id,
            snapshot.source_root.display(),
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.len()
        ));
    }

    pub fn restore_summary(report: &RestoreReport) {
        if report.is_complete_success() {
            Self::success(&format!(
                "Restored {} files, removed {} created files",
                report.restored_files, report.removed_files
            ));
        } else {
            Self::warning(&format!(
                "Restored {} files with {} failures:",
                report.restored_files,
                report.failures.len()
            ));
            for (path, reason) in &report.failures {
                Self::error(&format!("{}: {}", path.display(), reason));
            }
        }
    }

    /// Prints the ledger of a directory, oldest first.
    pub fn history_table(records: &[OperationRecord]) {
        if records.is_empty() {
            Self::info("No recorded operations.");
            return;
        }
        Self::header("HISTORY");
        for record in records {
            let outcome = match record.outcome {
                Outcome::Success => "success".green(),
                Outcome::Failed => "failed".red(),
            };
            println!(
                "{}  {:<13} {:<8} {}",
                record
                    .timestamp
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S"),
                record.operation.to_string(),
                outcome,
                record.snapshot.as_deref().unwrap_or("-")
            );
        }
    }
}

/// Writes a run's warnings, one per line, as [`OutputFormatter::warning`] does.
fn write_warnings<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
    for warning in &report.warnings {
        writeln!(out, "{} {}", "⚠".yellow(), warning)?;
    }
    Ok(())
}

fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn describe(action: &PlannedAction, root: &Path) -> String {
    match action {
        PlannedAction::Move { from, to } => {
            format!("{} -> {}", relative(from, root), relative(to, root))
        }
        PlannedAction::Delete { path } => format!("delete {}", relative(path, root)),
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Renders a run's progress events as a spinner, then a bar over the plan.
pub struct RunProgress {
    bar: Option<ProgressBar>,
}

impl RunProgress {
    /// A hidden progress display when `enabled` is false (e.g. JSON output).
    pub fn new(enabled: bool) -> Self {
        let bar = enabled.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner.set_message("Scanning");
            spinner
        });
        Self { bar }
    }

    pub fn handle(&self, event: &ProgressEvent) {
        let Some(bar) = &self.bar else {
            return;
        };
        match event {
            ProgressEvent::FileScanned(path) | ProgressEvent::FileHashed(path) => {
                bar.set_message(format!("{}", path.display()));
                bar.tick();
            }
            ProgressEvent::PlanReady { actions } => {
                bar.set_style(bar_style());
                bar.set_length(*actions as u64);
                bar.set_position(0);
                bar.set_message("Applying");
            }
            ProgressEvent::BackupCreated { id, files } => {
                bar.set_message(format!("Backed up {} files ({})", files, id));
            }
            ProgressEvent::ActionApplied { .. } => bar.inc(1),
            // Warnings are printed with the report.
            _ => {}
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
