//! Run reporting - progress bar, confirmation and summaries

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reconcile::{
    ExecuteSummary, OperationKind, OperationOutcome, OperationStatus, ProgressCallback, RunReport,
};

/// Progress bar fed by the scheduler
pub struct BarProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl BarProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let bar = ProgressBar::hidden();
        if !quiet {
            bar.set_draw_target(ProgressDrawTarget::stderr());
        }
        bar.set_style(
            ProgressStyle::with_template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar, verbose }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, operations: usize) {
        self.bar.set_length(operations as u64);
        self.bar.set_position(0);
    }

    fn on_operation_start(&mut self, resource: &str, kind: OperationKind) {
        self.bar.set_message(format!("{kind} {resource}"));
        if self.verbose {
            self.bar.println(format!("    {} {kind} {resource}", "→".cyan()));
        }
    }

    fn on_operation_complete(&mut self, outcome: &OperationOutcome) {
        if outcome.kind.is_change() || outcome.status != OperationStatus::Succeeded {
            self.bar.println(outcome_line(outcome));
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// One settled operation, as shown above the bar
pub fn outcome_line(outcome: &OperationOutcome) -> String {
    let symbol = match outcome.status {
        OperationStatus::Succeeded if outcome.kind.is_change() => "✓".green(),
        OperationStatus::Succeeded => "○".dimmed(),
        OperationStatus::Failed => "✗".red(),
        OperationStatus::Skipped => "⊘".yellow(),
    };
    let retries = if outcome.attempts > 1 {
        format!(" after {} attempts", outcome.attempts)
    } else {
        String::new()
    };
    let detail = match outcome.status {
        OperationStatus::Succeeded => format!("{}{retries}", outcome.kind),
        OperationStatus::Failed => format!("{} failed{retries}", outcome.kind),
        OperationStatus::Skipped => format!("{} skipped", outcome.kind),
    };
    format!("    {} {:<30} {}", symbol, outcome.resource, detail.dimmed())
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary, action: &str) {
    println!();
    if summary.is_success() {
        println!("  {} {} completed successfully!", "✓".green().bold(), action);
    } else {
        println!("  {} {} completed with errors", "⚠".yellow().bold(), action);
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print the cause of every failed or skipped operation
pub fn print_failures(report: &RunReport) {
    let failures: Vec<_> = report.failures().collect();
    if failures.is_empty() {
        return;
    }

    println!();
    println!("  {}", "Problems".red().bold());
    for outcome in failures {
        let cause = outcome.error.as_deref().unwrap_or("no cause reported");
        println!("    {} {}: {}", "•".red(), outcome.resource.bold(), cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OperationKind, status: OperationStatus, attempts: u32) -> OperationOutcome {
        OperationOutcome {
            resource: "redis".to_string(),
            kind,
            status,
            attempts,
            error: None,
        }
    }

    #[test]
    fn test_outcome_line_mentions_retries() {
        colored::control::set_override(false);
        let line = outcome_line(&outcome(OperationKind::Create, OperationStatus::Succeeded, 3));
        assert!(line.contains("✓ redis"));
        assert!(line.ends_with("create after 3 attempts"));

        let line = outcome_line(&outcome(OperationKind::Update, OperationStatus::Failed, 1));
        assert!(line.ends_with("update failed"));

        let line = outcome_line(&outcome(OperationKind::Delete, OperationStatus::Skipped, 0));
        assert!(line.contains("⊘"));
        assert!(line.ends_with("delete skipped"));
    }

    #[test]
    fn test_hidden_progress_accepts_callbacks() {
        let mut progress = BarProgress::new(true, false);
        progress.on_run_start(2);
        progress.on_operation_start("redis", OperationKind::Create);
        progress.on_operation_complete(&outcome(OperationKind::Create, OperationStatus::Succeeded, 1));
        progress.on_operation_complete(&outcome(OperationKind::NoOp, OperationStatus::Succeeded, 0));
        assert_eq!(progress.bar.position(), 2);
        progress.on_run_complete();
    }
}
