//! Progress display for apply runs.

use colored::Colorize;
use declarative::{ActionKind, Lifecycle, ProgressCallback, ResourceOutcome};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress bar driven by the executor's scheduling thread
pub struct ApplyProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, quiet }
    }
}

/// Symbol for a terminal outcome
pub fn outcome_symbol(outcome: &ResourceOutcome) -> String {
    match outcome.status {
        Lifecycle::Applied if outcome.action == ActionKind::NoOp => "○".dimmed().to_string(),
        Lifecycle::Applied => "✓".green().to_string(),
        Lifecycle::Failed => "✗".red().to_string(),
        _ => "⊘".yellow().to_string(),
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn on_resource_start(&mut self, address: &str, action: ActionKind) {
        self.bar.set_message(format!("{action} {address}"));
    }

    fn on_resource_complete(&mut self, outcome: &ResourceOutcome) {
        if outcome.action.is_change() && !self.quiet {
            let line = match outcome.status {
                Lifecycle::Applied => format!("{} {}", outcome.action, outcome.address),
                Lifecycle::Failed => format!("{} {} failed", outcome.action, outcome.address),
                _ => format!(
                    "{} skipped ({})",
                    outcome.address,
                    outcome.reason.as_deref().unwrap_or("not attempted")
                ),
            };
            self.bar
                .println(format!("  {} {}", outcome_symbol(outcome), line));
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
