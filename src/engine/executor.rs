//! Apply runs with stackform's UI: plan display, confirmation, progress
//! and the final report.

use anyhow::Result;
use colored::Colorize;
use declarative::{
    ApplyEnv, AutoConfirm, ConfirmCallback, ExecuteOptions, ExecuteSummary, ExecutionPlan,
    ExecutionReport, Lifecycle, execute,
};
use serde_json::Value;
use std::collections::BTreeMap;

use super::differ::display_plan;
use crate::progress::ApplyProgress;
use crate::ui;

/// Options for an apply or destroy run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Show the plan only
    pub dry_run: bool,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Verbose handler output
    pub verbose: bool,
    /// Hide progress output
    pub quiet: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            yes: false,
            verbose: false,
            quiet: false,
        }
    }
}

/// Interactive confirmation via dialoguer
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        use dialoguer::Confirm;

        println!();
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}

/// Display, confirm and apply a plan; `None` for dry runs
pub fn run(plan: &ExecutionPlan, env: &ApplyEnv<'_>, opts: &ApplyOptions) -> Result<Option<ExecutionReport>> {
    display_plan(plan);

    if opts.dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(None);
    }

    let exec_opts = ExecuteOptions {
        jobs: opts.jobs,
        verbose: opts.verbose,
    };
    let mut progress = ApplyProgress::new(opts.quiet);
    let report = if opts.yes || !plan.has_changes() {
        execute(plan, env, &exec_opts, &mut progress, &mut AutoConfirm)?
    } else {
        execute(plan, env, &exec_opts, &mut progress, &mut PromptConfirm)?
    };

    if plan.has_changes() && !report.declined {
        print_report(&report);
    }
    print_outputs(&report.outputs);
    Ok(Some(report))
}

/// Print failures and the final summary
pub fn print_report(report: &ExecutionReport) {
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("  {}", "Failures".red().bold());
        for outcome in &failures {
            let cause = outcome
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            println!("    {} {}", "✗".red(), outcome.address.bold());
            println!("      {}", cause);
            if let Some(error) = &outcome.error {
                println!("      {}", error.category().advice().dimmed());
            }
        }
    }

    let skipped: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status == Lifecycle::Skipped && o.action.is_change())
        .collect();
    if !skipped.is_empty() && !failures.is_empty() {
        println!();
        println!("  {}", "Skipped".yellow().bold());
        for outcome in skipped {
            println!(
                "    {} {} {}",
                "⊘".yellow(),
                outcome.address,
                format!("({})", outcome.reason.as_deref().unwrap_or("not attempted")).dimmed()
            );
        }
    }

    if report.cancelled {
        println!();
        ui::warn("Run cancelled; remaining resources were not started");
    }

    print_summary(&report.summary());
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.failed == 0 && summary.total_changes() > 0 {
        println!("  {} Apply complete!", "✓".green().bold());
    } else if summary.failed > 0 {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    } else {
        println!("  {} Nothing was changed", "ℹ".blue());
    }

    for line in summary_lines(summary) {
        println!("    • {line}");
    }
}

/// Bullet lines for non-zero counters
pub fn summary_lines(summary: &ExecuteSummary) -> Vec<String> {
    [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.skipped, "skipped"),
        (summary.failed, "failed"),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, verb)| format!("{} {verb}", ui::plural(count, "resource")))
    .collect()
}

/// Print root outputs as `name = value`
pub fn print_outputs(outputs: &BTreeMap<String, Value>) {
    if outputs.is_empty() {
        return;
    }
    ui::header("Outputs");
    for (name, value) in outputs {
        println!("  {} = {}", name.cyan(), render_output(value));
    }
}

/// Strings print bare, everything else as JSON
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
