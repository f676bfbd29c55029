//! Plan display

use colored::{ColoredString, Colorize};
use declarative::{ActionKind, AttributeChange, DiffSummary, ExecutionPlan, PlannedAction, group_by_type};

use crate::ui;

/// Print a plan grouped by resource type
pub fn display_plan(plan: &ExecutionPlan) {
    for line in render_plan(plan) {
        println!("{line}");
    }
}

/// Lines describing every change in a plan
pub fn render_plan(plan: &ExecutionPlan) -> Vec<String> {
    let mut lines = vec![String::new()];
    let changes: Vec<&PlannedAction> = plan.changes().collect();

    if changes.is_empty() {
        lines.push(format!(
            "  {} No changes. {} up to date.",
            "✓".green(),
            ui::plural(plan.len(), "resource")
        ));
        return lines;
    }

    let title = if plan.destroy { "Destroy Plan" } else { "Execution Plan" };
    lines.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        title.bold()
    ));
    lines.push("│".to_string());

    for (resource_type, actions) in group_by_type(&changes, |a| a.resource_type.as_str()) {
        lines.push(format!("│ {}", resource_type.bold()));
        for action in actions {
            lines.push(format!(
                "│   {} {}",
                symbol(action.kind),
                action.id()
            ));
            for reason in &action.reasons {
                lines.push(format!("│       {}", format!("# {reason}").dimmed()));
            }
            if action.kind == ActionKind::Create {
                for (name, value) in &action.config {
                    lines.push(format!("│       {}: {}", name, ui::format_value(value)));
                }
            }
            for change in &action.changes {
                lines.push(format!("│       {}", render_change(change)));
            }
        }
        lines.push("│".to_string());
    }

    lines.push("├─────────────────────────────────────────────────────┤".to_string());
    lines.push(format!("│ {}", summary_line(&plan.summary())));
    lines.push("└─────────────────────────────────────────────────────┘".to_string());
    lines
}

fn symbol(kind: ActionKind) -> ColoredString {
    match kind {
        ActionKind::Create => kind.symbol().green(),
        ActionKind::Update => kind.symbol().yellow(),
        ActionKind::Replace => kind.symbol().magenta(),
        ActionKind::Delete => kind.symbol().red(),
        ActionKind::NoOp => kind.symbol().dimmed(),
    }
}

/// One attribute change: `name: before → after`
pub fn render_change(change: &AttributeChange) -> String {
    let body = match (&change.before, &change.after) {
        (None, Some(after)) => format!("{}: {}", change.name, ui::format_value(after)),
        (Some(before), None) => format!("{}: {} → (removed)", change.name, ui::format_value(before)),
        (before, after) => format!(
            "{}: {} → {}",
            change.name,
            ui::format_optional(before.as_ref()),
            ui::format_optional(after.as_ref())
        ),
    };
    if change.forces_replacement {
        format!("{} {}", body, "(forces replacement)".red())
    } else {
        body
    }
}

/// `Plan: 2 to add, 1 to change, 0 to replace, 0 to destroy.`
pub fn summary_line(summary: &DiffSummary) -> String {
    format!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.replacements.to_string().magenta(),
        summary.removals.to_string().red()
    )
}
