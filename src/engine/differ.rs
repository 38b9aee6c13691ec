//! Plan display - dockyard-specific UI

use crate::ui::{format_value, truncate};
use colored::{ColoredString, Colorize};
use reconcile::{Operation, OperationKind, Plan, PropertyChange, ResourceKind};
use std::collections::BTreeMap;

const VALUE_WIDTH: usize = 48;

/// Display a plan in a user-friendly format
pub fn display_plan(stack: &str, plan: &Plan, verbose: bool) {
    for line in plan_lines(stack, plan, verbose) {
        println!("{line}");
    }
}

/// Lines of the plan box; no-op entries only when `verbose`
pub fn plan_lines(stack: &str, plan: &Plan, verbose: bool) -> Vec<String> {
    let mut lines = vec![String::new()];

    if !plan.has_changes() {
        lines.push(format!(
            "  {} No changes needed for stack {}",
            "✓".green(),
            stack.bold()
        ));
        return lines;
    }

    // Group by resource kind
    let mut by_kind: BTreeMap<ResourceKind, Vec<&Operation>> = BTreeMap::new();
    for op in plan.operations() {
        if op.kind.is_change() || verbose {
            by_kind.entry(op.resource_kind).or_default().push(op);
        }
    }

    lines.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        format!("Plan for stack {stack}").bold()
    ));
    lines.push("│".to_string());

    for (kind, ops) in &by_kind {
        let title = match kind {
            ResourceKind::Network => "Networks",
            ResourceKind::Image => "Images",
            ResourceKind::Container => "Containers",
        };
        lines.push(format!("│ {}", title.bold()));

        for op in ops {
            lines.push(format!(
                "│   {:<3} {:<30} {}",
                symbol(op.kind),
                op.resource,
                describe(op).dimmed()
            ));
            if matches!(op.kind, OperationKind::Update | OperationKind::Replace) {
                for change in &op.changes {
                    lines.push(format!("│         {}", change_line(op.resource_kind, change)));
                }
            }
        }
        lines.push("│".to_string());
    }

    let summary = plan.summary();
    lines.push("├─────────────────────────────────────────────────────┤".to_string());
    lines.push(format!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to delete ({} unchanged)",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red(),
        summary.unchanged
    ));
    lines.push("└─────────────────────────────────────────────────────┘".to_string());
    lines
}

fn symbol(kind: OperationKind) -> ColoredString {
    match kind {
        OperationKind::Create => kind.symbol().green(),
        OperationKind::Update => kind.symbol().yellow(),
        OperationKind::Replace => kind.symbol().magenta(),
        OperationKind::Delete => kind.symbol().red(),
        OperationKind::NoOp => "○".dimmed(),
    }
}

fn describe(op: &Operation) -> String {
    match op.kind {
        OperationKind::Create => "(new)".to_string(),
        OperationKind::Delete => "(will remove)".to_string(),
        OperationKind::NoOp => "(unchanged)".to_string(),
        OperationKind::Update => format!("({} changed)", op.changes.len()),
        OperationKind::Replace => match &op.reason {
            Some(reason) => format!("({reason})"),
            None => "(replace)".to_string(),
        },
    }
}

fn change_line(kind: ResourceKind, change: &PropertyChange) -> String {
    let render = |value: &Option<serde_json::Value>| {
        value
            .as_ref()
            .map_or_else(|| "(none)".to_string(), |v| truncate(&format_value(v), VALUE_WIDTH))
    };
    let forces = if kind.is_immutable(&change.property) {
        format!(" {}", "[forces replacement]".red())
    } else {
        String::new()
    };
    format!(
        "{}: {} → {}{}",
        change.property,
        render(&change.before),
        render(&change.after),
        forces
    )
}
