//! Human-readable output for plans, apply results and drift reports

use colored::{ColoredString, Colorize};
use fleetform_cloud::{
    ActionType, ApplyResult, ApplyStatus, AttributeChange, DriftReport, DriftStatus, Plan,
    StepOutcome,
};
use serde_json::Value;

fn paint(action: ActionType, text: &str) -> ColoredString {
    match action {
        ActionType::Create => text.green(),
        ActionType::Update => text.yellow(),
        ActionType::Replace => text.magenta(),
        ActionType::Destroy => text.red(),
        ActionType::NoOp => text.dimmed(),
    }
}

fn show(value: &Option<Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "(none)".to_string(),
    }
}

fn print_change(action: ActionType, change: &AttributeChange) {
    let line = match action {
        ActionType::Create if change.known_after_apply => {
            format!("{} = (known after apply)", change.name)
        }
        ActionType::Create => format!("{} = {}", change.name, show(&change.after)),
        ActionType::Destroy => format!("{} = {}", change.name, show(&change.before)),
        _ => change.to_string(),
    };
    if change.forces_replace {
        println!("      {}", line.red());
    } else {
        println!("      {}", line);
    }
}

pub fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "fleetform will perform the following actions:".bold());
    println!();
    for step in plan.steps.iter().filter(|s| s.has_changes() || s.metadata_only) {
        let head = format!("{:>3} {}", step.action.symbol(), step.address);
        let mut detail = format!("({}", step.action);
        if let Some(strategy) = step.replace_strategy {
            detail.push_str(&format!(", {}", strategy));
        }
        if let Some(phase) = step.phase {
            detail.push_str(&format!(", {}", phase));
        }
        if step.metadata_only {
            detail.push_str(", lifecycle metadata only");
        }
        detail.push(')');
        println!("{} {}", paint(step.action, &head).bold(), detail.dimmed());
        if let Some(reason) = &step.blocked {
            println!("      {} {}", "BLOCKED:".red().bold(), reason);
        }
        for change in &step.changes {
            print_change(step.action, change);
        }
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}

pub fn print_apply_result(result: &ApplyResult) {
    println!();
    for report in &result.steps {
        if report.action == ActionType::NoOp && report.outcome == StepOutcome::Succeeded {
            continue;
        }
        let mark = match report.outcome {
            StepOutcome::Succeeded => "✓".green(),
            StepOutcome::Failed => "✗".red(),
            StepOutcome::Skipped => "↷".yellow(),
            StepOutcome::Blocked => "⊘".red(),
            StepOutcome::NotStarted => "·".dimmed(),
        };
        let mut line = match report.phase {
            Some(phase) => format!("  {} {} ({}, {})", mark, report.address, report.action, phase),
            None => format!("  {} {} ({})", mark, report.address, report.action),
        };
        if report.attempts > 1 {
            line.push_str(&format!(" after {} attempts", report.attempts));
        }
        if report.outcome != StepOutcome::Succeeded {
            line.push_str(&format!(": {}", report.outcome));
        }
        println!("{}", line);
        if let Some(error) = &report.error {
            println!("      {}", error.dimmed());
        }
    }

    println!();
    let elapsed = result.duration_ms as f64 / 1000.0;
    match result.status {
        ApplyStatus::Success => println!(
            "{} ({:.1}s)",
            "✓ Apply complete".green().bold(),
            elapsed
        ),
        ApplyStatus::PartialFailure => println!(
            "{} ({:.1}s)",
            "⚠ Apply partially failed; completed steps were saved to state"
                .yellow()
                .bold(),
            elapsed
        ),
        ApplyStatus::Failure => println!("{} ({:.1}s)", "✗ Apply failed".red().bold(), elapsed),
    }
    if result.cancelled {
        println!("{}", "Apply was interrupted; run it again to continue.".yellow());
    }
}

pub fn print_drift(report: &DriftReport) {
    println!();
    if report.is_clean() {
        println!(
            "{} ({} resources checked)",
            "✓ No drift detected".green().bold(),
            report.in_sync
        );
        return;
    }

    for entry in &report.entries {
        let status = match entry.status {
            DriftStatus::Modified => "~ modified".yellow(),
            DriftStatus::Deleted => "- deleted".red(),
            DriftStatus::Unreadable => "? unreadable".magenta(),
        };
        let mut line = format!("{} {} [{}]", status, entry.address, entry.id);
        if !entry.declared {
            line.push_str(" (no longer declared)");
        }
        println!("{}", line);
        for change in &entry.changes {
            println!(
                "      {}: {} (stored) -> {} (live)",
                change.name,
                show(&change.before),
                show(&change.after)
            );
        }
        if let Some(error) = &entry.error {
            println!("      {}", error.dimmed());
        }
    }
    println!();
    println!(
        "{} {} drifted, {} in sync",
        "Drift:".bold(),
        report.entries.len(),
        report.in_sync
    );
}
