//! Report rendering for the terminal

use colored::{ColoredString, Colorize};
use declarative::{Drift, DriftSummary, ExecutionResult, LogEntry, Phase, RunReport, RunStatus};
use std::collections::BTreeMap;

/// Symbol for a resource's drift: create, remove or modify
fn drift_symbol(drift: &[Drift]) -> ColoredString {
    match drift.iter().find(|d| d.is_ensure()) {
        Some(d) if d.desired == "absent" => "-".red(),
        Some(d) if d.current.as_deref() == Some("absent") => "+".green(),
        _ => "~".yellow(),
    }
}

/// Render a value the way manifests spell it
fn render(property: &str, value: &str) -> String {
    if property == "mode"
        && let Ok(mode) = value.parse::<u32>()
    {
        return format!("{mode:04o}");
    }
    value.to_string()
}

/// Unified diff lines of a content change, colored
fn content_diff(current: &str, desired: &str) -> Vec<String> {
    let diff = similar::TextDiff::from_lines(current, desired);
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let text = change.to_string_lossy();
        let text = text.trim_end_matches('\n');
        match change.tag() {
            similar::ChangeTag::Delete => lines.push(format!("- {text}").red().to_string()),
            similar::ChangeTag::Insert => lines.push(format!("+ {text}").green().to_string()),
            similar::ChangeTag::Equal => {}
        }
    }
    lines
}

/// Description lines for one drifted property
pub fn drift_lines(drift: &Drift) -> Vec<String> {
    match (drift.property.as_str(), drift.current.as_deref()) {
        ("ensure", Some(current)) => vec![format!("ensure: {current} → {}", drift.desired)],
        (property, Some(_)) if drift.is_redacted() => vec![format!("{property}: (sensitive value changed)")],
        ("content", Some(current)) => {
            let mut lines = vec!["content:".to_string()];
            lines.extend(content_diff(current, &drift.desired).into_iter().map(|l| format!("  {l}")));
            lines
        }
        (property, Some(current)) => vec![format!(
            "{property}: {} → {}",
            render(property, current),
            render(property, &drift.desired)
        )],
        (property, None) => vec![format!("{property}: (unknown) → {}", render(property, &drift.desired))],
    }
}

/// Display pending changes of a no-op run, grouped by type
pub fn display_plan(report: &RunReport) {
    let pending: Vec<(&LogEntry, &[Drift])> = report
        .entries()
        .iter()
        .filter(|e| e.phase == Phase::Apply)
        .filter_map(|e| match &e.result {
            ExecutionResult::Pending { drift } => Some((e, drift.as_slice())),
            _ => None,
        })
        .collect();
    let refreshes = report.refreshed();

    if pending.is_empty() && refreshes.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    let mut by_type: BTreeMap<&str, Vec<(&LogEntry, &[Drift])>> = BTreeMap::new();
    for &(entry, drift) in &pending {
        by_type
            .entry(entry.resource.kind.as_str())
            .or_default()
            .push((entry, drift));
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Changes".bold()
    );
    println!("│");

    let mut summary = DriftSummary::default();
    for (kind, entries) in &by_type {
        println!("│ {}", kind.bold());
        for (entry, drift) in entries {
            summary.add(drift);
            println!("│   {} {}", drift_symbol(drift), entry.resource);
            let is_lifecycle = drift.iter().any(Drift::is_ensure);
            for d in drift.iter() {
                for line in drift_lines(d) {
                    let line = if is_lifecycle { line.dimmed().to_string() } else { line };
                    println!("│       {line}");
                }
            }
        }
        println!("│");
    }

    if !refreshes.is_empty() {
        println!("│ {}", "refresh".bold());
        for resource in &refreshes {
            println!("│   {} {}", "↻".cyan(), resource);
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to add, {} to change, {} to remove, {} to refresh",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        refreshes.len().to_string().cyan()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

/// One colored line for a finished resource
pub fn result_line(entry: &LogEntry) -> String {
    let what = match entry.phase {
        Phase::Apply => entry.resource.to_string(),
        Phase::Refresh => format!("{} (refresh)", entry.resource),
    };
    match &entry.result {
        ExecutionResult::Unchanged => format!("  {} {}", "·".dimmed(), what.dimmed()),
        ExecutionResult::Changed { outcome, .. } => {
            format!("  {} {} {}", "✓".green(), what, outcome.to_string().dimmed())
        }
        ExecutionResult::Pending { .. } => {
            format!("  {} {} {}", "~".yellow(), what, "would change".dimmed())
        }
        ExecutionResult::Failed { reason } => format!("  {} {}: {}", "✗".red(), what, reason.red()),
        ExecutionResult::Skipped { reason } => {
            format!("  {} {} {}", "⊘".yellow(), what, format!("({reason})").dimmed())
        }
    }
}

/// Print final summary
pub fn print_summary(report: &RunReport) {
    let summary = report.summary();
    println!();
    match report.status() {
        RunStatus::Failed => println!("  {} Converged with failures", "⚠".yellow().bold()),
        RunStatus::Changed if report.dry_run => {
            println!("  {} Dry run - no changes made", "ℹ".blue());
        }
        RunStatus::Changed => println!("  {} Host converged", "✓".green().bold()),
        RunStatus::Unchanged => println!("  {} Host already converged", "✓".green().bold()),
    }

    if summary.changed > 0 {
        println!("    • {} resources changed", summary.changed);
    }
    if summary.pending > 0 {
        println!("    • {} resources would change", summary.pending);
    }
    if summary.refreshes > 0 {
        println!("    • {} refreshes", summary.refreshes);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    println!(
        "    {}",
        format!(
            "{} resources in {:.1}s",
            summary.total,
            report.duration().num_milliseconds() as f64 / 1000.0
        )
        .dimmed()
    );

    let failures = report.failures();
    if !failures.is_empty() {
        println!();
        for entry in failures {
            println!("{}", result_line(entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drift(property: &str, desired: &str, current: Option<&str>) -> Drift {
        Drift {
            property: property.into(),
            desired: desired.into(),
            current: current.map(Into::into),
        }
    }

    #[test]
    fn test_mode_rendered_in_octal() {
        colored::control::set_override(false);
        let lines = drift_lines(&drift("mode", "416", Some("420")));
        assert_eq!(lines, vec!["mode: 0644 → 0640"]);
    }

    #[test]
    fn test_content_diff_shows_changed_lines() {
        colored::control::set_override(false);
        let lines = drift_lines(&drift(
            "content",
            "Listen 80\nServerName web\n",
            Some("Listen 8080\nServerName web\n"),
        ));
        assert_eq!(lines, vec!["content:", "  - Listen 8080", "  + Listen 80"]);
    }

    #[test]
    fn test_sensitive_content_is_not_diffed() {
        colored::control::set_override(false);
        let lines = drift_lines(&drift("content", "[redacted]", Some("[redacted]")));
        assert_eq!(lines, vec!["content: (sensitive value changed)"]);
    }

    #[test]
    fn test_unknown_current_value() {
        colored::control::set_override(false);
        let lines = drift_lines(&drift("enable", "true", None));
        assert_eq!(lines, vec!["enable: (unknown) → true"]);
    }

    #[test]
    fn test_drift_symbol() {
        colored::control::set_override(false);
        assert_eq!(drift_symbol(&[drift("ensure", "file", Some("absent"))]).to_string(), "+");
        assert_eq!(drift_symbol(&[drift("ensure", "absent", Some("file"))]).to_string(), "-");
        assert_eq!(drift_symbol(&[drift("mode", "416", Some("420"))]).to_string(), "~");
    }
}
