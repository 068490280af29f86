//! Terminal progress for convergence runs

use crate::display;
use crate::ui;
use declarative::{ExecutionResult, LogEntry, Phase, ProgressCallback, ResourceRef, RunReport};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over the apply pass, printing a line per change
pub struct BarProgress {
    bar: ProgressBar,
    /// Also print unchanged resources
    verbose: bool,
    quiet: bool,
}

impl BarProgress {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose,
            quiet,
        }
    }

    fn print(&self, line: &str) {
        self.bar.suspend(|| println!("{line}"));
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize, dry_run: bool) {
        if self.quiet {
            return;
        }
        self.bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("=>-"));
        }
        self.bar
            .set_prefix(if dry_run { "planning" } else { "converging" });
    }

    fn on_resource_start(&mut self, resource: &ResourceRef, phase: Phase) {
        let label = match phase {
            Phase::Apply => resource.to_string(),
            Phase::Refresh => format!("refresh {resource}"),
        };
        self.bar.set_message(ui::truncate_path(&label, 40));
    }

    fn on_resource_complete(&mut self, resource: &ResourceRef, phase: Phase, result: &ExecutionResult) {
        if phase == Phase::Apply {
            self.bar.inc(1);
        }
        if self.quiet {
            return;
        }
        let quiet_result = matches!(result, ExecutionResult::Unchanged | ExecutionResult::Pending { .. });
        if quiet_result && !self.verbose {
            return;
        }
        let entry = LogEntry {
            resource: resource.clone(),
            phase,
            result: result.clone(),
        };
        self.print(&display::result_line(&entry));
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
