//! `apply` and `plan`

use super::{Prepared, prepare};
use crate::Context;
use crate::cli::{ApplyArgs, ManifestArgs};
use crate::display;
use crate::progress::BarProgress;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use declarative::{FailurePolicy, NoProgress, RunOptions, RunReport, RunStatus, converge};
use std::path::Path;

fn run_options(prepared: &Prepared, args: &ApplyArgs) -> Result<RunOptions> {
    let jobs = args.jobs.unwrap_or(prepared.settings.jobs);
    if jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    Ok(RunOptions {
        dry_run: args.noop,
        jobs,
        failure_policy: if args.abort_on_failure {
            FailurePolicy::Abort
        } else {
            prepared.settings.failure_policy
        },
    })
}

fn write_report(path: Option<&Path>, report: &RunReport) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    log::info!("Wrote run report to {}", path.display());
    Ok(())
}

fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

fn announce(ctx: &Context, prepared: &Prepared) {
    if ctx.quiet {
        return;
    }
    ui::info(&format!(
        "{} resources from {} manifest files",
        prepared.registry.len(),
        prepared.manifest.sources.len()
    ));
    if !prepared.excluded.is_empty() {
        ui::dim(&format!(
            "{} declarations excluded by conditions",
            prepared.excluded.len()
        ));
    }
    for (resource, reason) in &prepared.invalid {
        ui::warn(&format!("Skipped {resource}: {reason}"));
    }
}

/// Converge the host; returns the process exit code
pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<i32> {
    let prepared = prepare(&args.manifest)?;
    let opts = run_options(&prepared, &args)?;
    announce(ctx, &prepared);

    if opts.dry_run {
        let mut progress = BarProgress::new(ctx.verbose > 0, ctx.quiet);
        let report = converge(
            &prepared.registry,
            &prepared.graph,
            &prepared.providers,
            &prepared.facts,
            &opts,
            &mut progress,
        );
        if !ctx.quiet {
            display::display_plan(&report);
            display::print_summary(&report);
        }
        write_report(args.report.as_deref(), &report)?;
        return Ok(report.exit_code());
    }

    if !args.yes {
        let preview = converge(
            &prepared.registry,
            &prepared.graph,
            &prepared.providers,
            &prepared.facts,
            &RunOptions {
                dry_run: true,
                ..opts
            },
            &mut NoProgress,
        );
        display::display_plan(&preview);
        if preview.status() == RunStatus::Unchanged {
            write_report(args.report.as_deref(), &preview)?;
            return Ok(0);
        }
        if !confirm_proceed()? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(0);
        }
    }

    // Values generated for this run must exist on disk before anything embeds them
    let saved = prepared.secrets.persist()?;
    if saved > 0 {
        log::info!("Saved {saved} generated secrets");
    }

    let mut progress = BarProgress::new(ctx.verbose > 0, ctx.quiet);
    let report = converge(
        &prepared.registry,
        &prepared.graph,
        &prepared.providers,
        &prepared.facts,
        &opts,
        &mut progress,
    );
    if !ctx.quiet {
        display::print_summary(&report);
    }
    write_report(args.report.as_deref(), &report)?;
    Ok(report.exit_code())
}

/// Show what would change; same exit codes as a no-op apply
pub fn plan(ctx: &Context, args: ManifestArgs) -> Result<i32> {
    apply(
        ctx,
        ApplyArgs {
            manifest: args,
            noop: true,
            jobs: None,
            abort_on_failure: false,
            yes: true,
            report: None,
        },
    )
}
