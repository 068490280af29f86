//! `validate`, `graph` and `facts`

use super::{Prepared, fact_overrides, prepare};
use crate::Context;
use crate::cli::{FactsArgs, GraphArgs, ManifestArgs};
use crate::config::Settings;
use crate::facts;
use crate::ui;
use anyhow::{Context as _, Result};
use colored::Colorize;
use declarative::{Facts, Graph, Registry};

/// Execution order, one line per resource with its notify targets
pub fn render_order(registry: &Registry, graph: &Graph) -> Vec<String> {
    let name = |id| {
        registry
            .get(id)
            .map(|r| r.reference.to_string())
            .unwrap_or_default()
    };
    let width = graph.len().to_string().len();
    graph
        .topological_order()
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let targets: Vec<String> = graph.notify_targets(id).iter().map(|&t| name(t)).collect();
            if targets.is_empty() {
                format!("{:>width$}. {}", i + 1, name(id))
            } else {
                format!("{:>width$}. {} ~> {}", i + 1, name(id), targets.join(", "))
            }
        })
        .collect()
}

fn print_order(prepared: &Prepared) {
    for line in render_order(&prepared.registry, &prepared.graph) {
        println!("  {line}");
    }
}

/// Load and check a manifest without touching the host
pub fn validate(ctx: &Context, args: ManifestArgs) -> Result<i32> {
    let prepared = prepare(&args)?;

    if !ctx.quiet {
        ui::header("Manifest");
        for source in &prepared.manifest.sources {
            ui::dim(&source.display().to_string());
        }
        ui::kv("resources", &prepared.registry.len().to_string());
        ui::kv("relationships", &prepared.graph.edges().len().to_string());
        ui::kv("excluded", &prepared.excluded.len().to_string());
        for (resource, reason) in &prepared.invalid {
            ui::warn(&format!("Skipped {resource}: {reason}"));
        }

        ui::header("Execution order");
        print_order(&prepared);
        println!();
    }
    ui::success("Manifest is valid");
    Ok(0)
}

/// Print the graph as an ordered list or as Graphviz DOT
pub fn graph(_ctx: &Context, args: GraphArgs) -> Result<i32> {
    let prepared = prepare(&args.manifest)?;
    if args.dot {
        print!("{}", prepared.graph.to_dot(&prepared.registry));
    } else {
        print_order(&prepared);
    }
    Ok(0)
}

/// Print the fact snapshot
pub fn facts(_ctx: &Context, args: FactsArgs) -> Result<i32> {
    let settings = Settings::load()?;
    let facts: Facts = facts::gather(&fact_overrides(&settings, &args.facts))?;

    if args.json {
        let json = serde_json::to_string_pretty(&facts).context("Failed to serialize facts")?;
        println!("{json}");
        return Ok(0);
    }

    let width = facts.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in facts.iter() {
        println!("  {:<width$}  {}", key.dimmed(), value);
    }
    Ok(0)
}
