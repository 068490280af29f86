//! Convergence scheduler - one ordered pass, then deduplicated refreshes

use crate::context::{NoProgress, ProgressCallback, ProviderContext};
use crate::diff::compute_drift;
use crate::facts::Facts;
use crate::graph::Graph;
use crate::provider::{Outcome, ProviderSet};
use crate::registry::{Registry, Resource};
use crate::report::{ExecutionResult, LogEntry, Phase, RunReport, SkipReason};
use crate::types::ResourceId;
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// What to do with the rest of the run after a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Skip dependents of the failed resource, keep converging everything else
    #[default]
    Continue,
    /// Skip every resource not yet started and the refresh phase
    Abort,
}

/// Options for a convergence run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Only report what would change; providers are never asked to apply
    pub dry_run: bool,
    /// Number of independent subgraphs converged concurrently
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

/// Converge every registered resource and return the run report
///
/// Resources are visited in the graph's execution order. A resource whose
/// order predecessor failed or was skipped is skipped. Each resource whose
/// notifier changed is refreshed exactly once after the ordered pass, and
/// refreshes never notify further.
///
/// With `jobs > 1` weakly connected components run concurrently; results are
/// identical to a sequential run except for which resources an abort skips.
pub fn converge<P: ProgressCallback>(
    registry: &Registry,
    graph: &Graph,
    providers: &ProviderSet,
    facts: &Facts,
    opts: &RunOptions,
    progress: &mut P,
) -> RunReport {
    let started_at = Utc::now();
    let run = Run {
        registry,
        graph,
        providers,
        ctx: ProviderContext::new(facts),
        opts,
        aborted: AtomicBool::new(false),
    };

    progress.on_run_start(graph.len(), opts.dry_run);
    log::info!(
        "converging {} resources{}",
        graph.len(),
        if opts.dry_run { " (noop)" } else { "" }
    );

    let applied = run.apply_phase(progress);
    let mut entries: Vec<LogEntry> = graph
        .topological_order()
        .iter()
        .filter_map(|id| {
            let result = applied.get(id)?.clone();
            Some(LogEntry {
                resource: registry.get(*id)?.reference.clone(),
                phase: Phase::Apply,
                result,
            })
        })
        .collect();

    entries.extend(run.refresh_phase(&applied, progress));

    let report = RunReport::new(started_at, opts.dry_run, entries);
    log::info!("run finished: {}", report.status());
    progress.on_run_complete(&report);
    report
}

/// Converge without progress reporting
pub fn converge_simple(
    registry: &Registry,
    graph: &Graph,
    providers: &ProviderSet,
    facts: &Facts,
    opts: &RunOptions,
) -> RunReport {
    converge(registry, graph, providers, facts, opts, &mut NoProgress)
}

struct Run<'a> {
    registry: &'a Registry,
    graph: &'a Graph,
    providers: &'a ProviderSet,
    ctx: ProviderContext<'a>,
    opts: &'a RunOptions,
    aborted: AtomicBool,
}

impl Run<'_> {
    fn apply_phase<P: ProgressCallback>(&self, progress: &mut P) -> HashMap<ResourceId, ExecutionResult> {
        let components = self.graph.components();
        if self.opts.jobs <= 1 || components.len() <= 1 {
            return self.run_sequence(self.graph.topological_order(), progress);
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.jobs)
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("failed to create thread pool, running sequentially: {e}");
                return self.run_sequence(self.graph.topological_order(), progress);
            }
        };

        // Progress callbacks are not thread-safe; replay completions afterwards
        let partial: Vec<HashMap<ResourceId, ExecutionResult>> = pool.install(|| {
            components
                .par_iter()
                .map(|component| self.run_sequence(component, &mut NoProgress))
                .collect()
        });
        let results: HashMap<ResourceId, ExecutionResult> = partial.into_iter().flatten().collect();

        for id in self.graph.topological_order() {
            if let (Some(resource), Some(result)) = (self.registry.get(*id), results.get(id)) {
                progress.on_resource_complete(&resource.reference, Phase::Apply, result);
            }
        }
        results
    }

    /// Converge `ids` in the given order; predecessors must come first
    fn run_sequence<P: ProgressCallback>(
        &self,
        ids: &[ResourceId],
        progress: &mut P,
    ) -> HashMap<ResourceId, ExecutionResult> {
        let mut results = HashMap::with_capacity(ids.len());
        for &id in ids {
            let Some(resource) = self.registry.get(id) else {
                continue;
            };
            progress.on_resource_start(&resource.reference, Phase::Apply);
            let result = self.step(resource, &results);
            if result.is_failed() && self.opts.failure_policy == FailurePolicy::Abort {
                log::warn!("aborting run after failure of {}", resource.reference);
                self.aborted.store(true, Ordering::SeqCst);
            }
            progress.on_resource_complete(&resource.reference, Phase::Apply, &result);
            results.insert(id, result);
        }
        results
    }

    fn step(&self, resource: &Resource, done: &HashMap<ResourceId, ExecutionResult>) -> ExecutionResult {
        if self.aborted.load(Ordering::SeqCst) {
            return ExecutionResult::Skipped {
                reason: SkipReason::RunAborted,
            };
        }

        let blocked = self
            .graph
            .order_predecessors(resource.id)
            .iter()
            .find(|pred| done.get(*pred).is_some_and(ExecutionResult::blocks_dependents))
            .and_then(|pred| self.registry.get(*pred));
        if let Some(prerequisite) = blocked {
            log::warn!(
                "skipping {}: dependency {} did not converge",
                resource.reference,
                prerequisite.reference
            );
            return ExecutionResult::Skipped {
                reason: SkipReason::UpstreamFailed {
                    prerequisite: prerequisite.reference.clone(),
                },
            };
        }

        self.apply(resource)
    }

    fn apply(&self, resource: &Resource) -> ExecutionResult {
        let Some(provider) = self.providers.get(resource.kind()) else {
            return fail(resource, format!("no provider for type `{}`", resource.kind()));
        };

        let current = match provider.read_state(resource, &self.ctx) {
            Ok(current) => current,
            Err(e) => return fail(resource, format!("failed to read state: {e:#}")),
        };

        let drift = compute_drift(
            provider,
            self.registry.schema(resource.kind()),
            resource,
            &current,
        );
        if drift.is_empty() {
            log::debug!("{} is in sync", resource.reference);
            return ExecutionResult::Unchanged;
        }

        if self.opts.dry_run {
            log::info!("{} would change ({} properties)", resource.reference, drift.len());
            return ExecutionResult::Pending { drift };
        }

        match provider.apply_state(resource, &current, &self.ctx) {
            Ok(Outcome::NoChange) => ExecutionResult::Unchanged,
            Ok(outcome) => {
                log::info!("{}: {outcome}", resource.reference);
                ExecutionResult::Changed { outcome, drift }
            }
            Err(e) => fail(resource, format!("{e:#}")),
        }
    }

    fn refresh_phase<P: ProgressCallback>(
        &self,
        applied: &HashMap<ResourceId, ExecutionResult>,
        progress: &mut P,
    ) -> Vec<LogEntry> {
        // Keyed by execution position so refreshes follow topological order
        let mut pending = BTreeSet::new();
        for (id, result) in applied {
            let signals = match result {
                ExecutionResult::Changed { .. } => true,
                ExecutionResult::Pending { .. } => self.opts.dry_run,
                _ => false,
            };
            if signals {
                for target in self.graph.notify_targets(*id) {
                    pending.insert((self.graph.position(*target), *target));
                }
            }
        }

        if pending.is_empty() {
            return Vec::new();
        }
        if self.aborted.load(Ordering::SeqCst) {
            log::warn!("run aborted, skipping {} pending refreshes", pending.len());
            return Vec::new();
        }

        let mut entries = Vec::with_capacity(pending.len());
        for (_, id) in pending {
            let Some(resource) = self.registry.get(id) else {
                continue;
            };
            if applied.get(&id).is_some_and(ExecutionResult::blocks_dependents) {
                log::debug!("not refreshing {}: it did not converge", resource.reference);
                continue;
            }

            progress.on_resource_start(&resource.reference, Phase::Refresh);
            let result = self.refresh(resource);
            progress.on_resource_complete(&resource.reference, Phase::Refresh, &result);
            entries.push(LogEntry {
                resource: resource.reference.clone(),
                phase: Phase::Refresh,
                result,
            });
        }
        entries
    }

    fn refresh(&self, resource: &Resource) -> ExecutionResult {
        if self.opts.dry_run {
            log::info!("{} would be refreshed", resource.reference);
            return ExecutionResult::Pending { drift: Vec::new() };
        }
        let Some(provider) = self.providers.get(resource.kind()) else {
            return fail(resource, format!("no provider for type `{}`", resource.kind()));
        };
        match provider.refresh(resource, &self.ctx) {
            Ok(Outcome::NoChange) => ExecutionResult::Unchanged,
            Ok(outcome) => {
                log::info!("{}: {outcome}", resource.reference);
                ExecutionResult::Changed {
                    outcome,
                    drift: Vec::new(),
                }
            }
            Err(e) => fail(resource, format!("refresh failed: {e:#}")),
        }
    }
}

fn fail(resource: &Resource, reason: String) -> ExecutionResult {
    log::warn!("{}: {reason}", resource.reference);
    ExecutionResult::Failed { reason }
}
