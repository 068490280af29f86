//! Provider context and progress callbacks
//!
//! These let front ends observe a run without the core depending on any
//! particular terminal or UI crate.

use crate::facts::Facts;
use crate::report::{ExecutionResult, Phase, RunReport};
use crate::types::ResourceRef;

/// Context passed to provider operations
#[derive(Debug, Clone, Copy)]
pub struct ProviderContext<'a> {
    /// Immutable fact snapshot of the run
    pub facts: &'a Facts,
}

impl<'a> ProviderContext<'a> {
    pub fn new(facts: &'a Facts) -> Self {
        Self { facts }
    }
}

/// Progress callback for convergence runs
///
/// With parallel jobs, `on_resource_start` is only called for sequential
/// runs; completion callbacks are replayed in execution order afterwards.
pub trait ProgressCallback: Send {
    /// Called once with the number of resources about to be converged
    fn on_run_start(&mut self, total: usize, dry_run: bool);

    /// Called when a resource enters a phase
    fn on_resource_start(&mut self, resource: &ResourceRef, phase: Phase);

    /// Called when a resource finished a phase
    fn on_resource_complete(&mut self, resource: &ResourceRef, phase: Phase, result: &ExecutionResult);

    /// Called with the final report
    fn on_run_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize, _dry_run: bool) {}
    fn on_resource_start(&mut self, _resource: &ResourceRef, _phase: Phase) {}
    fn on_resource_complete(&mut self, _resource: &ResourceRef, _phase: Phase, _result: &ExecutionResult) {}
    fn on_run_complete(&mut self, _report: &RunReport) {}
}
