//! Run report: per-resource results and the overall status of a pass

use crate::diff::Drift;
use crate::provider::Outcome;
use crate::types::ResourceRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Phase of a pass a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The ordered read/compare/apply pass
    Apply,
    /// The notification pass
    Refresh,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Apply => "apply",
            Self::Refresh => "refresh",
        })
    }
}

/// Why a resource was not attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// An order predecessor failed or was itself skipped
    UpstreamFailed { prerequisite: ResourceRef },
    /// The run stopped after a failure
    RunAborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { prerequisite } => {
                write!(f, "dependency {prerequisite} did not converge")
            }
            Self::RunAborted => f.write_str("run aborted after an earlier failure"),
        }
    }
}

/// Result of one resource in one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Already in the declared state
    Unchanged,
    /// Corrective action succeeded
    Changed { outcome: Outcome, drift: Vec<Drift> },
    /// Would change, but the run is a no-op
    Pending { drift: Vec<Drift> },
    /// Read, apply or refresh failed
    Failed { reason: String },
    /// Not attempted
    Skipped { reason: SkipReason },
}

impl ExecutionResult {
    /// Only changes propagate notifications
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Failed or skipped: dependents must not run
    pub fn blocks_dependents(&self) -> bool {
        self.is_failed() || self.is_skipped()
    }

    /// Short label for terminal output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed { .. } => "changed",
            Self::Pending { .. } => "pending",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Unchanged => 0,
            Self::Skipped { .. } => 1,
            Self::Pending { .. } => 2,
            Self::Changed { .. } => 3,
            Self::Failed { .. } => 4,
        }
    }
}

/// One line of the ordered run log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub resource: ResourceRef,
    pub phase: Phase,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Unchanged,
    Changed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed => "failed",
        })
    }
}

/// Counts per resource, each resource counted once by its worst result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Refresh-phase entries, successful or not
    pub refreshes: usize,
}

impl Summary {
    fn from_entries(entries: &[LogEntry]) -> Self {
        let mut worst: BTreeMap<&ResourceRef, &ExecutionResult> = BTreeMap::new();
        let mut summary = Self::default();
        for entry in entries {
            if entry.phase == Phase::Refresh {
                summary.refreshes += 1;
            }
            worst
                .entry(&entry.resource)
                .and_modify(|current| {
                    if entry.result.severity() > current.severity() {
                        *current = &entry.result;
                    }
                })
                .or_insert(&entry.result);
        }

        summary.total = worst.len();
        for result in worst.values() {
            match result {
                ExecutionResult::Unchanged => summary.unchanged += 1,
                ExecutionResult::Changed { .. } => summary.changed += 1,
                ExecutionResult::Pending { .. } => summary.pending += 1,
                ExecutionResult::Failed { .. } => summary.failed += 1,
                ExecutionResult::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Outcome of one convergence pass
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    status: RunStatus,
    summary: Summary,
    entries: Vec<LogEntry>,
}

impl RunReport {
    /// Finalize a report from its ordered log
    pub fn new(started_at: DateTime<Utc>, dry_run: bool, entries: Vec<LogEntry>) -> Self {
        let status = if entries.iter().any(|e| e.result.is_failed()) {
            RunStatus::Failed
        } else if entries
            .iter()
            .any(|e| matches!(e.result, ExecutionResult::Changed { .. } | ExecutionResult::Pending { .. }))
        {
            RunStatus::Changed
        } else {
            RunStatus::Unchanged
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            status,
            summary: Summary::from_entries(&entries),
            entries,
        }
    }

    /// Failed if anything failed, changed if anything changed, else unchanged
    ///
    /// In a no-op run pending changes count as changed.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Full ordered log: the apply pass, then refreshes
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn failures(&self) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.result.is_failed()).collect()
    }

    pub fn result_of(&self, resource: &ResourceRef, phase: Phase) -> Option<&ExecutionResult> {
        self.entries
            .iter()
            .find(|e| &e.resource == resource && e.phase == phase)
            .map(|e| &e.result)
    }

    /// Resources that went through the refresh phase, in order
    pub fn refreshed(&self) -> Vec<&ResourceRef> {
        self.entries
            .iter()
            .filter(|e| e.phase == Phase::Refresh)
            .map(|e| &e.resource)
            .collect()
    }

    /// 0 when unchanged, 2 when changed, 1 on failure
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Unchanged => 0,
            RunStatus::Changed => 2,
            RunStatus::Failed => 1,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, phase: Phase, result: ExecutionResult) -> LogEntry {
        LogEntry {
            resource: ResourceRef::new("thing", title),
            phase,
            result,
        }
    }

    fn changed() -> ExecutionResult {
        ExecutionResult::Changed {
            outcome: Outcome::Created,
            drift: Vec::new(),
        }
    }

    fn failed() -> ExecutionResult {
        ExecutionResult::Failed {
            reason: "boom".into(),
        }
    }

    #[test]
    fn test_status_precedence() {
        let unchanged = RunReport::new(
            Utc::now(),
            false,
            vec![entry("a", Phase::Apply, ExecutionResult::Unchanged)],
        );
        assert_eq!(unchanged.status(), RunStatus::Unchanged);
        assert_eq!(unchanged.exit_code(), 0);

        let changed = RunReport::new(
            Utc::now(),
            false,
            vec![
                entry("a", Phase::Apply, ExecutionResult::Unchanged),
                entry("b", Phase::Apply, changed()),
            ],
        );
        assert_eq!(changed.status(), RunStatus::Changed);
        assert_eq!(changed.exit_code(), 2);

        let failed = RunReport::new(
            Utc::now(),
            false,
            vec![
                entry("a", Phase::Apply, self::changed()),
                entry("b", Phase::Apply, failed()),
            ],
        );
        assert_eq!(failed.status(), RunStatus::Failed);
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.failures().len(), 1);
    }

    #[test]
    fn test_pending_counts_as_changed() {
        let report = RunReport::new(
            Utc::now(),
            true,
            vec![entry(
                "a",
                Phase::Apply,
                ExecutionResult::Pending { drift: Vec::new() },
            )],
        );
        assert_eq!(report.status(), RunStatus::Changed);
        assert_eq!(report.summary().pending, 1);
    }

    #[test]
    fn test_summary_counts_each_resource_once() {
        let report = RunReport::new(
            Utc::now(),
            false,
            vec![
                entry("svc", Phase::Apply, ExecutionResult::Unchanged),
                entry("conf", Phase::Apply, changed()),
                entry("svc", Phase::Refresh, failed()),
            ],
        );
        let summary = report.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(summary.refreshes, 1);
        assert_eq!(report.refreshed().len(), 1);
        assert!(report
            .result_of(&ResourceRef::new("thing", "svc"), Phase::Refresh)
            .is_some_and(ExecutionResult::is_failed));
    }

    #[test]
    fn test_report_serializes_tagged_results() {
        let report = RunReport::new(
            Utc::now(),
            false,
            vec![entry(
                "b",
                Phase::Apply,
                ExecutionResult::Skipped {
                    reason: SkipReason::UpstreamFailed {
                        prerequisite: ResourceRef::new("thing", "a"),
                    },
                },
            )],
        );
        let json = serde_json::to_value(&report).unwrap();
        let first = &json["entries"][0];
        assert_eq!(first["resource"], "Thing[b]");
        assert_eq!(first["status"], "skipped");
        assert_eq!(first["reason"]["kind"], "upstream_failed");
        assert_eq!(first["reason"]["prerequisite"], "Thing[a]");
        assert_eq!(json["status"], "unchanged");
    }
}
