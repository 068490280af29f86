//! Content sync resource - rsync from a local or remote source
//!
//! Drift is detected with an itemized dry run: the destination is reported
//! absent while rsync would still transfer or delete anything.

use crate::runner::{CommandRunner, Invocation};
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    Sensitive, TypeSchema, Value,
};
use std::sync::Arc;

pub struct SyncProvider {
    runner: Arc<dyn CommandRunner>,
}

impl SyncProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn invocation(resource: &Resource, dry_run: bool) -> ProviderResult<Invocation> {
        let source = resource
            .attr_str("source")
            .ok_or_else(|| anyhow::anyhow!("{} has no source", resource.reference))?;
        let destination = resource.name_or_title("destination");

        let mut invocation = Invocation::new("rsync").args(["--archive", "--itemize-changes"]);
        if dry_run {
            invocation = invocation.arg("--dry-run");
        }
        if resource.attr_bool("delete").unwrap_or(false) {
            invocation = invocation.arg("--delete");
        }
        if let Some(timeout) = resource.attr("timeout").and_then(Value::as_int) {
            invocation = invocation.arg(format!("--timeout={timeout}"));
        }
        if let Some(excludes) = resource.attr("exclude").and_then(Value::as_list) {
            for pattern in excludes {
                invocation = invocation.arg(format!("--exclude={pattern}"));
            }
        }
        if let Some(password) = resource.attr("password") {
            let secret = match password {
                Value::Sensitive(secret) => secret.clone(),
                other => Sensitive::new(other.to_string()),
            };
            invocation = invocation.secret_env("RSYNC_PASSWORD", &secret);
        }

        let source = match resource.attr_str("user") {
            Some(user) => with_user(source, user),
            None => source.to_string(),
        };
        Ok(invocation.arg(source).arg(destination))
    }
}

/// Put `user@` in front of the host part of a remote rsync location
fn with_user(location: &str, user: &str) -> String {
    let remote = location.contains("::") || location.starts_with("rsync://");
    if !remote || location.contains('@') {
        return location.to_string();
    }
    match location.strip_prefix("rsync://") {
        Some(rest) => format!("rsync://{user}@{rest}"),
        None => format!("{user}@{location}"),
    }
}

/// Lines of `--itemize-changes` output that describe a real change
fn pending_changes(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .filter(|line| {
            let Some(flags) = line.split_whitespace().next() else {
                return false;
            };
            if flags.starts_with("*deleting") {
                return true;
            }
            // `.` in the first column: no transfer, only attribute changes matter
            !flags.starts_with('.') || flags.chars().skip(2).any(|c| c != '.')
        })
        .collect()
}

impl Provider for SyncProvider {
    fn kind(&self) -> &'static str {
        "sync"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("sync", &[Ensure::Present])
            .namevar("destination", AttrKind::String)
            .parameter("source", AttrKind::String)
            .required()
            .parameter("user", AttrKind::String)
            .parameter("password", AttrKind::String)
            .parameter("timeout", AttrKind::Int)
            .parameter("delete", AttrKind::Bool)
            .default_value(false)
            .parameter("exclude", AttrKind::List)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let output = self
            .runner
            .run_checked(&Self::invocation(resource, true)?)?;
        let changes = pending_changes(&output.stdout);
        if changes.is_empty() {
            Ok(CurrentState::new(Ensure::Present))
        } else {
            log::debug!("{}: {} pending transfers", resource.reference, changes.len());
            Ok(CurrentState::absent())
        }
    }

    fn apply_state(
        &self,
        resource: &Resource,
        _current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let output = self
            .runner
            .run_checked(&Self::invocation(resource, false)?)?;
        let transferred = pending_changes(&output.stdout).len();
        log::info!("{}: synced {transferred} items", resource.reference);
        Ok(if transferred == 0 {
            Outcome::NoChange
        } else {
            Outcome::Modified
        })
    }
}
