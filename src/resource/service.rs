//! Service resource - systemd units

use crate::runner::{CommandRunner, Invocation};
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    TypeSchema,
};
use std::sync::Arc;

pub struct ServiceProvider {
    runner: Arc<dyn CommandRunner>,
}

impl ServiceProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Query systemctl; the answer is on stdout even when the exit code is non-zero
    fn query(&self, verb: &str, unit: &str) -> ProviderResult<String> {
        let output = self
            .runner
            .run(&Invocation::new("systemctl").arg(verb).arg(unit))?;
        Ok(output.stdout.trim().to_string())
    }

    fn systemctl(&self, verb: &str, unit: &str) -> ProviderResult<()> {
        self.runner
            .run_checked(&Invocation::new("systemctl").arg(verb).arg(unit))?;
        log::info!("systemctl {verb} {unit}");
        Ok(())
    }
}

impl Provider for ServiceProvider {
    fn kind(&self) -> &'static str {
        "service"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("service", &[Ensure::Running, Ensure::Stopped])
            .namevar("name", AttrKind::String)
            .property("enable", AttrKind::Bool)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let unit = resource.name_or_title("name");
        let ensure = match self.query("is-active", unit)?.as_str() {
            "active" | "activating" | "reloading" => Ensure::Running,
            _ => Ensure::Stopped,
        };

        let mut state = CurrentState::new(ensure);
        if resource.attr("enable").is_some() {
            let enabled = matches!(
                self.query("is-enabled", unit)?.as_str(),
                "enabled" | "enabled-runtime" | "alias"
            );
            state = state.with("enable", enabled);
        }
        Ok(state)
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let unit = resource.name_or_title("name");
        let mut changed = false;

        if let Some(enable) = resource.attr_bool("enable")
            && current.get("enable").and_then(|v| v.as_bool()) != Some(enable)
        {
            self.systemctl(if enable { "enable" } else { "disable" }, unit)?;
            changed = true;
        }

        if resource.ensure != current.ensure {
            let verb = match resource.ensure {
                Ensure::Stopped => "stop",
                _ => "start",
            };
            self.systemctl(verb, unit)?;
            changed = true;
        }

        Ok(if changed { Outcome::Modified } else { Outcome::NoChange })
    }

    /// Restart a running service; a service declared stopped ignores events
    fn refresh(&self, resource: &Resource, ctx: &ProviderContext) -> ProviderResult<Outcome> {
        if resource.ensure == Ensure::Stopped {
            return Ok(Outcome::NoChange);
        }
        let unit = resource.name_or_title("name");
        let current = self.read_state(resource, ctx)?;
        if current.ensure == Ensure::Running {
            self.systemctl("restart", unit)?;
            Ok(Outcome::Refreshed)
        } else {
            self.systemctl("start", unit)?;
            Ok(Outcome::Modified)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::resource::declared;
    use declarative::{Facts, Value};

    fn resource(ensure: Ensure, attrs: &[(&str, Value)]) -> Resource {
        let provider = ServiceProvider::new(Arc::new(FakeRunner::new()));
        declared(&provider, "httpd", ensure, attrs)
    }

    fn provider(runner: FakeRunner) -> (ServiceProvider, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        (ServiceProvider::new(Arc::clone(&runner) as Arc<dyn CommandRunner>), runner)
    }

    #[test]
    fn test_read_inactive_service() {
        let (provider, _) = provider(FakeRunner::new().on("systemctl is-active httpd", 3, "inactive\n"));
        let facts = Facts::new();
        let state = provider
            .read_state(&resource(Ensure::Running, &[]), &ProviderContext::new(&facts))
            .unwrap();
        assert_eq!(state.ensure, Ensure::Stopped);
        assert_eq!(state.get("enable"), None);
    }

    #[test]
    fn test_start_and_enable() {
        let (provider, runner) = provider(
            FakeRunner::new()
                .on("systemctl is-active httpd", 3, "inactive\n")
                .on("systemctl is-enabled httpd", 1, "disabled\n"),
        );
        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let resource = resource(Ensure::Running, &[("enable", true.into())]);

        let current = provider.read_state(&resource, &ctx).unwrap();
        assert_eq!(current.get("enable"), Some(&Value::Bool(false)));
        assert_eq!(provider.apply_state(&resource, &current, &ctx).unwrap(), Outcome::Modified);
        assert!(runner.ran("systemctl enable httpd"));
        assert!(runner.ran("systemctl start httpd"));
    }

    #[test]
    fn test_refresh_restarts_running_service() {
        let (provider, runner) = provider(FakeRunner::new().on("systemctl is-active httpd", 0, "active\n"));
        let facts = Facts::new();
        let outcome = provider
            .refresh(&resource(Ensure::Running, &[]), &ProviderContext::new(&facts))
            .unwrap();
        assert_eq!(outcome, Outcome::Refreshed);
        assert!(runner.ran("systemctl restart httpd"));
    }

    #[test]
    fn test_refresh_ignored_when_stopped() {
        let (provider, runner) = provider(FakeRunner::new());
        let facts = Facts::new();
        let outcome = provider
            .refresh(&resource(Ensure::Stopped, &[]), &ProviderContext::new(&facts))
            .unwrap();
        assert_eq!(outcome, Outcome::NoChange);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_failed_start_is_error() {
        let (provider, _) = provider(
            FakeRunner::new()
                .on("systemctl is-active httpd", 3, "failed\n")
                .on("systemctl start httpd", 1, ""),
        );
        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let resource = resource(Ensure::Running, &[]);
        let current = provider.read_state(&resource, &ctx).unwrap();
        let err = provider.apply_state(&resource, &current, &ctx).unwrap_err();
        assert!(err.to_string().contains("systemctl start httpd"));
    }
}
