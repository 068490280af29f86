//! SELinux boolean resource

use crate::runner::{CommandRunner, Invocation};
use anyhow::Context;
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    TypeSchema,
};
use std::sync::Arc;

pub struct SelbooleanProvider {
    runner: Arc<dyn CommandRunner>,
}

impl SelbooleanProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Value from `getsebool` output such as `httpd_can_network_connect --> on`
fn parse_getsebool(stdout: &str) -> Option<&str> {
    let (_, value) = stdout.trim().split_once("-->")?;
    match value.trim() {
        v @ ("on" | "off") => Some(v),
        _ => None,
    }
}

impl Provider for SelbooleanProvider {
    fn kind(&self) -> &'static str {
        "selboolean"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("selboolean", &[Ensure::Present])
            .namevar("name", AttrKind::String)
            .property("value", AttrKind::Switch)
            .required()
            .parameter("persistent", AttrKind::Bool)
            .default_value(false)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let name = resource.name_or_title("name");
        let output = self
            .runner
            .run_checked(&Invocation::new("getsebool").arg(name))?;
        let value = parse_getsebool(&output.stdout)
            .with_context(|| format!("Unexpected getsebool output for {name}"))?;
        Ok(CurrentState::new(Ensure::Present).with("value", value))
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let name = resource.name_or_title("name");
        let Some(value) = resource.attr_str("value") else {
            return Ok(Outcome::NoChange);
        };
        if current.get("value").and_then(|v| v.as_str()) == Some(value) {
            return Ok(Outcome::NoChange);
        }

        let mut invocation = Invocation::new("setsebool");
        if resource.attr_bool("persistent").unwrap_or(false) {
            invocation = invocation.arg("-P");
        }
        self.runner.run_checked(&invocation.arg(name).arg(value))?;
        log::info!("Set SELinux boolean {name} to {value}");
        Ok(Outcome::Modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::declared;
    use crate::runner::fake::FakeRunner;
    use declarative::{Facts, Value};

    #[test]
    fn test_parse_getsebool() {
        assert_eq!(parse_getsebool("httpd_can_network_connect --> on\n"), Some("on"));
        assert_eq!(parse_getsebool("httpd_use_nfs --> off"), Some("off"));
        assert_eq!(parse_getsebool("getsebool:  SELinux is disabled"), None);
    }

    #[test]
    fn test_persistent_set() {
        let runner = Arc::new(
            FakeRunner::new().on("getsebool httpd_can_network_connect", 0, "httpd_can_network_connect --> off\n"),
        );
        let provider = SelbooleanProvider::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let resource = declared(
            &provider,
            "httpd_can_network_connect",
            Ensure::Present,
            &[("value", true.into()), ("persistent", true.into())],
        );
        assert_eq!(resource.attr("value"), Some(&Value::from("on")));

        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let current = provider.read_state(&resource, &ctx).unwrap();
        assert_eq!(provider.apply_state(&resource, &current, &ctx).unwrap(), Outcome::Modified);
        assert!(runner.ran("setsebool -P httpd_can_network_connect on"));
    }

    #[test]
    fn test_in_sync_boolean_is_untouched() {
        let runner = Arc::new(FakeRunner::new().on("getsebool httpd_use_nfs", 0, "httpd_use_nfs --> off\n"));
        let provider = SelbooleanProvider::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let resource = declared(&provider, "httpd_use_nfs", Ensure::Present, &[("value", "off".into())]);

        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let current = provider.read_state(&resource, &ctx).unwrap();
        assert_eq!(provider.apply_state(&resource, &current, &ctx).unwrap(), Outcome::NoChange);
        assert!(!runner.ran("setsebool"));
    }
}
