//! Group resource - local groups via shadow-utils

use super::getent;
use crate::runner::{CommandRunner, Invocation};
use anyhow::Context;
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    TypeSchema, Value,
};
use std::sync::Arc;

pub struct GroupProvider {
    runner: Arc<dyn CommandRunner>,
}

impl GroupProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Provider for GroupProvider {
    fn kind(&self) -> &'static str {
        "group"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("group", &[Ensure::Present, Ensure::Absent])
            .namevar("name", AttrKind::String)
            .property("gid", AttrKind::Int)
            .parameter("system", AttrKind::Bool)
            .default_value(false)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let name = resource.name_or_title("name");
        let Some(fields) = getent(self.runner.as_ref(), "group", name)? else {
            return Ok(CurrentState::absent());
        };
        let gid: i64 = fields
            .get(2)
            .and_then(|gid| gid.parse().ok())
            .with_context(|| format!("Malformed group entry for {name}"))?;
        Ok(CurrentState::new(Ensure::Present).with("gid", gid))
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let name = resource.name_or_title("name");
        let gid = resource.attr("gid").and_then(Value::as_int);

        match (resource.ensure, current.ensure) {
            (Ensure::Absent, Ensure::Absent) => Ok(Outcome::NoChange),
            (Ensure::Absent, _) => {
                self.runner
                    .run_checked(&Invocation::new("groupdel").arg(name))?;
                log::info!("Removed group {name}");
                Ok(Outcome::Removed)
            }
            (_, Ensure::Absent) => {
                let mut invocation = Invocation::new("groupadd");
                if resource.attr_bool("system").unwrap_or(false) {
                    invocation = invocation.arg("--system");
                }
                if let Some(gid) = gid {
                    invocation = invocation.arg("--gid").arg(gid.to_string());
                }
                self.runner.run_checked(&invocation.arg(name))?;
                log::info!("Created group {name}");
                Ok(Outcome::Created)
            }
            _ => match gid {
                Some(gid) if current.get("gid").and_then(Value::as_int) != Some(gid) => {
                    self.runner.run_checked(
                        &Invocation::new("groupmod")
                            .arg("--gid")
                            .arg(gid.to_string())
                            .arg(name),
                    )?;
                    Ok(Outcome::Modified)
                }
                _ => Ok(Outcome::NoChange),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::declared;
    use crate::runner::fake::FakeRunner;
    use declarative::Facts;

    fn run(runner: FakeRunner, ensure: Ensure, attrs: &[(&str, Value)]) -> (Outcome, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let provider = GroupProvider::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let resource = declared(&provider, "apache", ensure, attrs);
        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let current = provider.read_state(&resource, &ctx).unwrap();
        let outcome = provider.apply_state(&resource, &current, &ctx).unwrap();
        (outcome, runner)
    }

    #[test]
    fn test_create_system_group_with_gid() {
        let (outcome, runner) = run(
            FakeRunner::new().on("getent group apache", 2, ""),
            Ensure::Present,
            &[("gid", 48_i64.into()), ("system", true.into())],
        );
        assert_eq!(outcome, Outcome::Created);
        assert!(runner.ran("groupadd --system --gid 48 apache"));
    }

    #[test]
    fn test_gid_drift_is_modified() {
        let (outcome, runner) = run(
            FakeRunner::new().on("getent group apache", 0, "apache:x:1001:\n"),
            Ensure::Present,
            &[("gid", 48_i64.into())],
        );
        assert_eq!(outcome, Outcome::Modified);
        assert!(runner.ran("groupmod --gid 48 apache"));
    }

    #[test]
    fn test_remove_group() {
        let (outcome, runner) = run(
            FakeRunner::new().on("getent group apache", 0, "apache:x:48:\n"),
            Ensure::Absent,
            &[],
        );
        assert_eq!(outcome, Outcome::Removed);
        assert!(runner.ran("groupdel apache"));
    }
}
