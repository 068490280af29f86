//! User resource - local accounts via shadow-utils

use super::getent;
use crate::runner::{CommandRunner, Invocation};
use anyhow::Context;
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    TypeSchema, Value,
};
use std::sync::Arc;

pub struct UserProvider {
    runner: Arc<dyn CommandRunner>,
}

impl UserProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Numeric id of a group given by name or number
    fn gid_of(&self, group: &str) -> Option<i64> {
        if let Ok(gid) = group.parse() {
            return Some(gid);
        }
        getent(self.runner.as_ref(), "group", group)
            .ok()
            .flatten()
            .and_then(|fields| fields.get(2).and_then(|gid| gid.parse().ok()))
    }

    /// Command-line flags that set every drifted attribute
    fn flags(&self, resource: &Resource, current: &CurrentState) -> Vec<String> {
        let mut flags = Vec::new();
        let drifted = |name: &str| match (resource.attr(name), current.get(name)) {
            (Some(desired), Some(observed)) => !self.in_sync(name, desired, observed),
            (Some(_), None) => true,
            (None, _) => false,
        };
        for (attr, flag) in [("uid", "--uid"), ("gid", "--gid"), ("home", "--home"), ("shell", "--shell")] {
            if drifted(attr)
                && let Some(value) = resource.attr(attr)
            {
                flags.push(flag.to_string());
                flags.push(value.to_string());
            }
        }
        flags
    }
}

impl Provider for UserProvider {
    fn kind(&self) -> &'static str {
        "user"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("user", &[Ensure::Present, Ensure::Absent])
            .namevar("name", AttrKind::String)
            .property("uid", AttrKind::Int)
            .property("gid", AttrKind::String)
            .property("home", AttrKind::AbsolutePath)
            .property("shell", AttrKind::AbsolutePath)
            .parameter("system", AttrKind::Bool)
            .default_value(false)
            .parameter("managehome", AttrKind::Bool)
            .default_value(false)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let name = resource.name_or_title("name");
        let Some(fields) = getent(self.runner.as_ref(), "passwd", name)? else {
            return Ok(CurrentState::absent());
        };
        if fields.len() < 7 {
            anyhow::bail!("Malformed passwd entry for {name}");
        }
        let uid: i64 = fields[2]
            .parse()
            .with_context(|| format!("Malformed uid for {name}"))?;
        Ok(CurrentState::new(Ensure::Present)
            .with("uid", uid)
            .with("gid", fields[3].clone())
            .with("home", std::path::PathBuf::from(&fields[5]))
            .with("shell", std::path::PathBuf::from(&fields[6])))
    }

    fn in_sync(&self, property: &str, desired: &Value, current: &Value) -> bool {
        if property == "gid"
            && let (Some(desired), Some(current)) = (desired.as_str(), current.as_str())
        {
            return desired == current || self.gid_of(desired) == self.gid_of(current);
        }
        desired == current
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let name = resource.name_or_title("name");

        match (resource.ensure, current.ensure) {
            (Ensure::Absent, Ensure::Absent) => Ok(Outcome::NoChange),
            (Ensure::Absent, _) => {
                let mut invocation = Invocation::new("userdel");
                if resource.attr_bool("managehome").unwrap_or(false) {
                    invocation = invocation.arg("--remove");
                }
                self.runner.run_checked(&invocation.arg(name))?;
                log::info!("Removed user {name}");
                Ok(Outcome::Removed)
            }
            (_, Ensure::Absent) => {
                let mut invocation = Invocation::new("useradd");
                if resource.attr_bool("system").unwrap_or(false) {
                    invocation = invocation.arg("--system");
                }
                invocation = if resource.attr_bool("managehome").unwrap_or(false) {
                    invocation.arg("--create-home")
                } else {
                    invocation.arg("--no-create-home")
                };
                let invocation = invocation.args(self.flags(resource, current)).arg(name);
                self.runner.run_checked(&invocation)?;
                log::info!("Created user {name}");
                Ok(Outcome::Created)
            }
            _ => {
                let flags = self.flags(resource, current);
                if flags.is_empty() {
                    return Ok(Outcome::NoChange);
                }
                self.runner
                    .run_checked(&Invocation::new("usermod").args(flags).arg(name))?;
                Ok(Outcome::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::declared;
    use crate::runner::fake::FakeRunner;
    use declarative::{Facts, compute_drift};

    const APACHE: &str = "apache:x:48:48:Apache:/usr/share/httpd:/sbin/nologin\n";

    fn provider(runner: FakeRunner) -> (UserProvider, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        (UserProvider::new(Arc::clone(&runner) as Arc<dyn CommandRunner>), runner)
    }

    #[test]
    fn test_create_user() {
        let (provider, runner) = provider(FakeRunner::new().on("getent passwd apache", 2, ""));
        let resource = declared(
            &provider,
            "apache",
            Ensure::Present,
            &[
                ("uid", 48_i64.into()),
                ("gid", "apache".into()),
                ("shell", "/sbin/nologin".into()),
                ("system", true.into()),
            ],
        );
        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let current = provider.read_state(&resource, &ctx).unwrap();
        assert_eq!(provider.apply_state(&resource, &current, &ctx).unwrap(), Outcome::Created);
        assert!(runner.ran(
            "useradd --system --no-create-home --uid 48 --gid apache --shell /sbin/nologin apache"
        ));
    }

    #[test]
    fn test_group_name_matches_numeric_gid() {
        let (provider, _) = provider(
            FakeRunner::new()
                .on("getent passwd apache", 0, APACHE)
                .on("getent group apache", 0, "apache:x:48:\n"),
        );
        let resource = declared(
            &provider,
            "apache",
            Ensure::Present,
            &[("gid", "apache".into()), ("home", "/usr/share/httpd".into())],
        );
        let facts = Facts::new();
        let current = provider
            .read_state(&resource, &ProviderContext::new(&facts))
            .unwrap();
        let drift = compute_drift(&provider, Some(&provider.schema()), &resource, &current);
        assert!(drift.is_empty(), "unexpected drift: {drift:?}");
    }

    #[test]
    fn test_shell_drift_uses_usermod() {
        let (provider, runner) = provider(FakeRunner::new().on("getent passwd apache", 0, APACHE));
        let resource = declared(
            &provider,
            "apache",
            Ensure::Present,
            &[("shell", "/bin/bash".into())],
        );
        let facts = Facts::new();
        let ctx = ProviderContext::new(&facts);
        let current = provider.read_state(&resource, &ctx).unwrap();
        assert_eq!(provider.apply_state(&resource, &current, &ctx).unwrap(), Outcome::Modified);
        assert!(runner.ran("usermod --shell /bin/bash apache"));
    }

    #[test]
    fn test_malformed_entry_is_error() {
        let (provider, _) = provider(FakeRunner::new().on("getent passwd apache", 0, "apache:x\n"));
        let resource = declared(&provider, "apache", Ensure::Present, &[]);
        let facts = Facts::new();
        assert!(provider.read_state(&resource, &ProviderContext::new(&facts)).is_err());
    }
}
