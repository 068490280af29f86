//! Built-in resource providers
//!
//! Each provider observes and corrects one resource type on the local host.
//! Everything that shells out goes through a [`CommandRunner`].

use crate::runner::{CommandRunner, Invocation};
use anyhow::Result;
use declarative::ProviderSet;
use std::sync::Arc;

pub mod file;
pub mod group;
pub mod package;
pub mod selboolean;
pub mod service;
pub mod sync;
pub mod user;

pub use file::FileProvider;
pub use group::GroupProvider;
pub use package::PackageProvider;
pub use selboolean::SelbooleanProvider;
pub use service::ServiceProvider;
pub use sync::SyncProvider;
pub use user::UserProvider;

/// Every provider shipped with the binary
pub fn builtin(runner: Arc<dyn CommandRunner>) -> ProviderSet {
    ProviderSet::new()
        .with(FileProvider::default())
        .with(GroupProvider::new(Arc::clone(&runner)))
        .with(PackageProvider::new(Arc::clone(&runner)))
        .with(SelbooleanProvider::new(Arc::clone(&runner)))
        .with(ServiceProvider::new(Arc::clone(&runner)))
        .with(SyncProvider::new(Arc::clone(&runner)))
        .with(UserProvider::new(runner))
}

/// Look up `key` in a name service database
///
/// Returns the colon-separated fields of the entry, or `None` when getent
/// reports the key as missing (exit code 2).
pub(crate) fn getent(runner: &dyn CommandRunner, database: &str, key: &str) -> Result<Option<Vec<String>>> {
    let invocation = Invocation::new("getent").arg(database).arg(key);
    let output = runner.run(&invocation)?;
    if output.code == Some(2) {
        return Ok(None);
    }
    let output = output.check(&invocation)?;
    let line = output.stdout.lines().next().unwrap_or_default();
    Ok(Some(line.split(':').map(str::to_string).collect()))
}

/// Register one resource against a provider's schema
#[cfg(test)]
pub(crate) fn declared(
    provider: &dyn declarative::Provider,
    title: &str,
    ensure: declarative::Ensure,
    attrs: &[(&str, declarative::Value)],
) -> declarative::Resource {
    let mut registry = declarative::Registry::new();
    registry.define(provider.schema());
    let attributes = attrs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    let id = registry
        .register(provider.kind(), title, attributes, Some(ensure))
        .unwrap();
    registry.get(id).unwrap().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;

    #[test]
    fn test_builtin_kinds() {
        let providers = builtin(Arc::new(FakeRunner::new()));
        assert_eq!(
            providers.kinds(),
            vec!["file", "group", "package", "selboolean", "service", "sync", "user"]
        );
    }

    #[test]
    fn test_getent_missing_key() {
        let runner = FakeRunner::new().on("getent passwd apache", 2, "");
        assert_eq!(getent(&runner, "passwd", "apache").unwrap(), None);
    }

    #[test]
    fn test_getent_fields() {
        let runner = FakeRunner::new().on("getent group apache", 0, "apache:x:48:\n");
        assert_eq!(
            getent(&runner, "group", "apache").unwrap(),
            Some(vec!["apache".into(), "x".into(), "48".into(), String::new()])
        );
    }

    #[test]
    fn test_getent_other_failure_is_error() {
        let runner = FakeRunner::new().on("getent group", 1, "");
        assert!(getent(&runner, "group", "apache").is_err());
    }
}
