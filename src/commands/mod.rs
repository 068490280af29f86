//! Subcommand implementations

pub mod apply;
pub mod inspect;

use crate::cli::ManifestArgs;
use crate::config::Settings;
use crate::facts;
use crate::manifest::Manifest;
use crate::resource;
use crate::runner::SystemRunner;
use crate::secrets::SecretStore;
use anyhow::{Context as _, Result};
use declarative::{Facts, Graph, ProviderSet, Registry, ResourceRef, include};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a run needs, built from a manifest
pub struct Prepared {
    pub settings: Settings,
    pub facts: Facts,
    pub manifest: Manifest,
    pub providers: ProviderSet,
    pub registry: Registry,
    pub graph: Graph,
    /// Secrets resolved for the manifest; generated ones are not yet saved
    pub secrets: SecretStore,
    /// Declarations whose conditions did not match the facts
    pub excluded: Vec<ResourceRef>,
    /// Resources dropped because their attributes were invalid
    pub invalid: Vec<(ResourceRef, String)>,
}

/// Settings from `--config` or the default location
pub fn load_settings(args: &ManifestArgs) -> Result<Settings> {
    match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// Fact overrides: settings file first, then command line
pub fn fact_overrides(settings: &Settings, cli: &[(String, String)]) -> BTreeMap<String, String> {
    let mut overrides = settings.facts.clone();
    overrides.extend(cli.iter().cloned());
    overrides
}

/// Load settings, facts and the manifest, then build the registry and graph
pub fn prepare(args: &ManifestArgs) -> Result<Prepared> {
    let settings = load_settings(args)?;
    let facts = facts::gather(&fact_overrides(&settings, &args.facts))?;
    let providers = resource::builtin(Arc::new(SystemRunner));
    prepare_with(args, settings, facts, providers)
}

/// [`prepare`] with explicit settings, facts and providers
pub fn prepare_with(
    args: &ManifestArgs,
    settings: Settings,
    facts: Facts,
    providers: ProviderSet,
) -> Result<Prepared> {
    let manifest = Manifest::load(&args.manifest)?;
    let secrets = SecretStore::new(settings.secrets_path()?);

    let included = include(&manifest.declarations, &facts);
    let excluded: Vec<ResourceRef> = manifest
        .declarations
        .iter()
        .filter(|d| !d.applies_to(&facts))
        .map(|d| d.reference())
        .collect();
    for reference in &excluded {
        log::info!("{reference} excluded by its condition");
    }

    let mut registry = Registry::for_providers(&providers);
    let mut invalid = Vec::new();
    for declaration in included {
        match registry.register_declaration(declaration, &facts, &secrets) {
            Ok(_) => {}
            Err(e) if !e.is_fatal() && settings.skip_invalid => {
                log::warn!("Skipping {}: {e}", declaration.reference());
                invalid.push((declaration.reference(), e.to_string()));
            }
            Err(e) => return Err(e).context("Manifest rejected"),
        }
    }
    for chain in &manifest.chains {
        registry.chain(chain);
    }

    let graph = Graph::build_with(&registry, settings.graph_options())
        .context("Could not build the dependency graph")?;
    log::debug!(
        "{} resources, {} edges",
        registry.len(),
        graph.edges().len()
    );

    Ok(Prepared {
        settings,
        facts,
        manifest,
        providers,
        registry,
        graph,
        secrets,
        excluded,
        invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::FileProvider;
    use declarative::facts::ARCHITECTURE;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn args(manifest: &Path) -> ManifestArgs {
        ManifestArgs {
            manifest: manifest.to_path_buf(),
            facts: Vec::new(),
            config: None,
        }
    }

    fn settings(temp: &TempDir) -> Settings {
        Settings {
            secrets_dir: Some(temp.path().join("secrets").display().to_string()),
            ..Settings::default()
        }
    }

    fn write_manifest(temp: &TempDir, body: &str) -> std::path::PathBuf {
        let path = temp.path().join("site.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_prepare_orders_and_excludes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().display();
        let manifest = write_manifest(
            &temp,
            &format!(
                r#"
[[resource]]
type = "file"
title = "{root}/site/index.html"
require = ["File[{root}/site]"]
attributes = {{ content = "hello" }}

[[resource]]
type = "file"
title = "{root}/site"
ensure = "directory"

[[resource]]
type = "file"
title = "{root}/lib32"
ensure = "directory"
when = {{ architecture = "i386" }}
"#
            ),
        );

        let facts = Facts::new().with(ARCHITECTURE, "x86_64");
        let providers = ProviderSet::new().with(FileProvider::default());
        let prepared = prepare_with(&args(&manifest), settings(&temp), facts, providers).unwrap();

        assert_eq!(prepared.registry.len(), 2);
        assert_eq!(
            prepared.excluded,
            vec![ResourceRef::new("file", format!("{root}/lib32"))]
        );
        let order: Vec<String> = prepared
            .graph
            .topological_order()
            .iter()
            .filter_map(|id| prepared.registry.get(*id))
            .map(|r| r.title().to_string())
            .collect();
        assert_eq!(order, vec![format!("{root}/site"), format!("{root}/site/index.html")]);
    }

    #[test]
    fn test_invalid_attribute_rejects_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(
            &temp,
            r#"
[[resource]]
type = "file"
title = "/etc/motd"
attributes = { mode = 644 }
"#,
        );
        let providers = ProviderSet::new().with(FileProvider::default());
        let err = prepare_with(&args(&manifest), settings(&temp), Facts::new(), providers)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("mode"));
    }

    #[test]
    fn test_skip_invalid_keeps_going() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(
            &temp,
            r#"
[[resource]]
type = "file"
title = "/etc/motd"
attributes = { mode = 644 }

[[resource]]
type = "file"
title = "/etc/issue"
"#,
        );
        let settings = Settings {
            skip_invalid: true,
            ..settings(&temp)
        };
        let providers = ProviderSet::new().with(FileProvider::default());
        let prepared = prepare_with(&args(&manifest), settings, Facts::new(), providers).unwrap();
        assert_eq!(prepared.registry.len(), 1);
        assert_eq!(prepared.invalid.len(), 1);
        assert_eq!(prepared.invalid[0].0, ResourceRef::new("file", "/etc/motd"));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(
            &temp,
            r#"
[[resource]]
type = "file"
title = "/a"
require = ["File[/b]"]

[[resource]]
type = "file"
title = "/b"
require = ["File[/a]"]
"#,
        );
        let providers = ProviderSet::new().with(FileProvider::default());
        let err = prepare_with(&args(&manifest), settings(&temp), Facts::new(), providers)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("File[/a]"));
    }

    #[test]
    fn test_httpd_demo_builds() {
        use crate::runner::fake::FakeRunner;
        use declarative::facts::OS_FAMILY;

        let temp = TempDir::new().unwrap();
        let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/httpd");
        let facts = Facts::new()
            .with(OS_FAMILY, "RedHat")
            .with(ARCHITECTURE, "x86_64")
            .with("role", "web");
        let providers = resource::builtin(Arc::new(FakeRunner::new()));
        let prepared = prepare_with(&args(&demo), settings(&temp), facts, providers).unwrap();

        assert_eq!(prepared.manifest.sources.len(), 6);
        assert_eq!(prepared.registry.len(), 11);
        assert!(prepared.excluded.is_empty());

        let position = |kind: &str, title: &str| {
            let id = prepared.registry.lookup(&ResourceRef::new(kind, title)).unwrap();
            prepared.graph.position(id)
        };
        assert!(position("group", "apache") < position("user", "apache"));
        assert!(position("user", "apache") < position("package", "httpd"));
        assert!(position("file", "/etc/httpd/conf.d/ssl.conf") < position("service", "httpd"));
        assert!(position("selboolean", "httpd_can_network_connect") < position("service", "httpd"));
    }

    #[test]
    fn test_httpd_demo_on_debian_drops_redhat_only_resources() {
        use crate::runner::fake::FakeRunner;
        use declarative::facts::OS_FAMILY;

        let temp = TempDir::new().unwrap();
        let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/httpd");
        let facts = Facts::new().with(OS_FAMILY, "Debian").with(ARCHITECTURE, "aarch64");
        let providers = resource::builtin(Arc::new(FakeRunner::new()));
        let prepared = prepare_with(&args(&demo), settings(&temp), facts, providers).unwrap();

        assert_eq!(prepared.excluded.len(), 4);
        assert!(prepared.excluded.contains(&ResourceRef::new("package", "mod_ssl")));
        assert!(prepared.excluded.contains(&ResourceRef::new("sync", "/var/www/html")));
    }

    #[test]
    fn test_secrets_are_not_saved_while_preparing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().display();
        let manifest = write_manifest(
            &temp,
            &format!(
                r#"
[[resource]]
type = "file"
title = "{root}/db.pass"
attributes = {{ content = {{ secret = "db_password" }}, mode = "0600" }}
"#
            ),
        );
        let providers = ProviderSet::new().with(FileProvider::default());
        let prepared = prepare_with(&args(&manifest), settings(&temp), Facts::new(), providers).unwrap();
        let secrets_dir = temp.path().join("secrets");
        assert!(!secrets_dir.exists());

        assert_eq!(prepared.secrets.persist().unwrap(), 1);
        assert!(secrets_dir.join("db_password").exists());
    }

    #[test]
    fn test_rejected_manifest_saves_no_secrets() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(
            &temp,
            r#"
[[resource]]
type = "file"
title = "/a"
require = ["File[/b]"]
attributes = { content = { secret = "token" } }

[[resource]]
type = "file"
title = "/b"
require = ["File[/a]"]
"#,
        );
        let providers = ProviderSet::new().with(FileProvider::default());
        assert!(prepare_with(&args(&manifest), settings(&temp), Facts::new(), providers).is_err());
        assert!(!temp.path().join("secrets").exists());
    }

    #[test]
    fn test_cli_facts_override_settings() {
        let settings = Settings {
            facts: BTreeMap::from([
                ("role".to_string(), "web".to_string()),
                ("zone".to_string(), "a".to_string()),
            ]),
            ..Settings::default()
        };
        let overrides = fact_overrides(&settings, &[("role".into(), "db".into())]);
        assert_eq!(overrides.get("role").map(String::as_str), Some("db"));
        assert_eq!(overrides.get("zone").map(String::as_str), Some("a"));
    }
}
