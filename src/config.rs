//! Settings file
//!
//! Optional `config.toml` in the config dir. Command-line flags override
//! file values, which override the defaults here.

use crate::paths;
use anyhow::{Context, Result};
use declarative::{FailurePolicy, GraphOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Persistent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Independent subgraphs converged concurrently
    pub jobs: usize,

    /// `continue` or `abort` after a failed resource
    pub failure_policy: FailurePolicy,

    /// Whether notify relations also order their endpoints
    pub notify_implies_order: bool,

    /// Where generated secrets are kept (defaults to `<state dir>/secrets`)
    pub secrets_dir: Option<String>,

    /// Skip resources with invalid attributes instead of refusing the manifest
    pub skip_invalid: bool,

    /// Fact overrides, applied on top of gathered facts
    pub facts: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: 1,
            failure_policy: FailurePolicy::Continue,
            notify_implies_order: true,
            secrets_dir: None,
            skip_invalid: false,
            facts: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load from the config dir, or defaults if there is no file
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in settings file: {}", path.display()))?;

        if settings.jobs == 0 {
            anyhow::bail!("{}: jobs must be at least 1", path.display());
        }
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            notify_implies_order: self.notify_implies_order,
        }
    }

    pub fn secrets_path(&self) -> Result<PathBuf> {
        match &self.secrets_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::secrets_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.graph_options().notify_implies_order);
    }

    #[test]
    fn test_parse_full_settings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
jobs = 4
failure_policy = "abort"
notify_implies_order = false
secrets_dir = "/var/lib/converge/secrets"
skip_invalid = true

[facts]
role = "web"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.jobs, 4);
        assert_eq!(settings.failure_policy, FailurePolicy::Abort);
        assert!(!settings.graph_options().notify_implies_order);
        assert!(settings.skip_invalid);
        assert_eq!(settings.facts.get("role").map(String::as_str), Some("web"));
        assert_eq!(
            settings.secrets_path().unwrap(),
            PathBuf::from("/var/lib/converge/secrets")
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "parallelism = 3\n").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_zero_jobs_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "jobs = 0\n").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("jobs"));
    }
}
