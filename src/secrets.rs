//! Secret store backed by the state directory
//!
//! Lookup order for a secret `name`:
//! 1. `CONVERGE_SECRET_<NAME>` environment variable
//! 2. `<secrets dir>/<name>` file
//! 3. A random value generated for this run
//!
//! Generated values are held in memory until [`SecretStore::persist`] writes
//! them (mode 0600). Only a confirmed apply persists, so `plan`, `validate`
//! and a rejected manifest leave the secrets directory untouched. Once
//! written, values stay stable across runs and declarations that embed them
//! converge once.

use anyhow::{Context, Result};
use declarative::{SecretProvider, Sensitive};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

/// Prefix of environment variables that supply secrets directly
pub const ENV_SECRET_PREFIX: &str = "CONVERGE_SECRET_";

static SECRET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("secret name pattern is valid"));

pub struct SecretStore {
    dir: PathBuf,
    // Values generated this run and not yet written
    generated: Mutex<BTreeMap<String, Sensitive>>,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            generated: Mutex::new(BTreeMap::new()),
        }
    }

    fn env_key(name: &str) -> String {
        let key: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{ENV_SECRET_PREFIX}{key}")
    }

    fn read(path: &Path) -> Result<Option<Sensitive>> {
        match fs::read_to_string(path) {
            Ok(value) => Ok(Some(Sensitive::new(value.trim_end_matches('\n')))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read secret file {}", path.display())),
        }
    }

    fn generated(&self) -> MutexGuard<'_, BTreeMap<String, Sensitive>> {
        match self.generated.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Write every value generated this run; returns how many were written
    pub fn persist(&self) -> Result<usize> {
        let generated = std::mem::take(&mut *self.generated());
        if generated.is_empty() {
            return Ok(0);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create secrets directory: {}", self.dir.display()))?;
        restrict(&self.dir, 0o700)?;

        let mut written = 0;
        for (name, value) in generated {
            let path = self.dir.join(&name);
            match write_private(&path, &format!("{}\n", value.expose())) {
                Ok(()) => {
                    log::info!("Saved generated secret `{name}` in {}", self.dir.display());
                    written += 1;
                }
                // Another run got there first; its value wins from now on
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    log::warn!("Secret `{name}` appeared in {} during the run", self.dir.display());
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to write secret file: {}", path.display()));
                }
            }
        }
        Ok(written)
    }
}

impl SecretProvider for SecretStore {
    fn secret(&self, name: &str) -> Result<Sensitive> {
        if !SECRET_NAME.is_match(name) {
            anyhow::bail!("invalid secret name `{name}`");
        }

        if let Ok(value) = std::env::var(Self::env_key(name)) {
            log::debug!("Secret `{name}` taken from environment");
            return Ok(Sensitive::new(value));
        }

        let path = self.dir.join(name);
        if let Some(value) = Self::read(&path)? {
            log::debug!("Secret `{name}` read from {}", path.display());
            return Ok(value);
        }

        let value = self
            .generated()
            .entry(name.to_string())
            .or_insert_with(|| {
                log::debug!("Generated secret `{name}` for this run");
                Sensitive::new(uuid::Uuid::new_v4().simple().to_string())
            })
            .clone();
        Ok(value)
    }
}

/// Create `path` readable by its owner only; fails if it already exists
#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?
        .write_all(content.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?
        .write_all(content.as_bytes())
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::with_env_var;
    use tempfile::TempDir;

    #[test]
    fn test_generated_secret_is_stable() {
        let temp = TempDir::new().unwrap();
        let store = SecretStore::new(temp.path().join("secrets"));

        let first = store.secret("rsync_password").unwrap();
        let second = store.secret("rsync_password").unwrap();
        assert_eq!(first.expose(), second.expose());
        assert_eq!(first.expose().len(), 32);

        assert_eq!(store.persist().unwrap(), 1);
        let reopened = SecretStore::new(temp.path().join("secrets"));
        assert_eq!(reopened.secret("rsync_password").unwrap().expose(), first.expose());
        assert_eq!(reopened.persist().unwrap(), 0);
    }

    #[test]
    fn test_nothing_is_written_without_persist() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("secrets");
        let store = SecretStore::new(&dir);
        store.secret("db").unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_persist_keeps_a_value_written_meanwhile() {
        let temp = TempDir::new().unwrap();
        let store = SecretStore::new(temp.path());
        store.secret("db").unwrap();
        fs::write(temp.path().join("db"), "from-elsewhere\n").unwrap();

        assert_eq!(store.persist().unwrap(), 0);
        assert_eq!(store.secret("db").unwrap().expose(), "from-elsewhere");
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_secret_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("secrets");
        let store = SecretStore::new(&dir);
        store.secret("db").unwrap();
        store.persist().unwrap();

        let mode = fs::metadata(dir.join("db")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_existing_file_is_used() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("api-token"), "abc123\n").unwrap();
        let store = SecretStore::new(temp.path());
        assert_eq!(store.secret("api-token").unwrap().expose(), "abc123");
    }

    #[test]
    fn test_environment_wins() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("sync.pass"), "from-file").unwrap();
        let store = SecretStore::new(temp.path());
        with_env_var("CONVERGE_SECRET_SYNC_PASS", "from-env", || {
            assert_eq!(store.secret("sync.pass").unwrap().expose(), "from-env");
        });
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = SecretStore::new(temp.path());
        assert!(store.secret("../etc/shadow").is_err());
        assert!(store.secret("").is_err());
    }
}
