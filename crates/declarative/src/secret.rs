//! Opaque credentials and the provider trait that supplies them

use anyhow::Result;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder printed instead of a sensitive value
pub const REDACTED: &str = "[redacted]";

/// A credential value that must never be logged or displayed
///
/// `Debug`, `Display` and `Serialize` all print a placeholder. Providers call
/// [`Sensitive::expose`] at the single point where the clear value is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The clear value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sensitive({REDACTED})")
    }
}

impl fmt::Display for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Sensitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

/// Supplier of generated or retrieved credentials, by logical name
pub trait SecretProvider: Send + Sync {
    fn secret(&self, name: &str) -> Result<Sensitive>;
}

/// Provider with no secrets at all
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn secret(&self, name: &str) -> Result<Sensitive> {
        anyhow::bail!("no secret provider configured (requested `{name}`)")
    }
}

/// Fixed in-memory secrets
#[derive(Default)]
pub struct StaticSecrets {
    values: BTreeMap<String, Sensitive>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), Sensitive::new(value));
        self
    }
}

impl SecretProvider for StaticSecrets {
    fn secret(&self, name: &str) -> Result<Sensitive> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown secret `{name}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_never_printed() {
        let secret = Sensitive::new("hunter2");
        assert_eq!(secret.to_string(), "[redacted]");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_static_secrets_lookup() {
        let secrets = StaticSecrets::new().with("db", "s3cret");
        assert_eq!(secrets.secret("db").unwrap().expose(), "s3cret");
        assert!(secrets.secret("other").is_err());
        assert!(NoSecrets.secret("db").is_err());
    }
}
