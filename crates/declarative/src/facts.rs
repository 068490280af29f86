//! Read-only host fact snapshot
//!
//! Facts are gathered once, before any declaration is selected, and passed
//! explicitly to everything that needs them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Operating-system family, e.g. `RedHat`, `Debian`
pub const OS_FAMILY: &str = "os_family";
/// Major release of the operating system, e.g. `9`
pub const OS_RELEASE_MAJOR: &str = "os_release_major";
/// Hardware architecture, e.g. `x86_64`, `i386`, `aarch64`
pub const ARCHITECTURE: &str = "architecture";
/// SELinux enforcement mode
pub const SELINUX: &str = "selinux";

/// SELinux enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelinuxMode {
    Enforcing,
    Permissive,
    Disabled,
}

impl SelinuxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enforcing => "enforcing",
            Self::Permissive => "permissive",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SelinuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelinuxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforcing" => Ok(Self::Enforcing),
            "permissive" => Ok(Self::Permissive),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown SELinux mode `{other}`")),
        }
    }
}

/// Key/value snapshot of the current host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Facts {
    values: BTreeMap<String, String>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn os_family(&self) -> Option<&str> {
        self.get(OS_FAMILY)
    }

    pub fn os_release_major(&self) -> Option<u32> {
        self.get(OS_RELEASE_MAJOR).and_then(|v| v.parse().ok())
    }

    pub fn architecture(&self) -> Option<&str> {
        self.get(ARCHITECTURE)
    }

    pub fn selinux(&self) -> Option<SelinuxMode> {
        self.get(SELINUX).and_then(|v| v.parse().ok())
    }

    /// Overlay `other` on top of these facts, returning the merged snapshot
    pub fn merged<K, V>(mut self, other: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in other {
            self.insert(k, v);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new().merged(iter)
    }
}
