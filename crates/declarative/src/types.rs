//! Core types for declarative resource management

use crate::error::Error;
use crate::secret::Sensitive;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_]*(?:::[A-Za-z][A-Za-z0-9_]*)*)\[(.+)\]$")
        .expect("reference pattern is valid")
});

/// Dense handle for a registered resource
///
/// The index is the resource's declaration position, which is also the
/// tie-break used when ordering independent resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    /// Declaration index of this resource
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identity of a resource: its type plus its title, unique within a run
///
/// Displayed and parsed as `Type[title]`, e.g. `File[/etc/httpd/conf/httpd.conf]`.
/// Types are stored lowercase, so `Service[httpd]` and `service[httpd]` are the
/// same resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub title: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.into().to_ascii_lowercase(),
            title: title.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self
            .kind
            .split("::")
            .map(capitalize)
            .collect::<Vec<_>>()
            .join("::");
        write!(f, "{}[{}]", kind, self.title)
    }
}

impl FromStr for ResourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = REFERENCE
            .captures(s.trim())
            .ok_or_else(|| Error::InvalidReference(s.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl Serialize for ResourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Desired or observed lifecycle state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// Exists, in whatever form the type considers natural
    Present,
    /// Does not exist
    Absent,
    /// A regular file
    File,
    /// A directory
    Directory,
    /// A symbolic link
    Symlink,
    /// A service that is running
    Running,
    /// A service that is not running
    Stopped,
}

impl Ensure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Ensure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ensure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" | "installed" => Ok(Self::Present),
            "absent" | "purged" => Ok(Self::Absent),
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            "symlink" | "link" => Ok(Self::Symlink),
            "running" | "true" => Ok(Self::Running),
            "stopped" | "false" => Ok(Self::Stopped),
            other => Err(format!("unknown ensure value `{other}`")),
        }
    }
}

/// An attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Path(PathBuf),
    List(Vec<Value>),
    /// Opaque credential; never displayed or serialized in clear
    Sensitive(Sensitive),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_sensitive(&self) -> Option<&Sensitive> {
        match self {
            Self::Sensitive(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Path(_) => "path",
            Self::List(_) => "list",
            Self::Sensitive(_) => "sensitive",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Sensitive(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl From<Sensitive> for Value {
    fn from(s: Sensitive) -> Self {
        Self::Sensitive(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Attribute bag of a resource, ordered by name
pub type Attributes = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_roundtrip_display() {
        let r: ResourceRef = "File[/etc/httpd/conf/httpd.conf]".parse().unwrap();
        assert_eq!(r.kind, "file");
        assert_eq!(r.title, "/etc/httpd/conf/httpd.conf");
        assert_eq!(r.to_string(), "File[/etc/httpd/conf/httpd.conf]");
    }

    #[test]
    fn test_reference_type_is_case_insensitive() {
        let a: ResourceRef = "service[httpd]".parse().unwrap();
        let b: ResourceRef = "Service[httpd]".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reference_namespaced_type() {
        let r: ResourceRef = "apache::vhost[default]".parse().unwrap();
        assert_eq!(r.to_string(), "Apache::Vhost[default]");
    }

    #[test]
    fn test_reference_rejects_malformed() {
        assert!("httpd".parse::<ResourceRef>().is_err());
        assert!("Service[]".parse::<ResourceRef>().is_err());
        assert!("[httpd]".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_ensure_aliases() {
        assert_eq!("installed".parse::<Ensure>().unwrap(), Ensure::Present);
        assert_eq!("link".parse::<Ensure>().unwrap(), Ensure::Symlink);
        assert_eq!("RUNNING".parse::<Ensure>().unwrap(), Ensure::Running);
        assert!("sideways".parse::<Ensure>().is_err());
    }

    #[test]
    fn test_sensitive_value_is_redacted() {
        let v = Value::from(Sensitive::new("hunter2"));
        assert!(!v.to_string().contains("hunter2"));
        assert!(!format!("{v:?}").contains("hunter2"));
    }
}
