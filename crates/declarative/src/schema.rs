//! Per-type attribute schemas
//!
//! Every provider publishes a [`TypeSchema`]. The registry validates and
//! coerces declarations against it at registration time, so nothing reaches
//! the scheduler with a malformed attribute.

use crate::error::{Error, Result};
use crate::types::{Attributes, Ensure, ResourceRef, Value};
use std::path::PathBuf;

/// Shape an attribute value must have
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrKind {
    /// Any string (sensitive values allowed)
    String,
    /// Boolean, also accepting yes/no/on/off/true/false/1/0 strings
    Bool,
    /// Signed integer, also accepting decimal strings
    Int,
    /// Permission bits written as an octal string, e.g. `"0640"`
    Mode,
    /// Absolute filesystem path
    AbsolutePath,
    /// on/off toggle, normalised to the strings `on` and `off`
    Switch,
    /// One of a fixed set of strings
    Enum(&'static [&'static str]),
    /// List of values; a single string becomes a one-element list
    List,
    /// Anything, unchecked
    Any,
}

impl AttrKind {
    fn describe(&self) -> String {
        match self {
            Self::String => "a string".into(),
            Self::Bool => "a boolean".into(),
            Self::Int => "an integer".into(),
            Self::Mode => "an octal mode string".into(),
            Self::AbsolutePath => "an absolute path".into(),
            Self::Switch => "on or off".into(),
            Self::Enum(allowed) => format!("one of {}", allowed.join(", ")),
            Self::List => "a list".into(),
            Self::Any => "any value".into(),
        }
    }
}

/// Declared attribute of a resource type
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub kind: AttrKind,
    /// Properties are compared against current state; parameters only steer the provider
    pub property: bool,
    pub required: bool,
    pub default: Option<Value>,
    /// Ensure values the attribute is meaningful for; empty means all
    pub only_with: Vec<Ensure>,
}

/// Validation schema for one resource type
#[derive(Debug, Clone)]
pub struct TypeSchema {
    kind: &'static str,
    ensure: Vec<Ensure>,
    default_ensure: Ensure,
    namevar: Option<&'static str>,
    attributes: Vec<AttributeSpec>,
}

impl TypeSchema {
    /// New schema accepting the given ensure values; the first one is the default
    pub fn new(kind: &'static str, ensure: &[Ensure]) -> Self {
        Self {
            kind,
            ensure: ensure.to_vec(),
            default_ensure: ensure.first().copied().unwrap_or(Ensure::Present),
            namevar: None,
            attributes: Vec::new(),
        }
    }

    /// Attribute that defaults to the resource title when not given
    pub fn namevar(mut self, name: &'static str, kind: AttrKind) -> Self {
        self.namevar = Some(name);
        self.push(name, kind, false)
    }

    /// Attribute compared against current state
    pub fn property(self, name: &'static str, kind: AttrKind) -> Self {
        self.push(name, kind, true)
    }

    /// Attribute that only steers the provider
    pub fn parameter(self, name: &'static str, kind: AttrKind) -> Self {
        self.push(name, kind, false)
    }

    /// Mark the most recently added attribute as required
    pub fn required(mut self) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.required = true;
        }
        self
    }

    /// Restrict the most recently added attribute to some ensure values
    pub fn only_with(mut self, ensure: &[Ensure]) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.only_with = ensure.to_vec();
        }
        self
    }

    /// Give the most recently added attribute a default value
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.default = Some(value.into());
        }
        self
    }

    fn push(mut self, name: &'static str, kind: AttrKind, property: bool) -> Self {
        self.attributes.push(AttributeSpec {
            name,
            kind,
            property,
            required: false,
            default: None,
            only_with: Vec::new(),
        });
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn ensure_values(&self) -> &[Ensure] {
        &self.ensure
    }

    pub fn namevar_name(&self) -> Option<&'static str> {
        self.namevar
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.property)
    }

    /// Validate and coerce a declaration, filling in namevar and defaults
    pub fn validate(
        &self,
        reference: &ResourceRef,
        ensure: Option<Ensure>,
        attributes: Attributes,
    ) -> Result<(Ensure, Attributes)> {
        let invalid = |field: &str, reason: String| Error::InvalidAttribute {
            resource: reference.clone(),
            field: field.to_string(),
            reason,
        };

        let ensure = match ensure {
            None => self.default_ensure,
            Some(e) if self.ensure.contains(&e) => e,
            Some(e) => {
                let allowed: Vec<&str> = self.ensure.iter().map(|e| e.as_str()).collect();
                return Err(invalid(
                    "ensure",
                    format!("`{e}` is not supported (expected {})", allowed.join(", ")),
                ));
            }
        };

        let mut coerced = Attributes::new();
        for (name, value) in attributes {
            let spec = self
                .attribute(&name)
                .ok_or_else(|| invalid(&name, "unknown attribute".into()))?;
            if !spec.only_with.is_empty() && !spec.only_with.contains(&ensure) {
                return Err(invalid(&name, format!("not supported with ensure `{ensure}`")));
            }
            let value = coerce(&spec.kind, value).map_err(|reason| invalid(&name, reason))?;
            coerced.insert(name, value);
        }

        if let Some(namevar) = self.namevar
            && !coerced.contains_key(namevar)
            && let Some(spec) = self.attribute(namevar)
        {
            let value = coerce(&spec.kind, Value::Str(reference.title.clone()))
                .map_err(|reason| invalid(namevar, format!("title: {reason}")))?;
            coerced.insert(namevar.to_string(), value);
        }

        for spec in &self.attributes {
            if coerced.contains_key(spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                coerced.insert(spec.name.to_string(), default.clone());
            } else if spec.required && ensure != Ensure::Absent {
                return Err(invalid(spec.name, "required attribute is missing".into()));
            }
        }

        Ok((ensure, coerced))
    }
}

fn coerce(kind: &AttrKind, value: Value) -> std::result::Result<Value, String> {
    match (kind, value) {
        (AttrKind::Any, v) => Ok(v),
        (AttrKind::String, v @ (Value::Str(_) | Value::Sensitive(_))) => Ok(v),
        (AttrKind::String, Value::Int(i)) => Ok(Value::Str(i.to_string())),
        (AttrKind::String, Value::Bool(b)) => Ok(Value::Str(b.to_string())),
        (AttrKind::String, Value::Path(p)) => Ok(Value::Str(p.display().to_string())),
        (AttrKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (AttrKind::Bool, Value::Str(s)) => parse_bool(&s)
            .map(Value::Bool)
            .ok_or_else(|| format!("expected a boolean, got `{s}`")),
        (AttrKind::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (AttrKind::Int, Value::Str(s)) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| format!("expected an integer, got `{s}`")),
        (AttrKind::Mode, Value::Str(s)) => parse_mode(&s).map(Value::Int),
        (AttrKind::Mode, Value::Int(_)) => {
            Err("file modes must be quoted octal strings such as \"0644\"".into())
        }
        (AttrKind::AbsolutePath, Value::Str(s)) => absolute(PathBuf::from(s)),
        (AttrKind::AbsolutePath, Value::Path(p)) => absolute(p),
        (AttrKind::Switch, Value::Bool(b)) => Ok(switch(b)),
        (AttrKind::Switch, Value::Str(s)) => parse_bool(&s)
            .map(switch)
            .ok_or_else(|| format!("expected on or off, got `{s}`")),
        (AttrKind::Enum(allowed), Value::Str(s)) => {
            if allowed.contains(&s.as_str()) {
                Ok(Value::Str(s))
            } else {
                Err(format!("`{s}` is not one of {}", allowed.join(", ")))
            }
        }
        (AttrKind::List, Value::List(items)) => Ok(Value::List(items)),
        (AttrKind::List, v @ Value::Str(_)) => Ok(Value::List(vec![v])),
        (_, Value::Sensitive(_)) => {
            Err("sensitive values are only accepted for string attributes".into())
        }
        (kind, v) => Err(format!("expected {}, got {}", kind.describe(), v.type_name())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_mode(s: &str) -> std::result::Result<i64, String> {
    let digits = s.trim();
    if !(3..=4).contains(&digits.len()) || !digits.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(format!("`{s}` is not an octal mode such as 0644"));
    }
    i64::from_str_radix(digits, 8).map_err(|e| e.to_string())
}

fn absolute(path: PathBuf) -> std::result::Result<Value, String> {
    if path.is_absolute() {
        Ok(Value::Path(path))
    } else {
        Err(format!("`{}` must be an absolute path", path.display()))
    }
}

fn switch(on: bool) -> Value {
    Value::Str(if on { "on" } else { "off" }.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_schema() -> TypeSchema {
        TypeSchema::new("file", &[Ensure::File, Ensure::Directory, Ensure::Absent])
            .namevar("path", AttrKind::AbsolutePath)
            .property("mode", AttrKind::Mode)
            .only_with(&[Ensure::File, Ensure::Directory])
            .property("content", AttrKind::String)
            .parameter("force", AttrKind::Bool)
            .default_value(false)
    }

    fn validate(attrs: Attributes) -> Result<(Ensure, Attributes)> {
        file_schema().validate(&ResourceRef::new("file", "/etc/motd"), None, attrs)
    }

    #[test]
    fn test_namevar_defaults_to_title() {
        let (ensure, attrs) = validate(Attributes::new()).unwrap();
        assert_eq!(ensure, Ensure::File);
        assert_eq!(
            attrs.get("path"),
            Some(&Value::Path(PathBuf::from("/etc/motd")))
        );
        assert_eq!(attrs.get("force"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_mode_string_is_coerced_to_octal() {
        let attrs = Attributes::from([("mode".to_string(), Value::from("0640"))]);
        let (_, attrs) = validate(attrs).unwrap();
        assert_eq!(attrs.get("mode"), Some(&Value::Int(0o640)));
    }

    #[test]
    fn test_attribute_rejected_for_other_ensure() {
        let attrs = Attributes::from([("mode".to_string(), Value::from("0640"))]);
        let err = file_schema()
            .validate(&ResourceRef::new("file", "/etc/motd"), Some(Ensure::Absent), attrs)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { ref field, .. } if field == "mode"));
    }

    #[test]
    fn test_bare_integer_mode_is_rejected() {
        let attrs = Attributes::from([("mode".to_string(), Value::Int(644))]);
        let err = validate(attrs).unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { ref field, .. } if field == "mode"));
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let attrs = Attributes::from([("path".to_string(), Value::from("etc/motd"))]);
        let err = validate(attrs).unwrap_err();
        assert!(err.to_string().contains("absolute path"));
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let attrs = Attributes::from([("colour".to_string(), Value::from("blue"))]);
        let err = validate(attrs).unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { ref reason, .. } if reason == "unknown attribute"));
    }

    #[test]
    fn test_unsupported_ensure_is_rejected() {
        let err = file_schema()
            .validate(
                &ResourceRef::new("file", "/etc/motd"),
                Some(Ensure::Running),
                Attributes::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { ref field, .. } if field == "ensure"));
    }

    #[test]
    fn test_bool_and_switch_coercion() {
        let schema = TypeSchema::new("selboolean", &[Ensure::Present])
            .namevar("name", AttrKind::String)
            .property("value", AttrKind::Switch)
            .required()
            .parameter("persistent", AttrKind::Bool);
        let attrs = Attributes::from([
            ("value".to_string(), Value::Bool(true)),
            ("persistent".to_string(), Value::from("yes")),
        ]);
        let (_, attrs) = schema
            .validate(&ResourceRef::new("selboolean", "httpd_can_network_connect"), None, attrs)
            .unwrap();
        assert_eq!(attrs.get("value"), Some(&Value::from("on")));
        assert_eq!(attrs.get("persistent"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_required_attribute_missing() {
        let schema = TypeSchema::new("selboolean", &[Ensure::Present])
            .property("value", AttrKind::Switch)
            .required();
        let err = schema
            .validate(&ResourceRef::new("selboolean", "x"), None, Attributes::new())
            .unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_enum_membership() {
        let schema = TypeSchema::new("service", &[Ensure::Running])
            .parameter("provider", AttrKind::Enum(&["systemd", "sysv"]));
        let bad = Attributes::from([("provider".to_string(), Value::from("launchd"))]);
        assert!(
            schema
                .validate(&ResourceRef::new("service", "httpd"), None, bad)
                .is_err()
        );
    }
}
