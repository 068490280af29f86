//! Declarations as submitted by the manifest layer
//!
//! A [`Declaration`] may carry a fact [`Condition`] and attribute values that
//! depend on facts or secrets. [`include`] is the pure `facts -> subset`
//! function evaluated once before registration; [`Declaration::resolve`] turns
//! the surviving declarations into concrete attribute bags.

use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::graph::EdgeKind;
use crate::secret::SecretProvider;
use crate::types::{Attributes, Ensure, ResourceRef, Value};
use std::collections::BTreeMap;

/// An attribute value that may depend on facts or secrets
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Literal(Value),
    /// Pick a value by the current value of a fact
    Select {
        fact: String,
        cases: BTreeMap<String, Value>,
        default: Option<Value>,
    },
    /// Credential looked up by logical name
    Secret(String),
}

impl From<Value> for ValueExpr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Predicate over host facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals { fact: String, value: String },
    OneOf { fact: String, values: Vec<String> },
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn equals(fact: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            fact: fact.into(),
            value: value.into(),
        }
    }

    pub fn one_of<S: Into<String>>(fact: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::OneOf {
            fact: fact.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate against a fact snapshot; a missing fact never matches
    pub fn eval(&self, facts: &Facts) -> bool {
        match self {
            Self::Equals { fact, value } => facts.get(fact) == Some(value.as_str()),
            Self::OneOf { fact, values } => facts
                .get(fact)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
            Self::Not(inner) => !inner.eval(facts),
            Self::All(all) => all.iter().all(|c| c.eval(facts)),
            Self::Any(any) => any.iter().any(|c| c.eval(facts)),
        }
    }
}

/// Relationship metaparameter declared on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The other resource must run first
    Require,
    /// This resource must run first
    Before,
    /// Signal the other resource when this one changes
    Notify,
    /// Be signalled when the other resource changes
    Subscribe,
}

/// A resource declaration before fact evaluation
#[derive(Debug, Clone)]
pub struct Declaration {
    pub kind: String,
    pub title: String,
    pub ensure: Option<Ensure>,
    pub attributes: BTreeMap<String, ValueExpr>,
    pub condition: Option<Condition>,
    pub relations: Vec<(Relation, ResourceRef)>,
}

impl Declaration {
    pub fn new(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.into().to_ascii_lowercase(),
            title: title.into(),
            ensure: None,
            attributes: BTreeMap::new(),
            condition: None,
            relations: Vec::new(),
        }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, &self.title)
    }

    pub fn ensure(mut self, ensure: Ensure) -> Self {
        self.ensure = Some(ensure);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .insert(name.into(), ValueExpr::Literal(value.into()));
        self
    }

    /// Attribute chosen by fact value, with an optional fallback
    pub fn select<K, V>(
        mut self,
        name: impl Into<String>,
        fact: impl Into<String>,
        cases: impl IntoIterator<Item = (K, V)>,
        default: Option<Value>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.attributes.insert(
            name.into(),
            ValueExpr::Select {
                fact: fact.into(),
                cases: cases
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
                default,
            },
        );
        self
    }

    pub fn secret(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.attributes
            .insert(name.into(), ValueExpr::Secret(secret.into()));
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn relate(mut self, relation: Relation, other: ResourceRef) -> Self {
        self.relations.push((relation, other));
        self
    }

    pub fn require(self, other: ResourceRef) -> Self {
        self.relate(Relation::Require, other)
    }

    pub fn before(self, other: ResourceRef) -> Self {
        self.relate(Relation::Before, other)
    }

    pub fn notify(self, other: ResourceRef) -> Self {
        self.relate(Relation::Notify, other)
    }

    pub fn subscribe(self, other: ResourceRef) -> Self {
        self.relate(Relation::Subscribe, other)
    }

    /// Whether this declaration applies to the host described by `facts`
    pub fn applies_to(&self, facts: &Facts) -> bool {
        self.condition.as_ref().is_none_or(|c| c.eval(facts))
    }

    /// Resolve selectors and secrets into a concrete attribute bag
    ///
    /// Secret values are wrapped as [`Value::Sensitive`] and never inspected.
    pub fn resolve(&self, facts: &Facts, secrets: &dyn SecretProvider) -> Result<Attributes> {
        let mut resolved = Attributes::new();
        for (name, expr) in &self.attributes {
            let value = match expr {
                ValueExpr::Literal(v) => v.clone(),
                ValueExpr::Select {
                    fact,
                    cases,
                    default,
                } => {
                    let actual = facts.get(fact);
                    actual
                        .and_then(|a| cases.get(a))
                        .or(default.as_ref())
                        .cloned()
                        .ok_or_else(|| Error::MissingSelectorCase {
                            resource: self.reference(),
                            attribute: name.clone(),
                            fact: fact.clone(),
                            value: actual.map(str::to_string),
                        })?
                }
                ValueExpr::Secret(secret) => {
                    let value = secrets.secret(secret).map_err(|e| Error::Secret {
                        resource: self.reference(),
                        name: secret.clone(),
                        message: format!("{e:#}"),
                    })?;
                    Value::Sensitive(value)
                }
            };
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }
}

/// Explicit chain of references, `A -> B -> C` or `A ~> B ~> C`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub kind: EdgeKind,
    pub resources: Vec<ResourceRef>,
}

/// Conditional inclusion: the declarations that apply to this host
///
/// Pure and evaluated once; excluded declarations simply never reach the
/// registry.
pub fn include<'a>(declarations: &'a [Declaration], facts: &Facts) -> Vec<&'a Declaration> {
    declarations
        .iter()
        .filter(|d| {
            let applies = d.applies_to(facts);
            if !applies {
                log::debug!("{} excluded by its condition", d.reference());
            }
            applies
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ARCHITECTURE, OS_FAMILY, SELINUX};
    use crate::secret::{NoSecrets, StaticSecrets};
    use std::path::PathBuf;

    fn module_dir() -> Declaration {
        Declaration::new("file", "httpd-modules").select(
            "path",
            ARCHITECTURE,
            [("x86_64", PathBuf::from("/usr/lib64/httpd/modules"))],
            Some(Value::Path(PathBuf::from("/usr/lib/httpd/modules"))),
        )
    }

    #[test]
    fn test_selector_picks_64bit_path() {
        let facts = Facts::new().with(ARCHITECTURE, "x86_64");
        let attrs = module_dir().resolve(&facts, &NoSecrets).unwrap();
        assert_eq!(
            attrs.get("path"),
            Some(&Value::Path(PathBuf::from("/usr/lib64/httpd/modules")))
        );
    }

    #[test]
    fn test_selector_falls_back_for_32bit() {
        let facts = Facts::new().with(ARCHITECTURE, "i386");
        let attrs = module_dir().resolve(&facts, &NoSecrets).unwrap();
        assert_eq!(
            attrs.get("path"),
            Some(&Value::Path(PathBuf::from("/usr/lib/httpd/modules")))
        );
    }

    #[test]
    fn test_architecture_leaves_other_declarations_alone() {
        let other = Declaration::new("file", "/etc/httpd/conf/httpd.conf").attr("mode", "0644");
        let x86 = Facts::new().with(ARCHITECTURE, "x86_64");
        let i386 = Facts::new().with(ARCHITECTURE, "i386");
        assert_eq!(
            other.resolve(&x86, &NoSecrets).unwrap(),
            other.resolve(&i386, &NoSecrets).unwrap()
        );
    }

    #[test]
    fn test_selector_without_match_or_default() {
        let decl = Declaration::new("file", "x").select(
            "path",
            ARCHITECTURE,
            [("x86_64", "/a")],
            None,
        );
        let err = decl
            .resolve(&Facts::new().with(ARCHITECTURE, "s390x"), &NoSecrets)
            .unwrap_err();
        assert!(matches!(err, Error::MissingSelectorCase { .. }));
    }

    #[test]
    fn test_include_filters_by_condition() {
        let decls = vec![
            Declaration::new("package", "httpd"),
            Declaration::new("selboolean", "httpd_can_network_connect").when(Condition::All(vec![
                Condition::equals(OS_FAMILY, "RedHat"),
                Condition::Not(Box::new(Condition::equals(SELINUX, "disabled"))),
            ])),
        ];

        let redhat = Facts::new().with(OS_FAMILY, "RedHat").with(SELINUX, "enforcing");
        let debian = Facts::new().with(OS_FAMILY, "Debian").with(SELINUX, "disabled");

        assert_eq!(include(&decls, &redhat).len(), 2);
        let selected = include(&decls, &debian);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "httpd");
    }

    #[test]
    fn test_missing_fact_never_matches() {
        let cond = Condition::one_of(OS_FAMILY, ["RedHat", "Debian"]);
        assert!(!cond.eval(&Facts::new()));
        assert!(Condition::Not(Box::new(cond)).eval(&Facts::new()));
    }

    #[test]
    fn test_secret_is_resolved_as_sensitive() {
        let secrets = StaticSecrets::new().with("rsync_password", "s3cret");
        let attrs = Declaration::new("sync", "/var/www/html")
            .secret("password", "rsync_password")
            .resolve(&Facts::new(), &secrets)
            .unwrap();
        let value = attrs.get("password").and_then(Value::as_sensitive).unwrap();
        assert_eq!(value.expose(), "s3cret");
    }

    #[test]
    fn test_unknown_secret_reports_resource() {
        let err = Declaration::new("sync", "/var/www/html")
            .secret("password", "missing")
            .resolve(&Facts::new(), &NoSecrets)
            .unwrap_err();
        assert!(err.to_string().contains("Sync[/var/www/html]"));
    }
}
