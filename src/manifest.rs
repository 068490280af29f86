//! TOML manifest loading
//!
//! A manifest is one `.toml` file or a directory of them (read in sorted
//! order). Each file holds `[[resource]]` and `[[chain]]` tables:
//!
//! ```toml
//! [[resource]]
//! type = "file"
//! title = "httpd.conf"
//! ensure = "file"
//! require = ["Package[httpd]"]
//! notify = "Service[httpd]"
//! when = { os_family = "RedHat", selinux = ["enforcing", "permissive"] }
//! [resource.attributes]
//! path = "/etc/httpd/conf/httpd.conf"
//! mode = "0644"
//! modules = { fact = "architecture", cases = { x86_64 = "/usr/lib64/httpd/modules" }, default = "/usr/lib/httpd/modules" }
//!
//! [[chain]]
//! kind = "notify"
//! resources = ["File[httpd.conf]", "Service[httpd]"]
//! ```

use anyhow::{Context, Result};
use declarative::{Chain, Condition, Declaration, EdgeKind, Ensure, Relation, ResourceRef, Value, ValueExpr};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceDecl>,
    #[serde(default, rename = "chain")]
    chains: Vec<ChainDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDecl {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    ensure: Option<String>,
    #[serde(default)]
    require: OneOrMany,
    #[serde(default)]
    before: OneOrMany,
    #[serde(default)]
    notify: OneOrMany,
    #[serde(default)]
    subscribe: OneOrMany,
    /// Every listed fact must match
    #[serde(default)]
    when: BTreeMap<String, OneOrMany>,
    /// Excluded if any listed fact matches
    #[serde(default)]
    not_when: BTreeMap<String, OneOrMany>,
    #[serde(default)]
    attributes: BTreeMap<String, AttrDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainDecl {
    kind: EdgeKind,
    resources: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AttrDecl {
    Secret(SecretDecl),
    Select(SelectDecl),
    Literal(toml::Value),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecretDecl {
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectDecl {
    fact: String,
    cases: BTreeMap<String, toml::Value>,
    default: Option<toml::Value>,
}

/// Declarations and chains from one or more manifest files
#[derive(Debug, Default)]
pub struct Manifest {
    pub declarations: Vec<Declaration>,
    pub chains: Vec<Chain>,
    pub sources: Vec<PathBuf>,
}

impl Manifest {
    /// Load a manifest file, or every `*.toml` file under a directory
    pub fn load(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let files: Vec<PathBuf> = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .collect();
            if files.is_empty() {
                anyhow::bail!("No *.toml manifests found in {}", path.display());
            }
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut manifest = Self::default();
        for file in files {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Could not read manifest: {}", file.display()))?;
            manifest
                .extend_from_str(&content)
                .with_context(|| format!("Invalid manifest: {}", file.display()))?;
            manifest.sources.push(file);
        }
        log::debug!(
            "Loaded {} declarations and {} chains from {} files",
            manifest.declarations.len(),
            manifest.chains.len(),
            manifest.sources.len()
        );
        Ok(manifest)
    }

    /// Parse one manifest document
    pub fn parse(content: &str) -> Result<Self> {
        let mut manifest = Self::default();
        manifest.extend_from_str(content)?;
        Ok(manifest)
    }

    fn extend_from_str(&mut self, content: &str) -> Result<()> {
        let file: ManifestFile = toml::from_str(content).context("Invalid TOML")?;

        for (index, decl) in file.resources.into_iter().enumerate() {
            let label = format!("resource #{} ({}[{}])", index + 1, decl.kind, decl.title);
            let declaration = declaration(decl).with_context(|| label)?;
            self.declarations.push(declaration);
        }

        for (index, chain) in file.chains.into_iter().enumerate() {
            let resources = chain
                .resources
                .iter()
                .map(|r| r.parse::<ResourceRef>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("chain #{}", index + 1))?;
            if resources.len() < 2 {
                anyhow::bail!("chain #{} needs at least two resources", index + 1);
            }
            self.chains.push(Chain {
                kind: chain.kind,
                resources,
            });
        }
        Ok(())
    }
}

fn declaration(decl: ResourceDecl) -> Result<Declaration> {
    let mut declaration = Declaration::new(decl.kind, decl.title);

    if let Some(ensure) = decl.ensure {
        let ensure: Ensure = ensure.parse().map_err(anyhow::Error::msg)?;
        declaration = declaration.ensure(ensure);
    }

    for (relation, refs) in [
        (Relation::Require, decl.require),
        (Relation::Before, decl.before),
        (Relation::Notify, decl.notify),
        (Relation::Subscribe, decl.subscribe),
    ] {
        for reference in refs.into_vec() {
            declaration = declaration.relate(relation, reference.parse()?);
        }
    }

    declaration.condition = condition(decl.when, decl.not_when);

    for (name, attr) in decl.attributes {
        let expr = match attr {
            AttrDecl::Secret(s) => ValueExpr::Secret(s.secret),
            AttrDecl::Select(s) => ValueExpr::Select {
                fact: s.fact,
                cases: s
                    .cases
                    .into_iter()
                    .map(|(k, v)| -> Result<(String, Value)> { Ok((k, value(v)?)) })
                    .collect::<Result<_>>()
                    .with_context(|| format!("attribute `{name}`"))?,
                default: s
                    .default
                    .map(value)
                    .transpose()
                    .with_context(|| format!("attribute `{name}`"))?,
            },
            AttrDecl::Literal(v) => {
                ValueExpr::Literal(value(v).with_context(|| format!("attribute `{name}`"))?)
            }
        };
        declaration.attributes.insert(name, expr);
    }

    Ok(declaration)
}

fn fact_condition(fact: String, accepted: OneOrMany) -> Condition {
    match accepted {
        OneOrMany::One(value) => Condition::Equals { fact, value },
        OneOrMany::Many(values) => Condition::OneOf { fact, values },
    }
}

fn condition(
    when: BTreeMap<String, OneOrMany>,
    not_when: BTreeMap<String, OneOrMany>,
) -> Option<Condition> {
    let mut all: Vec<Condition> = when
        .into_iter()
        .map(|(fact, accepted)| fact_condition(fact, accepted))
        .collect();
    if !not_when.is_empty() {
        let any = not_when
            .into_iter()
            .map(|(fact, accepted)| fact_condition(fact, accepted))
            .collect();
        all.push(Condition::Not(Box::new(Condition::Any(any))));
    }

    match all.len() {
        0 => None,
        1 => all.pop(),
        _ => Some(Condition::All(all)),
    }
}

fn value(v: toml::Value) -> Result<Value> {
    Ok(match v {
        toml::Value::String(s) => Value::Str(s),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Str(f.to_string()),
        toml::Value::Datetime(d) => Value::Str(d.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(value).collect::<Result<_>>()?),
        toml::Value::Table(_) => anyhow::bail!("tables are not valid attribute values"),
    })
}
