//! Resource registry
//!
//! Holds every resource of a run in declaration order, validated against its
//! type schema, plus the relationships declared between them. The registry
//! is filled once and read by the graph builder and scheduler.

use crate::declaration::{Chain, Declaration, Relation};
use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::graph::EdgeKind;
use crate::provider::ProviderSet;
use crate::schema::TypeSchema;
use crate::secret::SecretProvider;
use crate::types::{Attributes, Ensure, ResourceId, ResourceRef, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// A registered resource
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: ResourceId,
    pub reference: ResourceRef,
    pub ensure: Ensure,
    pub attributes: Attributes,
}

impl Resource {
    pub fn kind(&self) -> &str {
        &self.reference.kind
    }

    pub fn title(&self) -> &str {
        &self.reference.title
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(Value::as_str)
    }

    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attr(name).and_then(Value::as_bool)
    }

    pub fn attr_path(&self, name: &str) -> Option<&Path> {
        self.attr(name).and_then(Value::as_path)
    }

    /// String value of `name`, falling back to the title
    pub fn name_or_title(&self, name: &str) -> &str {
        self.attr_str(name).unwrap_or(self.title())
    }
}

/// A relationship as declared, before the graph resolves it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredEdge {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub kind: EdgeKind,
    /// How the edge was declared, for error messages
    pub origin: String,
}

/// Every resource of a run, in declaration order
#[derive(Debug, Default)]
pub struct Registry {
    schemas: HashMap<String, TypeSchema>,
    resources: Vec<Resource>,
    index: HashMap<ResourceRef, ResourceId>,
    edges: Vec<DeclaredEdge>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that knows the schema of every provider in the set
    pub fn for_providers(providers: &ProviderSet) -> Self {
        let mut registry = Self::new();
        for schema in providers.schemas() {
            registry.define(schema);
        }
        registry
    }

    /// Make a resource type known
    pub fn define(&mut self, schema: TypeSchema) {
        self.schemas.insert(schema.kind().to_string(), schema);
    }

    pub fn schema(&self, kind: &str) -> Option<&TypeSchema> {
        self.schemas.get(kind)
    }

    /// Validate and add a resource
    ///
    /// Fails with [`Error::DuplicateResource`] if `Type[title]` is already
    /// registered, [`Error::UnknownType`] if no schema exists for the type, or
    /// [`Error::InvalidAttribute`] if the attributes don't satisfy the schema.
    pub fn register(
        &mut self,
        kind: &str,
        title: &str,
        attributes: Attributes,
        ensure: Option<Ensure>,
    ) -> Result<ResourceId> {
        let reference = ResourceRef::new(kind, title);
        if self.index.contains_key(&reference) {
            return Err(Error::DuplicateResource(reference));
        }
        let schema = self
            .schemas
            .get(&reference.kind)
            .ok_or_else(|| Error::UnknownType {
                kind: reference.kind.clone(),
                resource: reference.clone(),
            })?;
        let (ensure, attributes) = schema.validate(&reference, ensure, attributes)?;

        let id = ResourceId(self.resources.len());
        log::debug!("registered {reference} as #{}", id.index());
        self.index.insert(reference.clone(), id);
        self.resources.push(Resource {
            id,
            reference,
            ensure,
            attributes,
        });
        Ok(id)
    }

    /// Resolve a declaration against facts and secrets, then register it
    /// together with its relationships
    pub fn register_declaration(
        &mut self,
        declaration: &Declaration,
        facts: &Facts,
        secrets: &dyn SecretProvider,
    ) -> Result<ResourceId> {
        let attributes = declaration.resolve(facts, secrets)?;
        let id = self.register(
            &declaration.kind,
            &declaration.title,
            attributes,
            declaration.ensure,
        )?;
        let this = declaration.reference();
        for (relation, other) in &declaration.relations {
            match relation {
                Relation::Require => self.require(&this, other),
                Relation::Before => self.before(&this, other),
                Relation::Notify => self.notify(&this, other),
                Relation::Subscribe => self.subscribe(&this, other),
            }
        }
        Ok(id)
    }

    /// `dependent` runs after `prerequisite`
    pub fn require(&mut self, dependent: &ResourceRef, prerequisite: &ResourceRef) {
        self.push_edge(prerequisite, dependent, EdgeKind::Order, "require");
    }

    /// `first` runs before `then`
    pub fn before(&mut self, first: &ResourceRef, then: &ResourceRef) {
        self.push_edge(first, then, EdgeKind::Order, "before");
    }

    /// `target` is refreshed when `source` changes
    pub fn notify(&mut self, source: &ResourceRef, target: &ResourceRef) {
        self.push_edge(source, target, EdgeKind::Notify, "notify");
    }

    /// `subscriber` is refreshed when `source` changes
    pub fn subscribe(&mut self, subscriber: &ResourceRef, source: &ResourceRef) {
        self.push_edge(source, subscriber, EdgeKind::Notify, "subscribe");
    }

    /// Consecutive pairs of the chain become edges of its kind
    pub fn chain(&mut self, chain: &Chain) {
        let origin = match chain.kind {
            EdgeKind::Order => "->",
            EdgeKind::Notify => "~>",
        };
        for pair in chain.resources.windows(2) {
            self.push_edge(&pair[0], &pair[1], chain.kind, origin);
        }
    }

    fn push_edge(&mut self, from: &ResourceRef, to: &ResourceRef, kind: EdgeKind, origin: &str) {
        self.edges.push(DeclaredEdge {
            from: from.clone(),
            to: to.clone(),
            kind,
            origin: format!("{from} {origin} {to}"),
        });
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.index())
    }

    pub fn lookup(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.index.get(reference).copied()
    }

    /// All resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn edges(&self) -> &[DeclaredEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
