//! Capability provider contract
//!
//! A provider knows how to observe and correct one resource type. The core
//! only ever talks to providers through this trait.

use crate::context::ProviderContext;
use crate::registry::Resource;
use crate::schema::TypeSchema;
use crate::types::{Attributes, Ensure, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Providers report failures with context chains, like any fallible step
pub type ProviderResult<T> = anyhow::Result<T>;

/// Observed state of a resource
///
/// Only the properties the provider could observe are present; a missing
/// property is reported as drift when the resource declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentState {
    pub ensure: Ensure,
    pub attributes: Attributes,
}

impl CurrentState {
    pub fn new(ensure: Ensure) -> Self {
        Self {
            ensure,
            attributes: Attributes::new(),
        }
    }

    /// The resource does not exist
    pub fn absent() -> Self {
        Self::new(Ensure::Absent)
    }

    /// Builder-style attribute insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// What a corrective action did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Created,
    Modified,
    Removed,
    Refreshed,
    /// The provider found nothing to do after all
    NoChange,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Refreshed => "refreshed",
            Self::NoChange => "no change",
        };
        f.write_str(s)
    }
}

/// Observe and correct resources of one type
///
/// Implementations must be safe to share across the worker pool. The
/// scheduler guarantees at most one in-flight call per resource.
pub trait Provider: Send + Sync {
    /// Resource type handled, lowercase (e.g. "file", "service")
    fn kind(&self) -> &'static str;

    /// Attribute schema used to validate declarations of this type
    fn schema(&self) -> TypeSchema;

    /// Observe the current state of the resource
    fn read_state(&self, resource: &Resource, ctx: &ProviderContext) -> ProviderResult<CurrentState>;

    /// Whether one observed property satisfies its declared value
    fn in_sync(&self, _property: &str, desired: &Value, current: &Value) -> bool {
        desired == current
    }

    /// Converge the resource from `current` to its declared state
    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        ctx: &ProviderContext,
    ) -> ProviderResult<Outcome>;

    /// React to a change notification
    ///
    /// The default re-reads and re-applies. Providers with a dedicated reload
    /// action (service restart) override it.
    fn refresh(&self, resource: &Resource, ctx: &ProviderContext) -> ProviderResult<Outcome> {
        let current = self.read_state(resource, ctx)?;
        match self.apply_state(resource, &current, ctx)? {
            Outcome::NoChange => Ok(Outcome::Refreshed),
            outcome => Ok(outcome),
        }
    }
}

/// Providers keyed by the resource type they handle
#[derive(Default)]
pub struct ProviderSet {
    providers: HashMap<&'static str, Box<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any previous one for the same type
    pub fn insert(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Builder-style insert
    pub fn with(mut self, provider: impl Provider + 'static) -> Self {
        self.insert(Box::new(provider));
        self
    }

    pub fn get(&self, kind: &str) -> Option<&dyn Provider> {
        self.providers.get(kind).map(AsRef::as_ref)
    }

    /// Schemas of every provider, sorted by type name
    pub fn schemas(&self) -> Vec<TypeSchema> {
        let mut schemas: Vec<TypeSchema> = self.providers.values().map(|p| p.schema()).collect();
        schemas.sort_by_key(TypeSchema::kind);
        schemas
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.providers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}
