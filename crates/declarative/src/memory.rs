//! In-memory provider for exercising the scheduler
//!
//! [`MemoryHost`] is a fake host: a map from resource to observed state plus a
//! log of every provider call. Failures can be injected per resource. Clones
//! share the same host, so tests keep a handle while the provider is owned by
//! a [`ProviderSet`](crate::ProviderSet).

use crate::context::ProviderContext;
use crate::provider::{CurrentState, Outcome, Provider, ProviderResult};
use crate::registry::Resource;
use crate::schema::TypeSchema;
use crate::types::{Ensure, ResourceRef};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A provider call, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read(ResourceRef),
    Apply(ResourceRef),
    Refresh(ResourceRef),
}

#[derive(Debug, Default)]
struct HostState {
    resources: HashMap<ResourceRef, CurrentState>,
    calls: Vec<Call>,
    fail_apply: HashSet<ResourceRef>,
    fail_refresh: HashSet<ResourceRef>,
}

/// Shared fake host state
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Preset the observed state of a resource
    pub fn set_state(&self, resource: &ResourceRef, state: CurrentState) {
        self.lock().resources.insert(resource.clone(), state);
    }

    pub fn state(&self, resource: &ResourceRef) -> Option<CurrentState> {
        self.lock().resources.get(resource).cloned()
    }

    /// Make every `apply_state` of this resource fail
    pub fn fail_apply(&self, resource: &ResourceRef) {
        self.lock().fail_apply.insert(resource.clone());
    }

    /// Make every `refresh` of this resource fail
    pub fn fail_refresh(&self, resource: &ResourceRef) {
        self.lock().fail_refresh.insert(resource.clone());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Resources `apply_state` was called for, in call order
    pub fn applied(&self) -> Vec<ResourceRef> {
        self.filter_calls(|c| match c {
            Call::Apply(r) => Some(r),
            _ => None,
        })
    }

    /// Resources `refresh` was called for, in call order
    pub fn refreshed(&self) -> Vec<ResourceRef> {
        self.filter_calls(|c| match c {
            Call::Refresh(r) => Some(r),
            _ => None,
        })
    }

    fn filter_calls(&self, pick: impl Fn(&Call) -> Option<&ResourceRef>) -> Vec<ResourceRef> {
        self.lock().calls.iter().filter_map(pick).cloned().collect()
    }
}

/// Provider backed by a [`MemoryHost`]
///
/// Applying stores the declared ensure and attributes as the new observed
/// state, so a second run finds everything in sync.
pub struct MemoryProvider {
    schema: TypeSchema,
    host: MemoryHost,
}

impl MemoryProvider {
    pub fn new(schema: TypeSchema, host: MemoryHost) -> Self {
        Self { schema, host }
    }
}

impl Provider for MemoryProvider {
    fn kind(&self) -> &'static str {
        self.schema.kind()
    }

    fn schema(&self) -> TypeSchema {
        self.schema.clone()
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let mut host = self.host.lock();
        host.calls.push(Call::Read(resource.reference.clone()));
        Ok(host
            .resources
            .get(&resource.reference)
            .cloned()
            .unwrap_or_else(CurrentState::absent))
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let mut host = self.host.lock();
        host.calls.push(Call::Apply(resource.reference.clone()));
        if host.fail_apply.contains(&resource.reference) {
            anyhow::bail!("injected apply failure for {}", resource.reference);
        }

        if resource.ensure == Ensure::Absent {
            host.resources.remove(&resource.reference);
            return Ok(Outcome::Removed);
        }
        host.resources.insert(
            resource.reference.clone(),
            CurrentState {
                ensure: resource.ensure,
                attributes: resource.attributes.clone(),
            },
        );
        if current.ensure == Ensure::Absent {
            Ok(Outcome::Created)
        } else {
            Ok(Outcome::Modified)
        }
    }

    fn refresh(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<Outcome> {
        let mut host = self.host.lock();
        host.calls.push(Call::Refresh(resource.reference.clone()));
        if host.fail_refresh.contains(&resource.reference) {
            anyhow::bail!("injected refresh failure for {}", resource.reference);
        }
        Ok(Outcome::Refreshed)
    }
}
