//! Drift computation between declared and observed state

use crate::provider::{CurrentState, Provider};
use crate::registry::Resource;
use crate::schema::TypeSchema;
use crate::secret::REDACTED;
use crate::types::{Ensure, Value};
use serde::Serialize;

/// One property whose observed value does not satisfy its declared value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    /// Property name, `ensure` for the lifecycle state
    pub property: String,
    /// Declared value, rendered (sensitive values redacted)
    pub desired: String,
    /// Observed value, `None` when the provider could not observe it
    pub current: Option<String>,
}

impl Drift {
    fn new(property: &str, desired: &Value, current: Option<&Value>) -> Self {
        // What is on disk for a secret-backed property is itself a secret
        let current = match desired {
            Value::Sensitive(_) => current.map(|_| REDACTED.to_string()),
            _ => current.map(ToString::to_string),
        };
        Self {
            property: property.to_string(),
            desired: desired.to_string(),
            current,
        }
    }

    /// Whether either side was withheld as sensitive
    pub fn is_redacted(&self) -> bool {
        self.desired == REDACTED || self.current.as_deref() == Some(REDACTED)
    }

    pub fn is_ensure(&self) -> bool {
        self.property == "ensure"
    }
}

/// Compare a resource's declared state with what its provider observed
///
/// When the resource should be absent only `ensure` matters. Otherwise a
/// wrong `ensure` is reported alone, since the other properties of a resource
/// in the wrong lifecycle state are meaningless.
pub fn compute_drift(
    provider: &dyn Provider,
    schema: Option<&TypeSchema>,
    resource: &Resource,
    current: &CurrentState,
) -> Vec<Drift> {
    if resource.ensure != current.ensure {
        return vec![Drift {
            property: "ensure".into(),
            desired: resource.ensure.to_string(),
            current: Some(current.ensure.to_string()),
        }];
    }
    if resource.ensure == Ensure::Absent {
        return Vec::new();
    }

    let is_property = |name: &str| {
        schema
            .and_then(|s| s.attribute(name))
            .is_none_or(|spec| spec.property)
    };

    resource
        .attributes
        .iter()
        .filter(|(name, _)| is_property(name))
        .filter_map(|(name, desired)| match current.get(name) {
            Some(observed) if provider.in_sync(name, desired, observed) => None,
            observed => Some(Drift::new(name, desired, observed)),
        })
        .collect()
}

/// Drift counts by kind of change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriftSummary {
    /// Resources that would be created
    pub additions: usize,
    /// Resources that would be removed
    pub removals: usize,
    /// Resources whose properties would be modified
    pub modifications: usize,
}

impl DriftSummary {
    /// Classify one resource's drift and count it
    pub fn add(&mut self, drift: &[Drift]) {
        match drift.iter().find(|d| d.is_ensure()) {
            Some(d) if d.desired == Ensure::Absent.as_str() => self.removals += 1,
            Some(d) if d.current.as_deref() == Some(Ensure::Absent.as_str()) => {
                self.additions += 1;
            }
            _ if !drift.is_empty() => self.modifications += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}
