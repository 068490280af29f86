//! Error types for catalog construction
//!
//! Execution-time provider failures are not errors at this level: they are
//! recorded in the [`RunReport`](crate::RunReport) as failed results.

use crate::types::ResourceRef;
use thiserror::Error;

/// Errors raised while registering resources or building the graph
#[derive(Error, Debug)]
pub enum Error {
    /// An attribute failed validation or coercion
    #[error("invalid attribute `{field}` on {resource}: {reason}")]
    InvalidAttribute {
        resource: ResourceRef,
        field: String,
        reason: String,
    },

    /// The same `Type[title]` was registered twice
    #[error("duplicate declaration: {0} is already registered")]
    DuplicateResource(ResourceRef),

    /// A relationship names a resource that was never registered
    #[error("unknown resource {missing} in relationship {relationship}")]
    UnknownResource {
        missing: ResourceRef,
        relationship: String,
    },

    /// Ordering edges form a cycle; the path starts and ends on the same resource
    #[error("dependency cycle: {}", render_path(.path))]
    CyclicDependency { path: Vec<ResourceRef> },

    /// No schema is known for the resource type
    #[error("unknown resource type `{kind}` (declared as {resource})")]
    UnknownType { kind: String, resource: ResourceRef },

    /// A string could not be parsed as `Type[title]`
    #[error("invalid resource reference `{0}` (expected Type[title])")]
    InvalidReference(String),

    /// A fact selector matched no case and has no default
    #[error("attribute `{attribute}` on {resource}: no case for {fact} = {value:?} and no default")]
    MissingSelectorCase {
        resource: ResourceRef,
        attribute: String,
        fact: String,
        value: Option<String>,
    },

    /// A secret could not be resolved
    #[error("secret `{name}` for {resource}: {message}")]
    Secret {
        resource: ResourceRef,
        name: String,
        message: String,
    },
}

impl Error {
    /// Whether the error invalidates the whole declaration set
    ///
    /// Attribute errors only reject the offending resource; the manifest layer
    /// decides whether that aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidAttribute { .. })
    }
}

fn render_path(path: &[ResourceRef]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for catalog construction
pub type Result<T> = std::result::Result<T, Error>;
