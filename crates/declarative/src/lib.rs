//! # Declarative
//!
//! A resource convergence core for declarative host configuration.
//!
//! Declarations of desired state are registered, linked into a dependency
//! graph, and converged in one ordered pass: every resource is observed,
//! compared with its declaration and corrected only when it drifted. Changes
//! notify dependent resources, which are refreshed once at the end of the pass.
//!
//! ## Core Concepts
//!
//! - **Registry**: every resource of a run, validated against its type schema
//! - **Graph**: order and notify edges, acyclic, with a stable execution order
//! - **Provider**: observes and corrects one resource type
//! - **Scheduler**: drives providers in order and propagates notifications
//! - **RunReport**: per-resource results and the overall status
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     converge_simple, Declaration, Facts, Graph, NoSecrets, ProviderSet, Registry,
//!     ResourceRef, RunOptions,
//! };
//!
//! let providers = ProviderSet::new().with(MyFileProvider).with(MyServiceProvider);
//! let facts = Facts::new().with("os_family", "RedHat");
//!
//! let mut registry = Registry::for_providers(&providers);
//! registry.register_declaration(
//!     &Declaration::new("file", "/etc/httpd/conf/httpd.conf")
//!         .attr("mode", "0644")
//!         .notify(ResourceRef::new("service", "httpd")),
//!     &facts,
//!     &NoSecrets,
//! )?;
//! registry.register_declaration(&Declaration::new("service", "httpd"), &facts, &NoSecrets)?;
//!
//! let graph = Graph::build(&registry)?;
//! let report = converge_simple(&registry, &graph, &providers, &facts, &RunOptions::default());
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: observes and corrects resources of one type
//! - [`SecretProvider`]: supplies credentials by logical name
//! - [`ProgressCallback`]: receives progress updates
//!
//! This keeps the core free of package managers, init systems and terminal
//! crates; those live with the callers.

pub mod context;
pub mod declaration;
pub mod diff;
pub mod error;
pub mod facts;
pub mod graph;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod schema;
pub mod secret;
pub mod types;

// Re-export main types at crate root
pub use context::{NoProgress, ProgressCallback, ProviderContext};
pub use declaration::{Chain, Condition, Declaration, Relation, ValueExpr, include};
pub use diff::{Drift, DriftSummary, compute_drift};
pub use error::{Error, Result};
pub use facts::{Facts, SelinuxMode};
pub use graph::{Edge, EdgeKind, Graph, GraphOptions};
pub use provider::{CurrentState, Outcome, Provider, ProviderResult, ProviderSet};
pub use registry::{DeclaredEdge, Registry, Resource};
pub use report::{ExecutionResult, LogEntry, Phase, RunReport, RunStatus, SkipReason, Summary};
pub use scheduler::{FailurePolicy, RunOptions, converge, converge_simple};
pub use schema::{AttrKind, AttributeSpec, TypeSchema};
pub use secret::{NoSecrets, SecretProvider, Sensitive, StaticSecrets};
pub use types::{Attributes, Ensure, ResourceId, ResourceRef, Value};
