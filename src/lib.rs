//! Manifold - deployment compiler
//!
//! Manifold compiles a declarative, layered application description
//! into the complete set of cluster resources needed to run it:
//! workloads, services, ingress rules, network policies, config and
//! secret objects, scheduled jobs and sidecars.
//!
//! The pipeline is composition -> validation -> synthesis:
//! - [`compose`] resolves the layer chain into one environment and one
//!   merged document (with lazily-evaluated plugin lookups),
//! - [`schema`] validates the document into a typed
//!   [`AppDefinition`](schema::AppDefinition),
//! - [`synth`] deterministically produces the typed resource list,
//!   serialized by [`manifest`].

pub mod compose;
pub mod env;
pub mod error;
pub mod hydrate;
pub mod manifest;
pub mod merge;
pub mod plugins;
pub mod schema;
pub mod staging;
pub mod synth;

// Re-exports for convenience
pub use compose::{compose_unit, merge_sibling_documents, ComposedUnit};
pub use env::Environment;
pub use error::{ManifoldError, ManifoldResult};
pub use hydrate::hydrate;
pub use manifest::{to_yaml_stream, Resource};
pub use merge::{deep_merge, MergePolicy};
pub use plugins::{PluginCall, PluginResolver, StandardResolver, StaticResolver};
pub use schema::{validate, AppDefinition};
pub use staging::StagedTree;
pub use synth::synthesize;
