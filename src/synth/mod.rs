//! Manifest synthesis engine
//!
//! Pure transformation from a validated [`AppDefinition`] plus an
//! [`Environment`] into an ordered list of typed resources. Each
//! concern is an independent sub-generator; any unresolvable
//! cross-reference aborts the whole run - a partial manifest set is
//! never emitted.

pub mod backup;
pub mod environment;
pub mod ingress;
pub mod ip_address;
pub mod naming;
pub mod network_policy;
pub mod observability;
pub mod service;
pub mod startup;
pub mod tunnel;
pub mod volume;
pub mod vpn;
pub mod workload;

use std::collections::BTreeMap;

use crate::env::Environment;
use crate::error::ManifoldResult;
use crate::manifest::{LabelSelector, Namespace, ObjectMeta, Resource};
use crate::schema::{AppDefinition, Component};
use crate::staging::StagedTree;
use naming::{app_labels, component_labels, selector_labels, NAMESPACE_LABEL};

/// Everything a per-component sub-generator needs
pub struct ComponentContext<'a> {
    pub app: &'a AppDefinition,
    pub env: &'a Environment,
    pub component: &'a Component,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub staged: &'a StagedTree,
}

impl ComponentContext<'_> {
    pub fn namespace(&self) -> &str {
        &self.app.metadata.namespace
    }

    /// `{app}-{component}` - the workload's own name
    pub fn workload_name(&self) -> String {
        format!("{}-{}", self.app.metadata.name, self.component.name)
    }

    /// `{app}-{component}-{discriminator}`
    pub fn prefixed(&self, discriminator: &str) -> String {
        format!("{}-{discriminator}", self.workload_name())
    }

    /// The selector-label triple, identical on the pod template, every
    /// service selector and every network-policy pod selector
    pub fn selector(&self) -> LabelSelector {
        LabelSelector {
            match_labels: selector_labels(&self.labels),
        }
    }

    /// Object metadata in the app namespace with component labels
    pub fn meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: name.into(),
            namespace: Some(self.namespace().to_string()),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// Synthesize the full resource list for one validated app definition.
///
/// `env` is the unit's resolved environment (available to generators
/// that template configuration text); `staged` is the materialized file
/// tree for `file`/`dir`/`glob` sources. The output order is
/// deterministic: the namespace first, then each component's resources
/// grouped by concern.
pub fn synthesize(
    app: &AppDefinition,
    env: &Environment,
    staged: &StagedTree,
) -> ManifoldResult<Vec<Resource>> {
    let app_labels = app_labels(&app.metadata);

    let mut resources = vec![namespace_resource(app, &app_labels)];

    for component in app.components.values() {
        let ctx = ComponentContext {
            app,
            env,
            component,
            labels: component_labels(&app_labels, component),
            annotations: merged_annotations(app, component),
            staged,
        };

        let volumes = volume::generate(&ctx)?;
        let environments = environment::generate(&ctx)?;
        let workload =
            workload::generate(&ctx, &volumes.pod_volumes, &volumes.mounts, &environments.env_from)?;

        resources.extend(volumes.resources);
        resources.extend(environments.resources);
        resources.extend(workload.extra_resources);
        resources.push(Resource::Deployment(workload.deployment.clone()));

        resources.extend(service::generate(&ctx));
        resources.extend(ingress::generate(&ctx)?);
        resources.extend(ip_address::generate(&ctx));
        resources.extend(network_policy::generate(&ctx)?);
        resources.extend(tunnel::generate(&ctx));
        resources.extend(backup::generate(&ctx, &workload.deployment, &volumes.pod_volumes)?);
        resources.extend(observability::generate(&ctx));
    }

    Ok(resources)
}

fn namespace_resource(app: &AppDefinition, app_labels: &BTreeMap<String, String>) -> Resource {
    let mut labels = app_labels.clone();
    labels.insert(
        NAMESPACE_LABEL.to_string(),
        app.metadata.namespace.clone(),
    );
    Resource::Namespace(Namespace::new(ObjectMeta {
        name: app.metadata.namespace.clone(),
        namespace: None,
        labels,
        annotations: app.metadata.annotations.clone(),
    }))
}

fn merged_annotations(app: &AppDefinition, component: &Component) -> BTreeMap<String, String> {
    let mut annotations = app.metadata.annotations.clone();
    annotations.extend(component.annotations.clone());
    annotations
}
