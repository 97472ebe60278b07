//! Dependency sub-generator
//!
//! Each explicit networking dependency becomes a NetworkPolicy in the
//! *target's* namespace, admitting this component's pods (selected by
//! pod and namespace labels) on the declared port. Targets are named
//! `component`, `app/component` or `namespace/app/component`; omitted
//! parts default to this app and namespace.

use crate::error::{ManifoldError, ManifoldResult};
use crate::manifest::{
    IntOrString, LabelSelector, NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec, ObjectMeta, Resource,
};

use super::naming::{APP_LABEL, COMPONENT_LABEL, NAMESPACE_LABEL};
use super::ComponentContext;

pub fn generate(ctx: &ComponentContext) -> ManifoldResult<Vec<Resource>> {
    let mut resources = Vec::new();

    for dependency in &ctx.component.networking.dependencies {
        let mut namespace = ctx.namespace().to_string();
        let mut app = ctx.app.metadata.name.clone();
        let component;

        let parts: Vec<&str> = dependency.name.split('/').collect();
        match parts.as_slice() {
            [c] => component = (*c).to_string(),
            [a, c] => {
                app = (*a).to_string();
                component = (*c).to_string();
            }
            [n, a, c] => {
                namespace = (*n).to_string();
                app = (*a).to_string();
                component = (*c).to_string();
            }
            _ => {
                return Err(ManifoldError::synthesis(format!(
                    "dependency '{}' on component '{}' has too many path segments",
                    dependency.name, ctx.component.name
                )))
            }
        }

        // this component, selectable from the target's namespace
        let source_peer = NetworkPolicyPeer {
            pod_selector: Some(ctx.selector()),
            namespace_selector: Some(LabelSelector {
                match_labels: [(NAMESPACE_LABEL.to_string(), ctx.namespace().to_string())]
                    .into_iter()
                    .collect(),
            }),
            ..NetworkPolicyPeer::default()
        };

        resources.push(Resource::NetworkPolicy(NetworkPolicy::new(
            ObjectMeta {
                name: ctx.prefixed(&dependency.id),
                namespace: Some(namespace),
                labels: ctx.labels.clone(),
                annotations: ctx.annotations.clone(),
            },
            NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: [
                        (APP_LABEL.to_string(), app),
                        (COMPONENT_LABEL.to_string(), component),
                    ]
                    .into_iter()
                    .collect(),
                },
                policy_types: vec!["Ingress".to_string()],
                ingress: vec![NetworkPolicyIngressRule {
                    from: vec![source_peer],
                    ports: vec![NetworkPolicyPort {
                        protocol: dependency.protocol.clone(),
                        port: port_value(&dependency.port),
                    }],
                }],
            },
        )));
    }

    Ok(resources)
}

/// Dependency ports may be numeric (a port number on the target) or
/// textual (one of the target's named ports).
fn port_value(port: &str) -> IntOrString {
    match port.parse::<u16>() {
        Ok(number) => IntOrString::Int(number),
        Err(_) => IntOrString::Name(port.to_string()),
    }
}
