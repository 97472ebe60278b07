//! Tunnel-route sub-generator
//!
//! Routes external traffic through the cluster's reverse-tunnel
//! component: one TunnelRoute custom resource per non-direct route
//! (virtual host, optional path rewriting, body-size and timeout
//! tuning) pointing at the component's service FQDN, plus a
//! NetworkPolicy admitting the tunnel namespace either way.

use serde_yaml_ng::{Mapping, Value};

use crate::manifest::{
    CustomResource, IntOrString, LabelSelector, NetworkPolicy, NetworkPolicyIngressRule,
    NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec, ObjectMeta, Resource,
};

use super::naming::coerce_dns_name;
use super::service::{service_name, SERVICE_PORT};
use super::ComponentContext;

/// Namespace the reverse-tunnel component runs in
const TUNNEL_NAMESPACE: &str = "tunnel";

pub fn generate(ctx: &ComponentContext) -> Vec<Resource> {
    let mut resources = Vec::new();

    for route in &ctx.component.networking.tunnel_routes {
        if !route.direct {
            // validation guarantees a host on non-direct routes
            let host = route.host.clone().unwrap_or_default();
            let service_fqdn = format!(
                "{}.{}.svc.cluster.local",
                service_name(&ctx.app.metadata.name, &ctx.component.name, &route.port),
                ctx.namespace()
            );

            let mut service = Mapping::new();
            service.insert(text("host"), text(&service_fqdn));
            service.insert(text("port"), Value::Number(SERVICE_PORT.into()));

            let mut spec = Mapping::new();
            spec.insert(text("virtualHost"), text(&host));
            spec.insert(text("service"), Value::Mapping(service));
            if let Some(path) = &route.virtual_path {
                spec.insert(text("virtualPath"), text(path));
            }
            if let Some(dest) = &route.virtual_dest {
                spec.insert(text("virtualDest"), text(dest));
            }
            if let Some(size) = &route.max_body_size {
                spec.insert(text("maxBodySize"), text(size));
            }
            if let Some(timeout) = &route.connection_timeout {
                spec.insert(text("connectionTimeout"), text(timeout));
            }

            resources.push(Resource::Custom(CustomResource {
                api_version: "tunnel.manifold.dev/v1".to_string(),
                kind: "TunnelRoute".to_string(),
                metadata: ObjectMeta {
                    name: coerce_dns_name(&host),
                    namespace: Some(ctx.namespace().to_string()),
                    labels: Default::default(),
                    annotations: Default::default(),
                },
                spec: Value::Mapping(spec),
            }));
        }

        let host_part = route
            .host
            .as_deref()
            .map(|h| format!("{}-", coerce_dns_name(h)))
            .unwrap_or_default();
        resources.push(Resource::NetworkPolicy(NetworkPolicy::new(
            ctx.meta(ctx.prefixed(&format!("tunnel-{host_part}{}", route.port))),
            NetworkPolicySpec {
                pod_selector: ctx.selector(),
                policy_types: vec!["Ingress".to_string()],
                ingress: vec![NetworkPolicyIngressRule {
                    from: vec![NetworkPolicyPeer {
                        namespace_selector: Some(LabelSelector {
                            match_labels: [(
                                "kubernetes.io/metadata.name".to_string(),
                                TUNNEL_NAMESPACE.to_string(),
                            )]
                            .into_iter()
                            .collect(),
                        }),
                        ..NetworkPolicyPeer::default()
                    }],
                    ports: vec![NetworkPolicyPort {
                        protocol: "TCP".to_string(),
                        port: IntOrString::Name(route.port.clone()),
                    }],
                }],
            },
        )));
    }

    resources
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}
