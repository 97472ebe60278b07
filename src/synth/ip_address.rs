//! Static-address sub-generator
//!
//! Each ip binding becomes one LoadBalancer Service pinned to the
//! requested address plus one allow-all-ingress NetworkPolicy for its
//! ports. Names embed a short hash of the address, so rebinding ports
//! to a different address never collides.

use crate::manifest::{
    IntOrString, IpBlock, NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec, ObjectMeta, Resource, Service, ServicePort, ServiceSpec,
};

use super::naming::hash_str;
use super::service::SERVICE_PORT;
use super::ComponentContext;

/// Annotation pinning a LoadBalancer service to an address
const ADDRESS_ANNOTATION: &str = "metallb.io/loadBalancerIPs";

/// Length of the address hash embedded in resource names
const IP_HASH_LENGTH: usize = 6;

pub fn generate(ctx: &ComponentContext) -> Vec<Resource> {
    let mut resources = Vec::new();
    let networking = &ctx.component.networking;

    for binding in &networking.ip_bindings {
        let discriminator = format!(
            "{}-{}",
            hash_str(&binding.ip, IP_HASH_LENGTH),
            binding.ports.join("-")
        );

        let mut service_ports = Vec::new();
        let mut policy_ports = Vec::new();
        for port_name in &binding.ports {
            // fall back to the fixed cluster port for unnamed ports
            let (number, protocol) = networking
                .ports
                .get(port_name)
                .map(|p| (p.port, p.protocol.clone()))
                .unwrap_or((SERVICE_PORT, "TCP".to_string()));
            service_ports.push(ServicePort {
                name: port_name.clone(),
                protocol: protocol.clone(),
                port: number,
                target_port: IntOrString::Int(number),
            });
            policy_ports.push(NetworkPolicyPort {
                protocol,
                port: IntOrString::Name(port_name.clone()),
            });
        }

        let mut annotations = ctx.annotations.clone();
        annotations.insert(ADDRESS_ANNOTATION.to_string(), binding.ip.clone());

        resources.push(Resource::Service(Service::new(
            ObjectMeta {
                name: ctx.prefixed(&format!("ip-{discriminator}")),
                namespace: Some(ctx.namespace().to_string()),
                labels: ctx.labels.clone(),
                annotations,
            },
            ServiceSpec {
                service_type: Some("LoadBalancer".to_string()),
                selector: ctx.selector().match_labels,
                ports: service_ports,
            },
        )));

        resources.push(Resource::NetworkPolicy(NetworkPolicy::new(
            ctx.meta(ctx.prefixed(&format!("ingress-ip-{discriminator}"))),
            NetworkPolicySpec {
                pod_selector: ctx.selector(),
                policy_types: vec!["Ingress".to_string()],
                ingress: vec![NetworkPolicyIngressRule {
                    from: vec![NetworkPolicyPeer {
                        ip_block: Some(IpBlock {
                            cidr: "0.0.0.0/0".to_string(),
                        }),
                        ..NetworkPolicyPeer::default()
                    }],
                    ports: policy_ports,
                }],
            },
        )));
    }

    resources
}
