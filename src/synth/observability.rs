//! Observability sub-generator
//!
//! Log shipping: one partial-config custom resource per component,
//! holding the collector pipeline block that discovers the component's
//! pods and ships their logs. HTTP probes: one blackbox
//! partial-component per probe targeting the component's service, plus
//! a NetworkPolicy admitting the monitoring namespace on the probed
//! port.

use serde_yaml_ng::{Mapping, Value};

use crate::manifest::{
    CustomResource, IntOrString, LabelSelector, NetworkPolicy, NetworkPolicyIngressRule,
    NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec, ObjectMeta, Resource,
};
use crate::schema::{LogShipping, ProbeSpec, ProbeTarget};

use super::naming::{coerce_dns_name, APP_LABEL, COMPONENT_LABEL, PROJECT_LABEL};
use super::service::{service_name, SERVICE_PORT};
use super::ComponentContext;

/// Label routing a partial to the collector deployment that loads it
const COLLECTOR_LABEL: &str = "deploy.manifold.dev/collector";
/// Namespace the monitoring stack (and its probers) runs in
const MONITORING_NAMESPACE: &str = "monitoring";

pub fn generate(ctx: &ComponentContext) -> Vec<Resource> {
    let Some(observability) = &ctx.component.observability else {
        return Vec::new();
    };

    let mut resources = Vec::new();

    if let Some(logs) = &observability.logs {
        resources.push(log_shipping_partial(ctx, logs));
    }

    for (probe_name, probe) in &observability.probes {
        resources.extend(probe_resources(ctx, probe_name, probe));
    }

    resources
}

fn log_shipping_partial(ctx: &ComponentContext, logs: &LogShipping) -> Resource {
    let job_label = coerce_dns_name(&format!(
        "{}-{}-{}",
        ctx.namespace(),
        ctx.app.metadata.name,
        ctx.component.name
    ))
    .replace('-', "_");
    let crd_name = coerce_dns_name(&format!(
        "{}-{}",
        ctx.app.metadata.name,
        ctx.component.name
    ));

    let mut config = format!(
        "discovery.kubernetes \"{job_label}\" {{\n  role = \"pod\"\n  namespaces {{\n    names = [\"{}\"]\n  }}\n  selectors {{\n    role = \"pod\"\n    label = \"{APP_LABEL}={},{COMPONENT_LABEL}={}\"\n  }}\n}}\n\nloki.source.kubernetes \"{job_label}\" {{\n  targets    = discovery.kubernetes.{job_label}.targets\n  forward_to = [loki.write.default.receiver]\n}}\n",
        ctx.namespace(),
        ctx.app.metadata.name,
        ctx.component.name,
    );
    if let Some(process) = &logs.process {
        config.push_str(&format!(
            "\nloki.process \"{job_label}\" {{\n{process}\n}}\n"
        ));
    }

    let mut spec = Mapping::new();
    spec.insert(text("config"), text(&config));

    Resource::Custom(CustomResource {
        api_version: "collector.manifold.dev/v1".to_string(),
        kind: "CollectorPartialConfig".to_string(),
        metadata: ObjectMeta {
            name: crd_name,
            namespace: Some(ctx.namespace().to_string()),
            labels: [(COLLECTOR_LABEL.to_string(), "daemonset".to_string())]
                .into_iter()
                .collect(),
            annotations: Default::default(),
        },
        spec: Value::Mapping(spec),
    })
}

fn probe_resources(ctx: &ComponentContext, probe_name: &str, probe: &ProbeSpec) -> Vec<Resource> {
    let ProbeTarget::HttpGet { port, path } = &probe.target;

    let crd_name = coerce_dns_name(&format!(
        "{}-{}-probe-{probe_name}",
        ctx.app.metadata.name,
        ctx.component.name
    ));
    let address = format!(
        "{}.{}.svc.cluster.local:{SERVICE_PORT}{path}",
        service_name(&ctx.app.metadata.name, &ctx.component.name, port),
        ctx.namespace()
    );

    let target_name = crd_name.replace('-', "_");
    let config = format!(
        "target {{\n  name    = \"{target_name}\"\n  address = \"{address}\"\n  module  = \"{}\"\n  labels  = {{\n    \"{APP_LABEL}\" = \"{}\",\n    \"{COMPONENT_LABEL}\" = \"{}\",\n    \"{PROJECT_LABEL}\" = \"{}\",\n    \"deploy.manifold.dev/probe\" = \"{probe_name}\",\n  }}\n}}",
        probe.module,
        ctx.app.metadata.name,
        ctx.component.name,
        ctx.app.metadata.project,
    );

    let mut spec = Mapping::new();
    spec.insert(text("label"), text("default"));
    spec.insert(text("component"), text("prometheus.exporter.blackbox"));
    spec.insert(text("config"), text(&config));

    let policy = NetworkPolicy::new(
        ObjectMeta {
            name: ctx.prefixed(&format!("probe-{}", coerce_dns_name(probe_name))),
            namespace: Some(ctx.namespace().to_string()),
            ..ObjectMeta::default()
        },
        NetworkPolicySpec {
            pod_selector: ctx.selector(),
            policy_types: vec!["Ingress".to_string()],
            ingress: vec![NetworkPolicyIngressRule {
                from: vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector {
                        match_labels: [(
                            "kubernetes.io/metadata.name".to_string(),
                            MONITORING_NAMESPACE.to_string(),
                        )]
                        .into_iter()
                        .collect(),
                    }),
                    ..NetworkPolicyPeer::default()
                }],
                ports: vec![NetworkPolicyPort {
                    protocol: "TCP".to_string(),
                    port: IntOrString::Name(port.clone()),
                }],
            }],
        },
    );

    vec![
        Resource::NetworkPolicy(policy),
        Resource::Custom(CustomResource {
            api_version: "collector.manifold.dev/v1".to_string(),
            kind: "CollectorPartialComponent".to_string(),
            metadata: ObjectMeta {
                name: crd_name,
                namespace: Some(ctx.namespace().to_string()),
                labels: [(COLLECTOR_LABEL.to_string(), "deployment".to_string())]
                    .into_iter()
                    .collect(),
                annotations: Default::default(),
            },
            spec: Value::Mapping(spec),
        }),
    ]
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}
