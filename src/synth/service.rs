//! Service sub-generator
//!
//! One Service per named port. Every service listens on the fixed
//! cluster port and targets the container port by name, so consumers
//! address `{app}-{component}-{port}` uniformly.

use crate::manifest::{IntOrString, Resource, Service, ServicePort, ServiceSpec};

use super::ComponentContext;

/// The cluster port every generated service listens on
pub const SERVICE_PORT: u16 = 8080;

/// `{app}-{component}-{port-name}`
pub fn service_name(app: &str, component: &str, port_name: &str) -> String {
    format!("{app}-{component}-{port_name}")
}

pub fn generate(ctx: &ComponentContext) -> Vec<Resource> {
    let mut resources = Vec::new();

    for (port_name, port) in &ctx.component.networking.ports {
        let name = service_name(&ctx.app.metadata.name, &ctx.component.name, port_name);
        resources.push(Resource::Service(Service::new(
            ctx.meta(&name),
            ServiceSpec {
                service_type: None,
                selector: ctx.selector().match_labels,
                ports: vec![ServicePort {
                    name: port_name.clone(),
                    protocol: port.protocol.clone(),
                    port: SERVICE_PORT,
                    target_port: IntOrString::Name(port_name.clone()),
                }],
            },
        )));
    }

    resources
}
