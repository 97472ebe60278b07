//! Workload sub-generator
//!
//! Assembles the per-component Deployment: the main container with its
//! ports, mounts and environment, the ordered startup init containers,
//! the VPN sidecar when configured, and the pod-level security and
//! runtime settings.

use std::collections::BTreeMap;

use crate::error::{ManifoldError, ManifoldResult};
use crate::manifest::{
    Capabilities, Container, ContainerPort, Deployment, DeploymentSpec, EnvFromSource, PodSpec,
    PodSecurityContext, PodTemplateSpec, PodVolume, Resource, ResourceRequirements, ObjectMeta,
    SecurityContext, Sysctl, VolumeMount,
};
use crate::schema::{ResourceSpec, Security};

use super::{startup, vpn, ComponentContext};

pub struct WorkloadOutputs {
    pub deployment: Deployment,
    /// Objects the pod depends on that no other generator owns
    /// (currently the VPN sidecar's environment pair)
    pub extra_resources: Vec<Resource>,
}

pub fn generate(
    ctx: &ComponentContext,
    pod_volumes: &[PodVolume],
    mounts: &[VolumeMount],
    env_from: &[EnvFromSource],
) -> ManifoldResult<WorkloadOutputs> {
    let component = ctx.component;

    let mut container = Container {
        name: component.name.clone(),
        image: component.image.clone(),
        command: component.command.clone(),
        args: component.args.clone(),
        env_from: env_from.to_vec(),
        volume_mounts: mounts.to_vec(),
        ..Container::default()
    };

    for (port_name, port) in &component.networking.ports {
        container.ports.push(ContainerPort {
            name: port_name.clone(),
            container_port: port.port,
            protocol: port.protocol.clone(),
        });
    }

    let mut runtime_class_name = None;
    if let Some(resources) = &component.resources {
        let mut requirements = ResourceRequirements {
            requests: quantity_map(resources.requests.as_ref()),
            limits: quantity_map(resources.limits.as_ref()),
        };
        if resources.gpu.enabled {
            if resources.gpu.use_limit {
                requirements
                    .limits
                    .insert(resources.gpu.resource_name.clone(), "1".to_string());
            }
            runtime_class_name = Some(resources.gpu.runtime_class_name.clone());
        }
        if !requirements.is_empty() {
            container.resources = Some(requirements);
        }
    }

    if let Some(security) = &component.security {
        if !security.capabilities.is_empty() {
            container.security_context = Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: security.capabilities.clone(),
                }),
            });
        }
    }

    let mut pod = PodSpec {
        containers: vec![container],
        init_containers: startup::init_containers(ctx, mounts)?,
        volumes: pod_volumes.to_vec(),
        runtime_class_name,
        ..PodSpec::default()
    };

    if let Some(security) = &component.security {
        let context = pod_security_context(ctx, security)?;
        if !context.is_empty() {
            pod.security_context = Some(context);
        }
    }

    let mut extra_resources = Vec::new();
    if let Some(sidecar) = &component.vpn {
        extra_resources.extend(vpn::apply(ctx, sidecar, &mut pod)?);
    }

    let deployment = Deployment::new(
        ctx.meta(ctx.workload_name()),
        DeploymentSpec {
            replicas: 1,
            selector: ctx.selector(),
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    name: String::new(),
                    namespace: None,
                    labels: ctx.labels.clone(),
                    annotations: ctx.annotations.clone(),
                },
                spec: pod,
            },
        },
    );

    Ok(WorkloadOutputs {
        deployment,
        extra_resources,
    })
}

fn quantity_map(spec: Option<&ResourceSpec>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(spec) = spec {
        if let Some(cpu) = &spec.cpu {
            map.insert("cpu".to_string(), cpu.clone());
        }
        if let Some(memory) = &spec.memory {
            map.insert("memory".to_string(), memory.clone());
        }
    }
    map
}

fn pod_security_context(
    ctx: &ComponentContext,
    security: &Security,
) -> ManifoldResult<PodSecurityContext> {
    let mut sysctls = Vec::new();
    for entry in &security.sysctls {
        let (name, value) = entry.split_once('=').ok_or_else(|| {
            ManifoldError::synthesis(format!(
                "sysctl '{entry}' on component '{}' is not of the form name=value",
                ctx.component.name
            ))
        })?;
        sysctls.push(Sysctl {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        });
    }
    Ok(PodSecurityContext {
        run_as_user: security.uid,
        run_as_group: security.gid,
        supplemental_groups: security.supplemental_groups.clone(),
        sysctls,
    })
}
