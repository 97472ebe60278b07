//! VPN sidecar sub-generator
//!
//! Injects the VPN tunnel as a native sidecar (an init container with
//! `restartPolicy: Always`) into the existing pod template. The sidecar
//! shares a `/dev/net/tun` character-device volume with the pod -
//! reused when the pod already mounts one - and reads its settings from
//! a paired Secret (the private key) and ConfigMap (everything else).

use std::collections::BTreeMap;

use crate::error::ManifoldResult;
use crate::manifest::{
    Capabilities, ConfigMap, Container, EnvFromSource, ExecAction, HostPathVolumeSource,
    Lifecycle, LifecycleHandler, PodSpec, PodVolume, Probe, Resource, Secret, SecurityContext,
    VolumeMount,
};
use crate::schema::{VpnSidecar, VpnTunnel};

use super::ComponentContext;

/// Well-known tunnel device shared between the sidecar and the pod
const TUN_DEVICE_PATH: &str = "/dev/net/tun";
const TUN_DEVICE_TYPE: &str = "CharDevice";
const DEFAULT_TUN_VOLUME: &str = "dev-net-tun";

pub fn apply(
    ctx: &ComponentContext,
    sidecar: &VpnSidecar,
    pod: &mut PodSpec,
) -> ManifoldResult<Vec<Resource>> {
    let tun_volume = existing_tun_volume(pod).unwrap_or_else(|| {
        pod.volumes.push(PodVolume {
            name: DEFAULT_TUN_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: TUN_DEVICE_PATH.to_string(),
                path_type: TUN_DEVICE_TYPE.to_string(),
            }),
            ..PodVolume::default()
        });
        DEFAULT_TUN_VOLUME.to_string()
    });

    let mut secret_env = BTreeMap::new();
    let mut config_env = BTreeMap::new();
    match &sidecar.tunnel {
        VpnTunnel::Wireguard { private_key } => {
            secret_env.insert("WIREGUARD_PRIVATE_KEY".to_string(), private_key.clone());
            config_env.insert("VPN_TYPE".to_string(), "wireguard".to_string());
        }
    }
    config_env.insert(
        "VPN_SERVICE_PROVIDER".to_string(),
        sidecar.provider.clone(),
    );
    config_env.insert(
        "SERVER_COUNTRIES".to_string(),
        sidecar.server_countries.join(","),
    );
    config_env.insert(
        "PORT_FORWARD_ONLY".to_string(),
        on_off(sidecar.port_forward_only),
    );
    config_env.insert("DOT".to_string(), on_off(sidecar.dns_over_tls));

    let env_name = ctx.prefixed("vpn-environment");
    let resources = vec![
        Resource::Secret(Secret::opaque(ctx.meta(&env_name), secret_env)),
        Resource::ConfigMap(ConfigMap::new(ctx.meta(&env_name), config_env)),
    ];

    pod.init_containers.push(Container {
        name: "vpn".to_string(),
        image: ctx.app.defaults.images.vpn.clone(),
        restart_policy: Some("Always".to_string()),
        liveness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "/gluetun-entrypoint healthcheck".to_string(),
                ],
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(5),
            failure_threshold: Some(15),
        }),
        // drop the provider's policy-routing rules so pod traffic keeps
        // flowing through the tunnel after restarts
        lifecycle: Some(Lifecycle {
            post_start: Some(LifecycleHandler {
                exec: ExecAction {
                    command: vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        "(ip rule del table 51820; ip -6 rule del table 51820) || true"
                            .to_string(),
                    ],
                },
            }),
        }),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: vec!["NET_ADMIN".to_string()],
            }),
        }),
        volume_mounts: vec![VolumeMount {
            name: tun_volume,
            mount_path: TUN_DEVICE_PATH.to_string(),
            sub_path: None,
            read_only: false,
        }],
        env_from: vec![
            EnvFromSource::secret(&env_name),
            EnvFromSource::config_map(&env_name),
        ],
        ..Container::default()
    });

    Ok(resources)
}

fn existing_tun_volume(pod: &PodSpec) -> Option<String> {
    pod.volumes
        .iter()
        .find(|v| {
            v.host_path
                .as_ref()
                .is_some_and(|h| h.path == TUN_DEVICE_PATH && h.path_type == TUN_DEVICE_TYPE)
        })
        .map(|v| v.name.clone())
}

fn on_off(value: bool) -> String {
    if value { "on" } else { "off" }.to_string()
}
