//! Workload assembly scenarios: startup tasks, security, GPU, VPN.

use crate::common::*;

fn doc(component_body: &str) -> String {
    format!(
        concat!(
            "metadata:\n",
            "  name: app\n",
            "  namespace: proj-app\n",
            "  project: proj\n",
            "components:\n",
            "  worker:\n",
            "    image: worker:3\n",
            "{component_body}",
        ),
        component_body = component_body,
    )
}

#[test]
fn startup_tasks_become_ordered_init_containers() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    startup:\n",
            "      tasks:\n",
            "        - chown:\n",
            "            path: /data\n",
            "            owner: '1000:1000'\n",
            "            recursive: true\n",
            "        - script:\n",
            "            script: echo ready\n",
        )),
        &staged,
    );

    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    let chown_at = deployment.find("startup-chown-data-").unwrap();
    let script_at = deployment.find("startup-script-").unwrap();
    assert!(chown_at < script_at, "task order must be preserved");
    assert!(deployment.contains("- chown\n"));
    assert!(deployment.contains("- -R\n"));
    assert!(deployment.contains("- '1000:1000'"));
    assert!(deployment.contains("echo ready"));
}

#[test]
fn identical_tasks_get_identical_names_and_differing_tasks_differ() {
    let (_dir, staged) = empty_staging();
    let text = doc(concat!(
        "    startup:\n",
        "      tasks:\n",
        "        - chmod:\n",
        "            path: /a\n",
        "            mode: '0755'\n",
        "        - chmod:\n",
        "            path: /b\n",
        "            mode: '0755'\n",
    ));
    let resources = synthesize_doc(&text, &staged);
    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    let names: Vec<&str> = deployment
        .lines()
        .filter(|l| l.trim_start().starts_with("name: startup-chmod-"))
        .collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
}

#[test]
fn security_spec_lands_on_container_and_pod() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    security:\n",
            "      cap:\n",
            "        add: [NET_ADMIN]\n",
            "      sysctls:\n",
            "        - net.ipv4.ip_forward=1\n",
            "      uid: 1000\n",
            "      gid: 1000\n",
            "      groups:\n",
            "        add: [44, 107]\n",
        )),
        &staged,
    );
    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    assert!(deployment.contains("- NET_ADMIN"));
    assert!(deployment.contains("runAsUser: 1000"));
    assert!(deployment.contains("runAsGroup: 1000"));
    assert!(deployment.contains("name: net.ipv4.ip_forward"));
    assert!(deployment.contains("value: '1'"));
    assert!(deployment.contains("supplementalGroups"));
}

#[test]
fn gpu_sets_runtime_class_and_optional_limit() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    resources:\n",
            "      requests:\n",
            "        cpu: 100m\n",
            "      gpu:\n",
            "        enabled: true\n",
            "        use_limit: true\n",
        )),
        &staged,
    );
    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    assert!(deployment.contains("runtimeClassName: nvidia"));
    assert!(deployment.contains("nvidia.com/gpu: '1'"));
    assert!(deployment.contains("cpu: 100m"));
}

#[test]
fn vpn_sidecar_shares_the_tunnel_device_and_env_pair() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    vpn:\n",
            "      provider: airvpn\n",
            "      wireguard:\n",
            "        private_key: wg-key\n",
            "      server_countries: [Netherlands, Sweden]\n",
            "      port_forward_only: true\n",
        )),
        &staged,
    );

    let secret = yaml_of(find(&resources, "Secret", "app-worker-vpn-environment").unwrap());
    assert!(secret.contains("WIREGUARD_PRIVATE_KEY: wg-key"));
    let config = yaml_of(find(&resources, "ConfigMap", "app-worker-vpn-environment").unwrap());
    assert!(config.contains("VPN_SERVICE_PROVIDER: airvpn"));
    assert!(config.contains("SERVER_COUNTRIES: Netherlands,Sweden"));
    assert!(config.contains("PORT_FORWARD_ONLY: 'on'"));
    assert!(config.contains("DOT: 'off'"));

    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    assert!(deployment.contains("name: vpn"));
    assert!(deployment.contains("restartPolicy: Always"));
    assert!(deployment.contains("path: /dev/net/tun"));
    assert!(deployment.contains("type: CharDevice"));
    assert!(deployment.contains("NET_ADMIN"));
}

#[test]
fn unknown_component_fields_do_not_leak_into_manifests() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc("    x-internal-notes:\n      reviewed: true\n"),
        &staged,
    );
    let deployment = yaml_of(find(&resources, "Deployment", "app-worker").unwrap());
    assert!(!deployment.contains("x-internal-notes"));
}
