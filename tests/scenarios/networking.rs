//! Service, static-address, dependency, tunnel and observability
//! scenarios.

use crate::common::*;

fn doc(networking_and_more: &str) -> String {
    format!(
        concat!(
            "metadata:\n",
            "  name: app\n",
            "  namespace: proj-app\n",
            "  project: proj\n",
            "components:\n",
            "  web:\n",
            "    image: nginx\n",
            "{body}",
        ),
        body = networking_and_more,
    )
}

#[test]
fn each_named_port_gets_one_service_on_the_cluster_port() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      ports:\n",
            "        http: 8000\n",
            "        metrics:\n",
            "          port: 9100\n",
            "          protocol: tcp\n",
        )),
        &staged,
    );

    for name in ["app-web-http", "app-web-metrics"] {
        let service = yaml_of(find(&resources, "Service", name).unwrap());
        assert!(service.contains("port: 8080"));
    }
    let http = yaml_of(find(&resources, "Service", "app-web-http").unwrap());
    assert!(http.contains("targetPort: http"));
}

#[test]
fn static_address_binds_a_load_balancer_and_allow_all_policy() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      ports:\n",
            "        dns:\n",
            "          port: 53\n",
            "          protocol: udp\n",
            "      ip_bindings:\n",
            "        - ip: 192.168.1.53\n",
            "          ports: [dns]\n",
        )),
        &staged,
    );

    let services = all_of(&resources, "Service");
    let lb = services
        .iter()
        .find(|s| yaml_of(s).contains("type: LoadBalancer"))
        .expect("load balancer service");
    let yaml = yaml_of(lb);
    assert!(yaml.contains("metallb.io/loadBalancerIPs: 192.168.1.53"));
    assert!(yaml.contains("port: 53"));
    assert!(yaml.contains("protocol: UDP"));

    let policy = all_of(&resources, "NetworkPolicy")
        .iter()
        .map(|p| yaml_of(p))
        .find(|y| y.contains("0.0.0.0/0"))
        .expect("allow-all policy");
    assert!(policy.contains("port: dns"));
}

#[test]
fn dependencies_emit_policies_in_the_target_namespace() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      dependencies:\n",
            "        - id: db-access\n",
            "          name: shared/postgres/server\n",
            "          port: 5432\n",
        )),
        &staged,
    );

    let policy = yaml_of(find(&resources, "NetworkPolicy", "app-web-db-access").unwrap());
    assert!(policy.contains("namespace: shared"));
    assert!(policy.contains("deploy.manifold.dev/part-of: postgres"));
    assert!(policy.contains("deploy.manifold.dev/name: server"));
    // the source peer is this component, selected across namespaces
    assert!(policy.contains("deploy.manifold.dev/namespace: proj-app"));
    assert!(policy.contains("port: 5432"));
}

#[test]
fn tunnel_route_emits_a_route_resource_and_policy() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      ports:\n",
            "        http: 8000\n",
            "      tunnel_routes:\n",
            "        - port: http\n",
            "          host: app.tunnel.example.com\n",
            "          max_body_size: 50m\n",
        )),
        &staged,
    );

    let route = yaml_of(find(&resources, "TunnelRoute", "app-tunnel-example-com").unwrap());
    assert!(route.contains("virtualHost: app.tunnel.example.com"));
    assert!(route.contains("host: app-web-http.proj-app.svc.cluster.local"));
    assert!(route.contains("port: 8080"));
    assert!(route.contains("maxBodySize: 50m"));

    let policy = yaml_of(
        find(
            &resources,
            "NetworkPolicy",
            "app-web-tunnel-app-tunnel-example-com-http",
        )
        .unwrap(),
    );
    assert!(policy.contains("kubernetes.io/metadata.name: tunnel"));
}

#[test]
fn direct_tunnel_route_only_opens_the_network_path() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      ports:\n",
            "        ssh: 22\n",
            "      tunnel_routes:\n",
            "        - port: ssh\n",
            "          direct: true\n",
        )),
        &staged,
    );
    assert!(all_of(&resources, "TunnelRoute").is_empty());
    assert!(find(&resources, "NetworkPolicy", "app-web-tunnel-ssh").is_some());
}

#[test]
fn log_shipping_emits_a_collector_partial_config() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    observability:\n",
            "      logs: {}\n",
        )),
        &staged,
    );
    let partial = yaml_of(find(&resources, "CollectorPartialConfig", "app-web").unwrap());
    assert!(partial.contains("deploy.manifold.dev/collector: daemonset"));
    assert!(partial.contains("proj_app_app_web"));
    assert!(partial.contains("deploy.manifold.dev/part-of=app"));
}

#[test]
fn http_probe_emits_blackbox_partial_and_policy() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(concat!(
            "    networking:\n",
            "      ports:\n",
            "        http: 8000\n",
            "    observability:\n",
            "      probes:\n",
            "        health:\n",
            "          http_get:\n",
            "            port: http\n",
            "            path: /healthz\n",
        )),
        &staged,
    );

    let partial = yaml_of(
        find(&resources, "CollectorPartialComponent", "app-web-probe-health").unwrap(),
    );
    assert!(partial.contains("prometheus.exporter.blackbox"));
    assert!(partial.contains("app-web-http.proj-app.svc.cluster.local:8080/healthz"));
    assert!(partial.contains("http_2xx"));

    let policy = yaml_of(find(&resources, "NetworkPolicy", "app-web-probe-health").unwrap());
    assert!(policy.contains("kubernetes.io/metadata.name: monitoring"));
    assert!(policy.contains("port: http"));
}
