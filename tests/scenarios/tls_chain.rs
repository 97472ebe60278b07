//! TLS secret resolution chain scenarios.

use crate::common::*;

fn app_doc(defaults: &str, ingress_tls: &str) -> String {
    format!(
        concat!(
            "metadata:\n",
            "  name: app\n",
            "  namespace: proj-app\n",
            "  project: proj\n",
            "{defaults}",
            "components:\n",
            "  web:\n",
            "    image: nginx\n",
            "    networking:\n",
            "      ports:\n",
            "        http: 8000\n",
            "      ingresses:\n",
            "        - host: web.example.com\n",
            "          port: http\n",
            "{ingress_tls}",
        ),
        defaults = defaults,
        ingress_tls = ingress_tls,
    )
}

#[test]
fn app_default_create_synthesizes_secret_and_issuer_annotation() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc(
        "defaults:\n  networking:\n    tls:\n      secret:\n        create: true\n",
        "",
    );
    let resources = synthesize_doc(&doc, &staged);

    let ingress = find(&resources, "Ingress", "app-web-web-example-com").unwrap();
    let yaml = yaml_of(ingress);
    assert!(yaml.contains("secretName: app-web-web-example-com-tls"));
    assert!(yaml.contains("cert-manager.io/cluster-issuer: letsencrypt-prod"));

    // exactly one policy admitting the ingress controller on that port
    let policies: Vec<String> = all_of(&resources, "NetworkPolicy")
        .iter()
        .map(|p| yaml_of(p))
        .filter(|y| y.contains("ingress-nginx"))
        .collect();
    assert_eq!(policies.len(), 1);
    assert!(policies[0].contains("port: http"));
}

#[test]
fn explicit_ingress_secret_wins_over_defaults() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc(
        "defaults:\n  networking:\n    tls:\n      secret:\n        create: true\n",
        "          tls:\n            secret: pinned-tls\n",
    );
    let resources = synthesize_doc(&doc, &staged);
    let yaml = yaml_of(find(&resources, "Ingress", "app-web-web-example-com").unwrap());
    assert!(yaml.contains("secretName: pinned-tls"));
    assert!(!yaml.contains("cert-manager.io"));
}

#[test]
fn mirror_emits_a_placeholder_secret_for_the_controller() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc(
        "defaults:\n  networking:\n    tls:\n      secret:\n        mirror: infra/wildcard-tls\n",
        "",
    );
    let resources = synthesize_doc(&doc, &staged);

    let placeholder = find(&resources, "Secret", "app-web-web-example-com-tls").unwrap();
    let yaml = yaml_of(placeholder);
    assert!(yaml.contains("reflector.v1.k8s.emberstack.com/reflects: infra/wildcard-tls"));
    assert!(yaml.contains("type: kubernetes.io/tls"));
}

#[test]
fn wildcard_default_host_derives_the_parent_domain() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc(
        "defaults:\n  networking:\n    tls:\n      host:\n        wildcard: true\n      secret: wildcard-tls\n",
        "",
    );
    let resources = synthesize_doc(&doc, &staged);
    let yaml = yaml_of(find(&resources, "Ingress", "app-web-web-example-com").unwrap());
    assert!(yaml.contains("- '*.example.com'") || yaml.contains("- \"*.example.com\""));
    assert!(yaml.contains("secretName: wildcard-tls"));
}

#[test]
fn from_host_override_matches_the_certificate_host() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc(
        concat!(
            "defaults:\n",
            "  networking:\n",
            "    tls:\n",
            "      host:\n",
            "        wildcard: true\n",
            "      secret:\n",
            "        from_host:\n",
            "          - host: '*.example.com'\n",
            "            value: example-wildcard-tls\n",
        ),
        "",
    );
    let resources = synthesize_doc(&doc, &staged);
    let yaml = yaml_of(find(&resources, "Ingress", "app-web-web-example-com").unwrap());
    assert!(yaml.contains("secretName: example-wildcard-tls"));
}

#[test]
fn component_defaults_sit_between_ingress_and_app_chain() {
    let (_dir, staged) = empty_staging();
    let doc = concat!(
        "metadata:\n",
        "  name: app\n",
        "  namespace: proj-app\n",
        "  project: proj\n",
        "defaults:\n",
        "  networking:\n",
        "    tls:\n",
        "      secret: app-level-tls\n",
        "components:\n",
        "  web:\n",
        "    image: nginx\n",
        "    networking:\n",
        "      tls:\n",
        "        secret: component-level-tls\n",
        "      ports:\n",
        "        http: 8000\n",
        "      ingresses:\n",
        "        - host: web.example.com\n",
        "          port: http\n",
    );
    let resources = synthesize_doc(doc, &staged);
    let yaml = yaml_of(find(&resources, "Ingress", "app-web-web-example-com").unwrap());
    assert!(yaml.contains("secretName: component-level-tls"));
}

#[test]
fn unresolvable_chain_is_a_fatal_synthesis_error() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc("", "");
    let err = try_synthesize_doc(&doc, &staged).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("web.example.com"));
    assert!(message.contains("no secret could be resolved"));
}

#[test]
fn disabled_tls_synthesizes_no_tls_block() {
    let (_dir, staged) = empty_staging();
    let doc = app_doc("", "          tls:\n            enabled: false\n");
    let resources = synthesize_doc(&doc, &staged);
    let yaml = yaml_of(find(&resources, "Ingress", "app-web-web-example-com").unwrap());
    assert!(!yaml.contains("secretName"));
}
