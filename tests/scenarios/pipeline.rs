//! End-to-end: a layered project composes, validates and synthesizes
//! into a consistent resource set.

use crate::common::*;

fn layered_project() -> TestProject {
    let project = TestProject::new();
    project.write("project.yml", "name: homelab\n");
    project.write("env.yml", "registry: registry.internal\n");
    project.write(
        "app-defaults.yml",
        "defaults:\n  networking:\n    tls:\n      secret:\n        create: true\n",
    );
    project.write(
        "component-defaults.yml",
        "components:\n  \"{{ MANIFOLD_COMPONENT }}\":\n    environment:\n      - id: common\n        raw:\n          COMPONENT_NAME: \"{{ MANIFOLD_COMPONENT }}\"\n",
    );
    project.write(
        "apps/blog/env.yml",
        "blog_tag: \"2.1\"\n",
    );
    project.write(
        "apps/blog/app.yml",
        concat!(
            "components:\n",
            "  web:\n",
            "    image: \"{{ registry }}/blog:{{ blog_tag }}\"\n",
            "    networking:\n",
            "      ports:\n",
            "        http: 8000\n",
            "      ingresses:\n",
            "        - host: blog.example.com\n",
            "          port: http\n",
        ),
    );
    project
}

#[test]
fn synthesizes_the_full_resource_set() {
    let project = layered_project();
    let resources = project.compile("blog");

    assert!(find(&resources, "Namespace", "homelab-blog").is_some());
    assert!(find(&resources, "Deployment", "blog-web").is_some());
    assert!(find(&resources, "Service", "blog-web-http").is_some());
    assert!(find(&resources, "Ingress", "blog-web-blog-example-com").is_some());
    assert!(find(&resources, "ConfigMap", "blog-web-environment-common").is_some());
}

#[test]
fn hydration_reaches_the_container_image() {
    let project = layered_project();
    let resources = project.compile("blog");
    let deployment = find(&resources, "Deployment", "blog-web").unwrap();
    assert!(yaml_of(deployment).contains("image: registry.internal/blog:2.1"));
}

#[test]
fn component_template_is_specialized_per_component() {
    let project = layered_project();
    let resources = project.compile("blog");
    let env = find(&resources, "ConfigMap", "blog-web-environment-common").unwrap();
    assert!(yaml_of(env).contains("COMPONENT_NAME: web"));
}

#[test]
fn selector_labels_agree_between_workload_service_and_policy() {
    let project = layered_project();
    let resources = project.compile("blog");

    let deployment = yaml_of(find(&resources, "Deployment", "blog-web").unwrap());
    let service = yaml_of(find(&resources, "Service", "blog-web-http").unwrap());
    let policies = all_of(&resources, "NetworkPolicy");
    assert!(!policies.is_empty());

    for label in [
        "deploy.manifold.dev/part-of: blog",
        "deploy.manifold.dev/name: web",
        "deploy.manifold.dev/project: homelab",
    ] {
        assert!(deployment.contains(label), "deployment missing {label}");
        assert!(service.contains(label), "service missing {label}");
        assert!(
            yaml_of(policies[0]).contains(label),
            "network policy missing {label}"
        );
    }
}

#[test]
fn plugin_lookups_resolve_through_the_environment() {
    let project = TestProject::new();
    project.write(
        "env.yml",
        "db_password: \"{{ secret('infra/db', 'password') }}\"\n",
    );
    project.write(
        "apps/api/app.yml",
        "components:\n  api:\n    image: api:1\n    environment:\n      - id: creds\n        secret: true\n        raw:\n          DB_PASSWORD: \"{{ db_password }}\"\n",
    );

    let resolver =
        manifold::plugins::StaticResolver::new().with("secret('infra/db', 'password')", "hunter2");
    let resources = project.compile_with("api", resolver);

    let secret = find(&resources, "Secret", "api-api-environment-creds").unwrap();
    assert!(yaml_of(secret).contains("DB_PASSWORD: hunter2"));
}

#[test]
fn metadata_defaults_flow_from_the_project() {
    let project = layered_project();
    let resources = project.compile("blog");
    let namespace = yaml_of(find(&resources, "Namespace", "homelab-blog").unwrap());
    assert!(namespace.contains("deploy.manifold.dev/project: homelab"));
    assert!(namespace.contains("deploy.manifold.dev/namespace: homelab-blog"));
    assert!(namespace.contains("app.kubernetes.io/managed-by: manifold"));
}
