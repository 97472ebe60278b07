//! Volume synthesis scenarios across the source kinds.

use crate::common::*;

fn doc_with_volumes(volumes: &str, defaults: &str) -> String {
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
            "    volumes:\n",
            "{volumes}",
        ),
        defaults = defaults,
        volumes = volumes,
    )
}

#[test]
fn inline_data_projects_a_single_read_only_file() {
    let (_dir, staged) = empty_staging();
    let doc = doc_with_volumes(
        "      config:\n        src:\n          data: hello\n        dest:\n          file: /etc/x.txt\n",
        "",
    );
    let resources = synthesize_doc(&doc, &staged);

    let config_maps = all_of(&resources, "ConfigMap");
    assert_eq!(config_maps.len(), 1);
    let yaml = yaml_of(config_maps[0]);
    assert!(yaml.contains("data: hello"));

    let deployment = yaml_of(find(&resources, "Deployment", "app-web").unwrap());
    assert!(deployment.contains("mountPath: /etc/x.txt"));
    assert!(deployment.contains("subPath: x.txt"));
    assert!(deployment.contains("readOnly: true"));
}

#[test]
fn secret_flag_materializes_a_secret_instead() {
    let (_dir, staged) = empty_staging();
    let doc = doc_with_volumes(
        "      config:\n        src:\n          data: hush\n          secret: true\n        dest:\n          file: /etc/x.txt\n",
        "",
    );
    let resources = synthesize_doc(&doc, &staged);
    assert!(all_of(&resources, "ConfigMap").is_empty());
    let secrets = all_of(&resources, "Secret");
    assert_eq!(secrets.len(), 1);
    assert!(yaml_of(secrets[0]).contains("data: hush"));
}

#[test]
fn staged_directory_projects_relative_paths() {
    let project = TestProject::new();
    project.stage("configs/main.conf", "main");
    project.stage("configs/extra/sub.conf", "sub");
    let doc = doc_with_volumes(
        "      configs:\n        src:\n          dir: configs\n        dest:\n          dir: /etc/app\n",
        "",
    );
    let resources = synthesize_doc(&doc, &project.staged_tree());

    let config_map = yaml_of(all_of(&resources, "ConfigMap")[0]);
    assert!(config_map.contains("main.conf: main"));
    assert!(config_map.contains("extra.sub.conf: sub"));

    let deployment = yaml_of(find(&resources, "Deployment", "app-web").unwrap());
    assert!(deployment.contains("mountPath: /etc/app"));
    assert!(deployment.contains("path: extra/sub.conf"));
}

#[test]
fn glob_source_matches_staged_files() {
    let project = TestProject::new();
    project.stage("rules/a.yml", "a");
    project.stage("rules/b.txt", "b");
    let doc = doc_with_volumes(
        "      rules:\n        src:\n          glob: \"rules/*.yml\"\n        dest:\n          dir: /etc/rules\n",
        "",
    );
    let resources = synthesize_doc(&doc, &project.staged_tree());
    let config_map = yaml_of(all_of(&resources, "ConfigMap")[0]);
    assert!(config_map.contains("rules.a.yml: a"));
    assert!(!config_map.contains("b.txt"));
}

#[test]
fn pvc_source_resolves_size_through_the_default_chain() {
    let (_dir, staged) = empty_staging();
    let doc = doc_with_volumes(
        "      state:\n        src:\n          pvc: {}\n        dest:\n          dir: /var/lib/app\n",
        "defaults:\n  pvc:\n    storage_class: fast-ssd\n    size: 10Gi\n",
    );
    let resources = synthesize_doc(&doc, &staged);

    let claim = yaml_of(find(&resources, "PersistentVolumeClaim", "app-web-state").unwrap());
    assert!(claim.contains("storageClassName: fast-ssd"));
    assert!(claim.contains("storage: 10Gi"));

    let deployment = yaml_of(find(&resources, "Deployment", "app-web").unwrap());
    assert!(deployment.contains("claimName: app-web-state"));
}

#[test]
fn pvc_without_size_anywhere_is_a_synthesis_error() {
    let (_dir, staged) = empty_staging();
    let doc = doc_with_volumes(
        "      state:\n        src:\n          pvc: {}\n        dest:\n          dir: /var/lib/app\n",
        "",
    );
    let err = try_synthesize_doc(&doc, &staged).unwrap_err();
    assert!(err.to_string().contains("no size and no pvc default"));
}

#[test]
fn host_scratch_and_memory_sources_become_pod_volumes() {
    let (_dir, staged) = empty_staging();
    let doc = doc_with_volumes(
        concat!(
            "      media:\n",
            "        src:\n",
            "          host:\n",
            "            dir: /srv/media\n",
            "        dest:\n",
            "          dir: /media\n",
            "      tmp:\n",
            "        src:\n",
            "          scratch:\n",
            "            size: 1Gi\n",
            "        dest:\n",
            "          dir: /tmp/work\n",
            "      cache:\n",
            "        src:\n",
            "          memory:\n",
            "            size: 256Mi\n",
            "        dest:\n",
            "          dir: /cache\n",
        ),
        "",
    );
    let resources = synthesize_doc(&doc, &staged);
    let deployment = yaml_of(find(&resources, "Deployment", "app-web").unwrap());

    assert!(deployment.contains("path: /srv/media"));
    assert!(deployment.contains("type: Directory"));
    assert!(deployment.contains("sizeLimit: 1Gi"));
    assert!(deployment.contains("medium: Memory"));
    assert!(deployment.contains("sizeLimit: 256Mi"));
    // host mounts default to read-only
    assert!(deployment.contains("readOnly: true"));
}
