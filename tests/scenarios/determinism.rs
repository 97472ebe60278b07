//! Re-synthesis of unchanged input must be byte-for-byte reproducible.

use crate::common::*;

const DOC: &str = concat!(
    "metadata:\n",
    "  name: app\n",
    "  namespace: proj-app\n",
    "  project: proj\n",
    "defaults:\n",
    "  networking:\n",
    "    tls:\n",
    "      secret:\n",
    "        create: true\n",
    "components:\n",
    "  web:\n",
    "    image: nginx\n",
    "    networking:\n",
    "      ports:\n",
    "        http: 8000\n",
    "      ingresses:\n",
    "        - host: web.example.com\n",
    "          port: http\n",
    "      dependencies:\n",
    "        - name: db\n",
    "          port: 5432\n",
    "    environment:\n",
    "      - raw:\n",
    "          A: 1\n",
    "    backups:\n",
    "      - name: nightly\n",
    "        schedule: '0 2 * * *'\n",
    "  db:\n",
    "    image: postgres\n",
    "    volumes:\n",
    "      state:\n",
    "        src:\n",
    "          pvc:\n",
    "            size: 5Gi\n",
    "        dest:\n",
    "          dir: /var/lib/postgresql\n",
);

#[test]
fn synthesis_twice_yields_identical_streams() {
    let (_dir, staged) = empty_staging();
    let first = synthesize_doc(DOC, &staged);
    let second = synthesize_doc(DOC, &staged);

    let first_stream = manifold::to_yaml_stream(&first).unwrap();
    let second_stream = manifold::to_yaml_stream(&second).unwrap();
    assert_eq!(first_stream, second_stream);
}

#[test]
fn names_are_unique_across_kinds() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(DOC, &staged);

    let mut seen = std::collections::BTreeSet::new();
    for resource in &resources {
        let key = (resource.kind().to_string(), resource.name().to_string());
        assert!(seen.insert(key.clone()), "duplicate resource {key:?}");
    }
}

#[test]
fn name_and_label_sets_are_stable() {
    let (_dir, staged) = empty_staging();
    let collect = || {
        synthesize_doc(DOC, &staged)
            .iter()
            .map(|r| {
                format!(
                    "{}/{}/{:?}",
                    r.kind(),
                    r.name(),
                    r.metadata().labels
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(collect(), collect());
}
