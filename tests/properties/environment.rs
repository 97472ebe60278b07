//! Environment-combination and hydration properties.

use std::collections::BTreeMap;

use manifold::{hydrate, Environment};
use proptest::prelude::*;

fn bindings() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[a-z]{1,6}", "[a-zA-Z0-9_./-]{0,12}", 0..8)
}

fn env_from(map: &BTreeMap<String, String>) -> Environment {
    let mut env = Environment::new();
    for (k, v) in map {
        env.set(k, v).unwrap();
    }
    env
}

proptest! {
    /// combine(A, B).get(k) == B.get(k) if k in B, else A.get(k).
    #[test]
    fn combine_is_a_flat_right_biased_override(
        a in bindings(),
        b in bindings(),
    ) {
        let combined = env_from(&a).combine(&env_from(&b));
        for key in a.keys().chain(b.keys()) {
            let expected = b.get(key).or_else(|| a.get(key)).unwrap();
            prop_assert_eq!(&combined.get(key).unwrap(), expected);
        }
    }

    /// text without placeholder tokens passes through hydration
    /// unchanged, whatever the environment holds.
    #[test]
    fn hydration_passes_through_plain_text(
        text in "[a-zA-Z0-9 :/\n.-]{0,60}",
        env in bindings(),
    ) {
        let hydrated = hydrate(&text, &env_from(&env)).unwrap();
        prop_assert_eq!(hydrated, text);
    }

    /// every bound placeholder is substituted - no token survives.
    #[test]
    fn hydration_substitutes_every_bound_token(
        keys in proptest::collection::btree_set("[a-z]{1,6}", 1..5),
    ) {
        let mut env = Environment::new();
        let mut text = String::new();
        for key in &keys {
            env.set(key, format!("<{key}>")).unwrap();
            text.push_str(&format!("{key}={{{{ {key} }}}};"));
        }
        let hydrated = hydrate(&text, &env).unwrap();
        prop_assert!(!hydrated.contains("{{"));
        for key in &keys {
            let needle = format!("{key}=<{key}>;");
            prop_assert!(hydrated.contains(&needle));
        }
    }
}
