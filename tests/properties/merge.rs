//! Merge-law properties.

use manifold::{deep_merge, MergePolicy};
use proptest::prelude::*;
use serde_yaml_ng::Value;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::Number(n.into())),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn flat_mapping(keys: &'static str) -> impl Strategy<Value = Value> {
    proptest::collection::btree_map(keys.prop_map(String::from), scalar(), 0..6).prop_map(|map| {
        let mut mapping = serde_yaml_ng::Mapping::new();
        for (k, v) in map {
            mapping.insert(Value::String(k), v);
        }
        Value::Mapping(mapping)
    })
}

proptest! {
    /// prefer-new always yields the overlay's scalar at shared keys,
    /// and never drops keys from either side.
    #[test]
    fn prefer_new_takes_overlay_scalars(
        base in flat_mapping("[ab]"),
        overlay in flat_mapping("[ab]"),
    ) {
        let merged = deep_merge(&base, &overlay, MergePolicy::PreferNew, true).unwrap();
        let merged = merged.as_mapping().unwrap();
        let base = base.as_mapping().unwrap();
        let overlay = overlay.as_mapping().unwrap();

        for (key, value) in overlay {
            prop_assert_eq!(merged.get(key).unwrap(), value);
        }
        for (key, value) in base {
            if !overlay.contains_key(key) {
                prop_assert_eq!(merged.get(key).unwrap(), value);
            }
        }
    }

    /// prefer-old is the mirror image.
    #[test]
    fn prefer_old_keeps_base_scalars(
        base in flat_mapping("[ab]"),
        overlay in flat_mapping("[ab]"),
    ) {
        let merged = deep_merge(&base, &overlay, MergePolicy::PreferOld, true).unwrap();
        let merged = merged.as_mapping().unwrap();
        for (key, value) in base.as_mapping().unwrap() {
            prop_assert_eq!(merged.get(key).unwrap(), value);
        }
    }

    /// list merge deduplicates scalars while preserving first-seen
    /// order: every element appears once, base-relative order intact.
    #[test]
    fn list_merge_dedupes_and_preserves_order(
        base in proptest::collection::vec(0i32..20, 0..10),
        overlay in proptest::collection::vec(0i32..20, 0..10),
    ) {
        let to_doc = |items: &[i32]| {
            let seq: Vec<Value> = items.iter().map(|n| Value::Number((*n).into())).collect();
            let mut mapping = serde_yaml_ng::Mapping::new();
            mapping.insert(Value::String("l".into()), Value::Sequence(seq));
            Value::Mapping(mapping)
        };

        let merged = deep_merge(&to_doc(&base), &to_doc(&overlay), MergePolicy::PreferNew, true)
            .unwrap();
        let merged: Vec<i32> = merged["l"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap() as i32)
            .collect();

        // expected: concatenation with later duplicates removed
        let mut expected = Vec::new();
        for item in base.iter().chain(overlay.iter()) {
            if !expected.contains(item) {
                expected.push(*item);
            }
        }
        prop_assert_eq!(merged, expected);
    }

    /// the error policy is exactly "no shared scalar keys".
    #[test]
    fn error_policy_fires_iff_scalars_collide(
        base in flat_mapping("[abc]"),
        overlay in flat_mapping("[abc]"),
    ) {
        let collides = base
            .as_mapping()
            .unwrap()
            .keys()
            .any(|k| overlay.as_mapping().unwrap().contains_key(k));
        let result = deep_merge(&base, &overlay, MergePolicy::Error, true);
        prop_assert_eq!(result.is_err(), collides);
    }
}

#[test]
fn spec_example_merges_as_documented() {
    let base: Value = serde_yaml_ng::from_str("a: 1\nb:\n  c: 2").unwrap();
    let overlay: Value = serde_yaml_ng::from_str("b:\n  c: 3\n  d: 4").unwrap();
    let merged = deep_merge(&base, &overlay, MergePolicy::PreferNew, true).unwrap();
    let expected: Value = serde_yaml_ng::from_str("a: 1\nb:\n  c: 3\n  d: 4").unwrap();
    assert_eq!(merged, expected);
}
