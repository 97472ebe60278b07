//! Naming-convention properties.

use manifold::synth::naming::{coerce_dns_name, hash_str, stable_id};
use proptest::prelude::*;

proptest! {
    /// coerced names are valid DNS-1123 label fragments: lowercase
    /// alphanumerics and single dashes, no edge dashes, at most 63
    /// characters.
    #[test]
    fn coerced_names_are_dns_safe(input in ".{0,120}") {
        let coerced = coerce_dns_name(&input);
        prop_assert!(coerced.len() <= 63);
        prop_assert!(coerced
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!coerced.starts_with('-'));
        prop_assert!(!coerced.ends_with('-'));
        prop_assert!(!coerced.contains("--"));
    }

    /// coercion is idempotent.
    #[test]
    fn coercion_is_idempotent(input in ".{0,120}") {
        let once = coerce_dns_name(&input);
        prop_assert_eq!(coerce_dns_name(&once), once.clone());
    }

    /// hashes are stable, length-bounded and hex.
    #[test]
    fn hashes_are_stable_hex(input in ".{0,64}", len in 1usize..16) {
        let first = hash_str(&input, len);
        prop_assert_eq!(hash_str(&input, len), first.clone());
        prop_assert_eq!(first.len(), len);
        prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// equal specs hash equal, differing specs (almost surely) differ.
    #[test]
    fn stable_ids_discriminate(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
        prop_assert_eq!(stable_id(&a), stable_id(&a.clone()));
        if a != b {
            prop_assert_ne!(stable_id(&a), stable_id(&b));
        }
    }
}
