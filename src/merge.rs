//! Deep, order-sensitive document merge
//!
//! Merges parsed configuration layers. Mapping keys unify recursively,
//! lists concatenate with scalar deduplication, and scalar conflicts
//! resolve per [`MergePolicy`]. The merge is deliberately not
//! associative: layer order is meaning.

use serde_yaml_ng::Value;

use crate::error::{ManifoldError, ManifoldResult};

/// How to resolve two scalars (or type-mismatched values) at one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Later layer wins (the default for layered configuration)
    #[default]
    PreferNew,
    /// Earlier layer wins
    PreferOld,
    /// A real conflict is fatal, reported with its dotted path
    Error,
}

/// Deep-merge `overlay` into `base`.
///
/// `overwrite_with_none` controls whether an explicit null in the
/// overlay erases a previously merged value. Optional fields deserialize
/// to null, so overlay presets pass `false` to keep inherited values.
pub fn deep_merge(
    base: &Value,
    overlay: &Value,
    policy: MergePolicy,
    overwrite_with_none: bool,
) -> ManifoldResult<Value> {
    merge_at("", base, overlay, policy, overwrite_with_none)
}

fn merge_at(
    path: &str,
    base: &Value,
    overlay: &Value,
    policy: MergePolicy,
    overwrite_with_none: bool,
) -> ManifoldResult<Value> {
    match (base, overlay) {
        (Value::Mapping(b), Value::Mapping(o)) => {
            let mut result = b.clone();
            for (key, overlay_value) in o {
                let key_text = key.as_str().map(str::to_string).unwrap_or_else(|| {
                    serde_yaml_ng::to_string(key)
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                });
                let child_path = format!("{path}.{key_text}");
                match result.get(key) {
                    None => {
                        result.insert(key.clone(), overlay_value.clone());
                    }
                    Some(base_value) => {
                        let merged = merge_entry(
                            &child_path,
                            base_value,
                            overlay_value,
                            policy,
                            overwrite_with_none,
                        )?;
                        result.insert(key.clone(), merged);
                    }
                }
            }
            Ok(Value::Mapping(result))
        }
        _ => merge_entry(path, base, overlay, policy, overwrite_with_none),
    }
}

fn merge_entry(
    path: &str,
    base: &Value,
    overlay: &Value,
    policy: MergePolicy,
    overwrite_with_none: bool,
) -> ManifoldResult<Value> {
    if overlay.is_null() && !overwrite_with_none {
        return Ok(base.clone());
    }
    match (base, overlay) {
        (Value::Mapping(_), Value::Mapping(_)) => {
            merge_at(path, base, overlay, policy, overwrite_with_none)
        }
        (Value::Sequence(b), Value::Sequence(o)) => Ok(Value::Sequence(merge_list(b, o))),
        (b, o) => resolve_scalar(path, b, o, policy),
    }
}

/// Concatenate `base + overlay`, dropping later duplicates of scalar
/// elements while preserving first-occurrence order. Mappings and
/// sequences are kept even when equal, matching the "accumulate
/// structured entries across layers" use case.
fn merge_list(base: &[Value], overlay: &[Value]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(base.len() + overlay.len());
    for item in base.iter().chain(overlay.iter()) {
        if is_scalar(item) && result.iter().any(|seen| seen == item) {
            continue;
        }
        result.push(item.clone());
    }
    result
}

fn resolve_scalar(
    path: &str,
    base: &Value,
    overlay: &Value,
    policy: MergePolicy,
) -> ManifoldResult<Value> {
    match policy {
        MergePolicy::PreferNew => Ok(overlay.clone()),
        MergePolicy::PreferOld => Ok(base.clone()),
        MergePolicy::Error => Err(ManifoldError::MergeConflict {
            path: path.to_string(),
        }),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}
