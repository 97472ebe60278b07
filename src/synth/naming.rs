//! Naming, hashing and label conventions
//!
//! Every generated resource name is a pure function of the app name,
//! component name and a discriminating suffix. Where several same-kind
//! specs can coexist on one component, the discriminator is a short
//! stable hash of the canonicalized spec: identical specs always get
//! identical names, differing specs never collide, and re-synthesis of
//! unchanged input is byte-for-byte reproducible.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::schema::{AppMetadata, Component};

/// Selector label carrying the app name
pub const APP_LABEL: &str = "deploy.manifold.dev/part-of";
/// Selector label carrying the component name
pub const COMPONENT_LABEL: &str = "deploy.manifold.dev/name";
/// Selector label carrying the project name
pub const PROJECT_LABEL: &str = "deploy.manifold.dev/project";
/// Namespace label enabling cross-namespace selection
pub const NAMESPACE_LABEL: &str = "deploy.manifold.dev/namespace";
/// Value for managed-by labels
pub const MANAGED_BY: &str = "manifold";

/// Length of short-hash discriminators in resource names
const ID_LENGTH: usize = 8;

/// Coerce a free-form string into a DNS-1123 compatible name fragment.
pub fn coerce_dns_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true; // suppress leading dashes
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(63);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// First `length` hex characters of the SHA-256 of `input`.
pub fn hash_str(input: &str, length: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(length);
    hex
}

/// Short stable discriminator of a canonicalized (JSON) spec.
pub fn stable_id<T: Serialize>(spec: &T) -> String {
    let canonical = serde_json::to_string(spec).unwrap_or_default();
    hash_str(&canonical, ID_LENGTH)
}

/// Coerce a staged relative path into a valid object data key.
pub fn config_key(path: &str) -> String {
    path.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '.'
            }
        })
        .collect()
}

/// App-level labels: user labels plus the app selector.
pub fn app_labels(metadata: &AppMetadata) -> BTreeMap<String, String> {
    let mut labels = metadata.labels.clone();
    labels
        .entry(APP_LABEL.to_string())
        .or_insert_with(|| metadata.name.clone());
    labels
        .entry(PROJECT_LABEL.to_string())
        .or_insert_with(|| metadata.project.clone());
    labels
}

/// Component labels: app labels overlaid with the component's own, plus
/// the component selector. Identical on the pod template, the service
/// selector and every network-policy pod selector.
pub fn component_labels(
    app_labels: &BTreeMap<String, String>,
    component: &Component,
) -> BTreeMap<String, String> {
    let mut labels = app_labels.clone();
    labels.extend(component.labels.clone());
    labels
        .entry(COMPONENT_LABEL.to_string())
        .or_insert_with(|| component.name.clone());
    labels
}

/// The selector-label triple shared by workloads, services and policies.
pub fn selector_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    [APP_LABEL, COMPONENT_LABEL, PROJECT_LABEL]
        .iter()
        .filter_map(|key| {
            labels
                .get(*key)
                .map(|value| ((*key).to_string(), value.clone()))
        })
        .collect()
}
