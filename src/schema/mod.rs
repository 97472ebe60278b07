//! Schema and validation
//!
//! Parses a composed configuration document into a strongly-typed
//! [`AppDefinition`], enforcing every tagged-union and cross-field
//! invariant before synthesis runs. Malformed input is rejected here;
//! synthesis can assume a consistent tree.

mod raw;
mod types;

pub use types::*;

use serde_yaml_ng::Value;

use crate::error::{ManifoldError, ManifoldResult};

/// Validate a composed document into an [`AppDefinition`].
///
/// Fail-fast: the first violation found per object is reported, with
/// the offending field path and the candidate set that was ambiguous or
/// empty. Unknown additional fields on components are tolerated and
/// captured, not interpreted.
pub fn validate(document: &Value) -> ManifoldResult<AppDefinition> {
    let raw: raw::RawAppDefinition = serde_yaml_ng::from_value(document.clone())
        .map_err(|e| ManifoldError::validation("", e.to_string()))?;
    raw::validate_app(raw)
}
