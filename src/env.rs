//! Named, lazily-evaluated key-value environment
//!
//! Configuration layers bind keys either to literal strings or to
//! deferred plugin calls. A deferred binding is a two-state cell: it
//! holds the parsed call until the first `get`, then caches the result
//! for the environment's lifetime. Copies made by [`Environment::combine`]
//! share the cell, so a plugin call executes at most once per binding no
//! matter how many derived environments read it.
//!
//! One composition pass is single-threaded and single-owner (`Rc` +
//! `RefCell`, no locking).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use regex::Regex;
use serde_yaml_ng::Value;

use crate::error::{ManifoldError, ManifoldResult};
use crate::plugins::{PluginCall, PluginResolver};

/// Separator joining nested YAML keys into flat environment keys:
/// `database: { host: x }` binds `database__host`.
pub const NESTING_SEPARATOR: &str = "__";

#[derive(Clone)]
enum Binding {
    Literal(String),
    Deferred(Rc<Deferred>),
}

struct Deferred {
    call: PluginCall,
    resolver: Rc<dyn PluginResolver>,
    cell: RefCell<Option<String>>,
}

impl Deferred {
    fn resolve(&self) -> ManifoldResult<String> {
        if let Some(value) = self.cell.borrow().as_ref() {
            return Ok(value.clone());
        }
        let value = self.resolver.execute(&self.call)?;
        *self.cell.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}

/// A named set of lazily-evaluated bindings
#[derive(Clone, Default)]
pub struct Environment {
    bindings: BTreeMap<String, Binding>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a literal value. Duplicate keys are an error; binding the
    /// same key twice in one layer is always a configuration mistake.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> ManifoldResult<()> {
        self.insert(key.into(), Binding::Literal(value.into()), false)
    }

    /// Bind a literal value, replacing any existing binding. Used only
    /// for synthetic keys injected during per-component rendering.
    pub fn overwrite(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.bindings
            .insert(key.into(), Binding::Literal(value.into()));
    }

    /// Bind a deferred plugin call, memoized on first read.
    pub fn defer(
        &mut self,
        key: impl Into<String>,
        call: PluginCall,
        resolver: Rc<dyn PluginResolver>,
    ) -> ManifoldResult<()> {
        self.insert(
            key.into(),
            Binding::Deferred(Rc::new(Deferred {
                call,
                resolver,
                cell: RefCell::new(None),
            })),
            false,
        )
    }

    fn insert(&mut self, key: String, binding: Binding, overwrite: bool) -> ManifoldResult<()> {
        if !overwrite && self.bindings.contains_key(&key) {
            return Err(ManifoldError::DuplicateBinding { key });
        }
        self.bindings.insert(key, binding);
        Ok(())
    }

    /// Read a key, executing its plugin call on first access.
    pub fn get(&self, key: &str) -> ManifoldResult<String> {
        match self.bindings.get(key) {
            Some(Binding::Literal(value)) => Ok(value.clone()),
            Some(Binding::Deferred(deferred)) => deferred.resolve(),
            None => Err(ManifoldError::UnresolvedReference {
                key: key.to_string(),
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Flat, ordered override: all of `self`'s bindings overwritten by
    /// all of `other`'s. Not a recursive merge - later layers win
    /// key-by-key. Deferred cells are shared, so values already resolved
    /// in either input stay resolved in the result.
    pub fn combine(&self, other: &Environment) -> Environment {
        let mut bindings = self.bindings.clone();
        for (key, binding) in &other.bindings {
            bindings.insert(key.clone(), binding.clone());
        }
        Environment { bindings }
    }

    /// Load a YAML environment layer: nested keys are flattened with
    /// [`NESTING_SEPARATOR`], scalars stringified (booleans lowercased),
    /// and values matching the plugin grammar bound as deferred calls.
    pub fn load_yaml_layer(
        &mut self,
        text: &str,
        resolver: &Rc<dyn PluginResolver>,
    ) -> ManifoldResult<()> {
        let value: Value = serde_yaml_ng::from_str(text)?;
        let flat = flatten(&value)?;
        for (key, scalar) in flat {
            match PluginCall::parse(&scalar) {
                Some(call) => self.defer(key, call, Rc::clone(resolver))?,
                None => self.set(key, scalar)?,
            }
        }
        Ok(())
    }

    /// Load a YAML environment layer from a file; a missing file is an
    /// empty layer when `skip_if_missing` is set.
    pub fn load_yaml_layer_file(
        &mut self,
        path: &Path,
        resolver: &Rc<dyn PluginResolver>,
        skip_if_missing: bool,
    ) -> ManifoldResult<()> {
        if !path.is_file() {
            if skip_if_missing {
                return Ok(());
            }
            return Err(ManifoldError::MissingFile {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        self.load_yaml_layer(&text, resolver)
    }

    /// Load a dotenv-style layer: `KEY=value`, `KEY="quoted value"` or
    /// `KEY={{ plugin('arg') }}` per line, `#` comments and blank lines
    /// ignored, anything else fatal.
    pub fn load_env_layer(
        &mut self,
        text: &str,
        source: &str,
        resolver: &Rc<dyn PluginResolver>,
    ) -> ManifoldResult<()> {
        let ignore_re = Regex::new(r"^\s*(#.*)?$").expect("comment pattern is a valid regex");
        let plugin_re = Regex::new(r"^\s*([^\s#]+)\s*=(\{\{[^}]*\}\})\s*$")
            .expect("plugin line pattern is a valid regex");
        let base_re = Regex::new(r##"^\s*([^\s#]+)\s*=\s*(?:(?:"([^"#]*)")|([^\s#]*))\s*$"##)
            .expect("base line pattern is a valid regex");

        for line in text.lines() {
            if ignore_re.is_match(line) {
                continue;
            }
            if let Some(caps) = plugin_re.captures(line) {
                let key = caps[1].to_string();
                if let Some(call) = PluginCall::parse(&caps[2]) {
                    self.defer(key, call, Rc::clone(resolver))?;
                    continue;
                }
            } else if let Some(caps) = base_re.captures(line) {
                let key = caps[1].to_string();
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                self.set(key, value)?;
                continue;
            }
            return Err(ManifoldError::MalformedEnvEntry {
                file: source.to_string(),
                line: line.trim().to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, binding) in &self.bindings {
            match binding {
                Binding::Literal(_) => map.entry(key, &"<literal>"),
                Binding::Deferred(_) => map.entry(key, &"<deferred>"),
            };
        }
        map.finish()
    }
}

/// Flatten a parsed YAML tree into `key__nested__0` style string pairs.
fn flatten(value: &Value) -> ManifoldResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    flatten_into("", value, &mut out)?;
    Ok(out)
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> ManifoldResult<()> {
    match value {
        Value::Null if prefix.is_empty() => Ok(()), // empty layer file
        Value::String(s) => {
            out.push((prefix.to_string(), s.clone()));
            Ok(())
        }
        Value::Bool(b) => {
            out.push((prefix.to_string(), b.to_string()));
            Ok(())
        }
        Value::Number(n) => {
            out.push((prefix.to_string(), n.to_string()));
            Ok(())
        }
        Value::Sequence(seq) => {
            for (index, item) in seq.iter().enumerate() {
                flatten_into(&child_key(prefix, &index.to_string()), item, out)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (key, item) in map {
                let key = key.as_str().ok_or_else(|| {
                    ManifoldError::validation(prefix, "environment layer keys must be strings")
                })?;
                flatten_into(&child_key(prefix, key), item, out)?;
            }
            Ok(())
        }
        _ => Err(ManifoldError::validation(
            prefix,
            "cannot convert value for environment key",
        )),
    }
}

fn child_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{NESTING_SEPARATOR}{key}")
    }
}
