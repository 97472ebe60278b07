//! Plugin resolver for external configuration lookups
//!
//! Configuration layers may defer a value to a named plugin:
//!
//! ```text
//! db_password: "{{ secret('infra/postgres', 'password') }}"
//! build_host: "{{ env('BUILD_HOST') }}"
//! api_token: "{{ http('vault', 'path=/v1/token') }}"
//! region: "{{ yaml('CLUSTER_FILE', 'regions', 0, 'name') }}"
//! ```
//!
//! A plugin call is executed at most once per binding (memoized by the
//! owning [`Environment`](crate::env::Environment)). Any underlying
//! failure - network, missing credential, malformed arguments - is
//! re-raised as a single [`ManifoldError::PluginExecution`] carrying the
//! rendered call signature, never a transport stack trace.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ManifoldError, ManifoldResult};

/// Default timeout for plugin network calls. This is a build-time tool;
/// a slow collaborator should fail the build, not stall it.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Environment variable naming the secret store endpoint
const SECRET_STORE_URL_VAR: &str = "MANIFOLD_SECRET_STORE_URL";
/// Environment variable holding the secret store bearer token
const SECRET_STORE_TOKEN_VAR: &str = "MANIFOLD_SECRET_STORE_TOKEN";
/// Environment variable naming the secret store workspace
const SECRET_STORE_WORKSPACE_VAR: &str = "MANIFOLD_SECRET_STORE_WORKSPACE";

/// A parsed plugin invocation: `name(arg, arg, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCall {
    pub name: String,
    pub args: Vec<String>,
}

impl PluginCall {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Parse a whole scalar of the form `{{ name('arg', 42, ...) }}`.
    ///
    /// Arguments are single-quoted strings or bare numerics. Returns
    /// `None` when the scalar is not a plugin invocation (it then binds
    /// as a literal).
    pub fn parse(scalar: &str) -> Option<Self> {
        // the grammar is anchored: partial matches bind as literals
        let call_re = Regex::new(r"^\s*\{\{\s*([A-Za-z_-]+)\s*\(\s*([^)]*)\s*\)\s*\}\}\s*$")
            .expect("plugin grammar is a valid regex");
        let arg_re = Regex::new(r"(?:'([^']*)')|([0-9]+)").expect("plugin args are a valid regex");

        let caps = call_re.captures(scalar)?;
        let name = caps.get(1)?.as_str().to_string();
        let args = arg_re
            .captures_iter(caps.get(2)?.as_str())
            .map(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
            .collect();

        Some(Self { name, args })
    }

    /// Render the call signature for diagnostics: `secret('a', 'b')`
    pub fn render(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|a| format!("'{a}'"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }

    fn fail(&self, message: impl Into<String>) -> ManifoldError {
        ManifoldError::PluginExecution {
            call: self.render(),
            message: message.into(),
        }
    }
}

/// Executes plugin calls. The seam is a trait so composition can run
/// against a table-backed resolver in tests and offline dry-runs.
pub trait PluginResolver {
    fn execute(&self, call: &PluginCall) -> ManifoldResult<String>;
}

/// Table-backed resolver: maps rendered call signatures to fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    values: BTreeMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, call: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(call.into(), value.into());
        self
    }
}

impl PluginResolver for StaticResolver {
    fn execute(&self, call: &PluginCall) -> ManifoldResult<String> {
        self.values
            .get(&call.render())
            .cloned()
            .ok_or_else(|| call.fail("no static value registered"))
    }
}

/// The production resolver: blocking network and filesystem lookups.
#[derive(Debug, Clone, Default)]
pub struct StandardResolver;

impl StandardResolver {
    pub fn new() -> Self {
        Self
    }
}

impl PluginResolver for StandardResolver {
    fn execute(&self, call: &PluginCall) -> ManifoldResult<String> {
        match call.name.as_str() {
            "secret" => secret_lookup(call),
            "http" => http_fetch(call),
            "env" => env_passthrough(call),
            "yaml" => yaml_lookup(call),
            other => Err(call.fail(format!("unknown plugin '{other}'"))),
        }
    }
}

fn require_env(call: &PluginCall, key: &str) -> ManifoldResult<String> {
    std::env::var(key).map_err(|_| call.fail(format!("no such environment variable: {key}")))
}

fn try_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Shape of the secret store's raw-secret response
#[derive(Debug, Deserialize)]
struct SecretResponse {
    secret: SecretBody,
}

#[derive(Debug, Deserialize)]
struct SecretBody {
    value: String,
}

/// `secret('path/to/secret', 'secret-name')` - bearer-authenticated GET
/// against the secret store named by the process environment.
fn secret_lookup(call: &PluginCall) -> ManifoldResult<String> {
    if call.args.len() != 2 {
        return Err(call.fail(format!(
            "expected 2 arguments (path, name), found {}",
            call.args.len()
        )));
    }
    let (path, name) = (&call.args[0], &call.args[1]);

    let url = require_env(call, SECRET_STORE_URL_VAR)?;
    let token = require_env(call, SECRET_STORE_TOKEN_VAR)?;
    let workspace = require_env(call, SECRET_STORE_WORKSPACE_VAR)?;

    let secret_url = format!(
        "{}/api/secrets/raw/{name}?workspace={workspace}&path=/{path}/",
        url.trim_end_matches('/')
    );

    let client = reqwest::blocking::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| call.fail(e.to_string()))?;
    let response = client
        .get(&secret_url)
        .bearer_auth(token)
        .send()
        .map_err(|e| call.fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(call.fail(format!("unexpected status: {}", response.status().as_u16())));
    }
    let body: SecretResponse = response.json().map_err(|e| call.fail(e.to_string()))?;
    Ok(body.secret.value)
}

/// `http('config-name', 'url=...', 'method=POST', ...)` - generic fetch.
///
/// Each setting falls back to `MANIFOLD_HTTP_<CONFIG-NAME>_<SETTING>` in
/// the process environment, so call sites can stay terse:
/// `http('registry')` with `MANIFOLD_HTTP_REGISTRY_URL` set.
fn http_fetch(call: &PluginCall) -> ManifoldResult<String> {
    if call.args.is_empty() {
        return Err(call.fail("expected at least 1 argument (config name)"));
    }
    let config_name = &call.args[0];
    let prefix = format!("MANIFOLD_HTTP_{}_", config_name.to_uppercase().replace('-', "_"));

    let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
    for arg in &call.args[1..] {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| call.fail(format!("argument '{arg}' is not of the form key=value")))?;
        overrides.insert(key, value);
    }

    let setting = |key: &str| -> Option<String> {
        overrides
            .get(key)
            .map(|v| (*v).to_string())
            .or_else(|| try_env(&format!("{prefix}{}", key.to_uppercase())))
    };

    let url = match setting("url") {
        Some(url) => url,
        None => {
            let baseurl = setting("baseurl")
                .ok_or_else(|| call.fail(format!("neither url nor baseurl configured ({prefix}URL)")))?;
            let path = setting("path").unwrap_or_default();
            format!(
                "{}/{}",
                baseurl.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    };

    let method = setting("method").unwrap_or_else(|| "GET".to_string()).to_uppercase();
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| call.fail(format!("invalid method '{method}'")))?;

    let timeout = match setting("timeout") {
        Some(t) => Duration::from_secs(
            t.parse::<u64>()
                .map_err(|_| call.fail(format!("invalid timeout '{t}'")))?,
        ),
        None => DEFAULT_TIMEOUT,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| call.fail(e.to_string()))?;
    let mut request = client.request(method, &url);

    if let Some(headers) = setting("headers") {
        let headers: BTreeMap<String, String> =
            serde_json::from_str(&headers).map_err(|e| call.fail(format!("invalid headers: {e}")))?;
        for (k, v) in headers {
            request = request.header(k, v);
        }
    }
    if let Some(query) = setting("query") {
        let query: BTreeMap<String, String> =
            serde_json::from_str(&query).map_err(|e| call.fail(format!("invalid query: {e}")))?;
        request = request.query(&query);
    }
    if let Some(body) = setting("body") {
        request = request.body(body);
    }

    let response = request.send().map_err(|e| call.fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(call.fail(format!("unexpected status: {}", response.status().as_u16())));
    }
    response.text().map_err(|e| call.fail(e.to_string()))
}

/// `env('MY_VAR')` - process environment passthrough. Does not recurse.
fn env_passthrough(call: &PluginCall) -> ManifoldResult<String> {
    if call.args.len() != 1 {
        return Err(call.fail(format!(
            "expected 1 argument (variable name), found {}",
            call.args.len()
        )));
    }
    require_env(call, &call.args[0])
}

/// `yaml('path-or-env-var', 'key', 0, 'key')` - nested document lookup.
///
/// The first argument is a file path, unless it names a set environment
/// variable, in which case that variable's value is the path. The walk
/// must end on a string scalar.
fn yaml_lookup(call: &PluginCall) -> ManifoldResult<String> {
    if call.args.is_empty() {
        return Err(call.fail("expected at least 1 argument (file path)"));
    }
    let file_path = try_env(&call.args[0]).unwrap_or_else(|| call.args[0].clone());
    if !Path::new(&file_path).is_file() {
        return Err(call.fail(format!("no such file: {file_path}")));
    }

    let text = std::fs::read_to_string(&file_path).map_err(|e| call.fail(e.to_string()))?;
    let mut current: serde_yaml_ng::Value =
        serde_yaml_ng::from_str(&text).map_err(|e| call.fail(e.to_string()))?;

    for key in &call.args[1..] {
        current = match (&current, key.parse::<usize>()) {
            (serde_yaml_ng::Value::Sequence(seq), Ok(index)) => seq
                .get(index)
                .cloned()
                .ok_or_else(|| call.fail(format!("index {index} out of bounds")))?,
            (serde_yaml_ng::Value::Mapping(map), _) => map
                .get(serde_yaml_ng::Value::String(key.clone()))
                .cloned()
                .ok_or_else(|| call.fail(format!("no such key '{key}'")))?,
            _ => return Err(call.fail(format!("cannot descend into scalar at '{key}'"))),
        };
    }

    match current {
        serde_yaml_ng::Value::String(s) => Ok(s),
        other => Err(call.fail(format!(
            "path did not end in a string (found {})",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &serde_yaml_ng::Value) -> &'static str {
    match value {
        serde_yaml_ng::Value::Null => "null",
        serde_yaml_ng::Value::Bool(_) => "bool",
        serde_yaml_ng::Value::Number(_) => "number",
        serde_yaml_ng::Value::String(_) => "string",
        serde_yaml_ng::Value::Sequence(_) => "sequence",
        serde_yaml_ng::Value::Mapping(_) => "mapping",
        serde_yaml_ng::Value::Tagged(_) => "tagged value",
    }
}
