//! Raw document model and validation
//!
//! The serde-facing shape of the merged configuration document. Union
//! fields arrive as sibling optionals; [`validate`](super::validate)
//! checks every "exactly one of" invariant in one pass and converts the
//! tree into the sum types in [`types`](super::types). Errors are
//! fail-fast per object and name the offending dotted path plus the
//! candidate set that was ambiguous or empty.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml_ng::Value;

use super::types::*;
use crate::error::{ManifoldError, ManifoldResult};
use crate::merge::{deep_merge, MergePolicy};
use crate::synth::naming::stable_id;

/// Reject zero- or multi-selected union fields, naming the candidates.
fn exactly_one(path: &str, selected: &[(&str, bool)]) -> ManifoldResult<()> {
    let hits: Vec<&str> = selected.iter().filter(|(_, p)| *p).map(|(n, _)| *n).collect();
    let candidates: Vec<&str> = selected.iter().map(|(n, _)| *n).collect();
    match hits.len() {
        1 => Ok(()),
        0 => Err(ManifoldError::validation(
            path,
            format!("exactly one of {{{}}} must be set, found none", candidates.join(", ")),
        )),
        _ => Err(ManifoldError::validation(
            path,
            format!(
                "exactly one of {{{}}} must be set, found {{{}}}",
                candidates.join(", "),
                hits.join(", ")
            ),
        )),
    }
}

fn at_most_one(path: &str, selected: &[(&str, bool)]) -> ManifoldResult<()> {
    let hits: Vec<&str> = selected.iter().filter(|(_, p)| *p).map(|(n, _)| *n).collect();
    if hits.len() > 1 {
        let candidates: Vec<&str> = selected.iter().map(|(n, _)| *n).collect();
        return Err(ManifoldError::validation(
            path,
            format!(
                "at most one of {{{}}} may be set, found {{{}}}",
                candidates.join(", "),
                hits.join(", ")
            ),
        ));
    }
    Ok(())
}

/// A scalar that may be written as a string or a structured object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StringOr<T> {
    Text(String),
    Structured(T),
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "TCP".to_string()
}

// ---------------------------------------------------------------------
// top level

#[derive(Debug, Deserialize)]
pub(super) struct RawAppDefinition {
    metadata: RawAppMetadata,
    #[serde(default)]
    defaults: Option<RawAppDefaults>,
    #[serde(default)]
    components: BTreeMap<String, RawComponent>,
}

#[derive(Debug, Deserialize)]
struct RawAppMetadata {
    name: String,
    namespace: String,
    project: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

pub(super) fn validate_app(raw: RawAppDefinition) -> ManifoldResult<AppDefinition> {
    let defaults = validate_defaults(raw.defaults)?;
    let mut components = BTreeMap::new();
    for (name, component) in raw.components {
        let path = format!("components.{name}");
        let component = validate_component(&path, &name, component, &defaults)?;
        components.insert(name, component);
    }
    Ok(AppDefinition {
        metadata: AppMetadata {
            name: raw.metadata.name,
            namespace: raw.metadata.namespace,
            project: raw.metadata.project,
            labels: raw.metadata.labels,
            annotations: raw.metadata.annotations,
        },
        defaults,
        components,
    })
}

// ---------------------------------------------------------------------
// defaults

#[derive(Debug, Default, Deserialize)]
struct RawAppDefaults {
    #[serde(default)]
    pvc: Option<RawPvcDefaults>,
    #[serde(default)]
    images: Option<RawImages>,
    #[serde(default)]
    backup: Option<RawBackupDefaults>,
    #[serde(default)]
    networking: Option<RawDefaultsNetworking>,
}

#[derive(Debug, Deserialize)]
struct RawPvcDefaults {
    #[serde(default)]
    storage_class: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImages {
    #[serde(default = "RawImages::shell")]
    startup_shell: String,
    #[serde(default = "RawImages::shell")]
    startup_chown: String,
    #[serde(default = "RawImages::shell")]
    startup_chmod: String,
    #[serde(default = "RawImages::shell")]
    startup_chgrp: String,
    #[serde(default = "RawImages::render")]
    startup_render: String,
    #[serde(default = "RawImages::backup_job")]
    backup_job: String,
    #[serde(default = "RawImages::vpn")]
    vpn: String,
}

impl RawImages {
    fn shell() -> String {
        "busybox".to_string()
    }
    fn render() -> String {
        "hairyhenderson/gomplate".to_string()
    }
    fn backup_job() -> String {
        "manifold/backup-runner".to_string()
    }
    fn vpn() -> String {
        "qmcgaw/gluetun".to_string()
    }
}

impl Default for RawImages {
    fn default() -> Self {
        Self {
            startup_shell: Self::shell(),
            startup_chown: Self::shell(),
            startup_chmod: Self::shell(),
            startup_chgrp: Self::shell(),
            startup_render: Self::render(),
            backup_job: Self::backup_job(),
            vpn: Self::vpn(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBackupDefaults {
    #[serde(default)]
    overlays: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawDefaultsNetworking {
    #[serde(default)]
    tls: Option<RawTlsDefaults>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTlsDefaults {
    #[serde(default)]
    host: Option<StringOr<RawTlsHost>>,
    #[serde(default)]
    secret: Option<StringOr<RawTlsDefaultSecret>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTlsHost {
    #[serde(default)]
    wildcard: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTlsDefaultSecret {
    #[serde(default)]
    create: Option<bool>,
    #[serde(default)]
    mirror: Option<String>,
    #[serde(default)]
    from_host: Option<Vec<RawTlsHostOverride>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTlsHostOverride {
    host: String,
    value: StringOr<RawTlsSecretSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTlsSecretSource {
    #[serde(default)]
    create: Option<bool>,
    #[serde(default)]
    mirror: Option<String>,
}

fn validate_defaults(raw: Option<RawAppDefaults>) -> ManifoldResult<AppDefaults> {
    let raw = raw.unwrap_or_default();
    let images = raw.images.unwrap_or_default();
    let tls = raw
        .networking
        .and_then(|n| n.tls)
        .map(|tls| validate_tls_defaults("defaults.networking.tls", tls))
        .transpose()?;
    Ok(AppDefaults {
        images: HelperImages {
            startup_shell: images.startup_shell,
            startup_chown: images.startup_chown,
            startup_chmod: images.startup_chmod,
            startup_chgrp: images.startup_chgrp,
            startup_render: images.startup_render,
            backup_job: images.backup_job,
            vpn: images.vpn,
        },
        pvc: raw.pvc.map(|p| PvcDefaults {
            storage_class: p.storage_class,
            size: p.size,
        }),
        tls,
        backup_overlays: raw.backup.map(|b| b.overlays).unwrap_or_default(),
    })
}

fn validate_tls_defaults(path: &str, raw: RawTlsDefaults) -> ManifoldResult<TlsDefaults> {
    let host = match raw.host {
        None => None,
        Some(StringOr::Text(host)) => Some(TlsDefaultHost::Literal(host)),
        Some(StringOr::Structured(spec)) => match spec.wildcard {
            Some(true) => Some(TlsDefaultHost::Wildcard),
            _ => {
                return Err(ManifoldError::validation(
                    format!("{path}.host"),
                    "host must be a literal string or set wildcard: true",
                ))
            }
        },
    };
    let secret = match raw.secret {
        None => None,
        Some(StringOr::Text(name)) => Some(TlsDefaultSecret {
            source: Some(TlsSecretSource::Name(name)),
            from_host: Vec::new(),
        }),
        Some(StringOr::Structured(spec)) => {
            let source_path = format!("{path}.secret");
            at_most_one(
                &source_path,
                &[("create", spec.create == Some(true)), ("mirror", spec.mirror.is_some())],
            )?;
            let source = if spec.create == Some(true) {
                Some(TlsSecretSource::Create)
            } else {
                spec.mirror.map(TlsSecretSource::Mirror)
            };
            let mut from_host = Vec::new();
            for (index, entry) in spec.from_host.unwrap_or_default().into_iter().enumerate() {
                let entry_path = format!("{path}.secret.from_host.{index}");
                from_host.push(TlsHostOverride {
                    host: entry.host,
                    value: validate_secret_source(&entry_path, entry.value)?,
                });
            }
            Some(TlsDefaultSecret { source, from_host })
        }
    };
    Ok(TlsDefaults { host, secret })
}

fn validate_secret_source(
    path: &str,
    raw: StringOr<RawTlsSecretSource>,
) -> ManifoldResult<TlsSecretSource> {
    match raw {
        StringOr::Text(name) => Ok(TlsSecretSource::Name(name)),
        StringOr::Structured(spec) => {
            exactly_one(
                path,
                &[("create", spec.create == Some(true)), ("mirror", spec.mirror.is_some())],
            )?;
            if spec.create == Some(true) {
                Ok(TlsSecretSource::Create)
            } else {
                Ok(TlsSecretSource::Mirror(
                    spec.mirror.unwrap_or_default(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------
// components

#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(default)]
    metadata: Option<RawComponentMetadata>,
    image: String,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    resources: Option<RawResources>,
    #[serde(default)]
    networking: Option<RawNetworking>,
    #[serde(default)]
    volumes: Option<BTreeMap<String, RawVolumeSpec>>,
    #[serde(default)]
    environment: Option<Vec<RawEnvironmentSpec>>,
    #[serde(default)]
    security: Option<RawSecurity>,
    #[serde(default)]
    startup: Option<RawStartup>,
    #[serde(default)]
    vpn: Option<RawVpn>,
    #[serde(default)]
    backups: Option<Vec<Value>>,
    #[serde(default)]
    observability: Option<RawObservability>,
    /// forward-compatibility: unknown keys are preserved, not rejected
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawComponentMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

fn validate_component(
    path: &str,
    key: &str,
    raw: RawComponent,
    defaults: &AppDefaults,
) -> ManifoldResult<Component> {
    let metadata = raw.metadata.unwrap_or(RawComponentMetadata {
        name: None,
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
    });

    let networking = match raw.networking {
        Some(networking) => validate_networking(&format!("{path}.networking"), networking)?,
        None => Networking::default(),
    };

    let mut volumes = BTreeMap::new();
    for (id, spec) in raw.volumes.unwrap_or_default() {
        let volume_path = format!("{path}.volumes.{id}");
        volumes.insert(id, validate_volume(&volume_path, spec)?);
    }

    let mut environment = Vec::new();
    for (index, spec) in raw.environment.unwrap_or_default().into_iter().enumerate() {
        let env_path = format!("{path}.environment.{index}");
        environment.push(validate_environment(&env_path, spec)?);
    }

    let mut startup_tasks = Vec::new();
    let raw_tasks = raw.startup.and_then(|s| s.tasks).unwrap_or_default();
    for (index, task) in raw_tasks.into_iter().enumerate() {
        let task_path = format!("{path}.startup.tasks.{index}");
        startup_tasks.push(validate_startup_task(&task_path, task)?);
    }

    let vpn = raw
        .vpn
        .map(|vpn| validate_vpn(&format!("{path}.vpn"), vpn))
        .transpose()?;

    let mut backups = Vec::new();
    for (index, spec) in raw.backups.unwrap_or_default().into_iter().enumerate() {
        let backup_path = format!("{path}.backups.{index}");
        backups.push(validate_backup(&backup_path, spec, defaults)?);
    }

    let observability = raw
        .observability
        .map(|o| validate_observability(&format!("{path}.observability"), o))
        .transpose()?;

    Ok(Component {
        name: metadata.name.unwrap_or_else(|| key.to_string()),
        labels: metadata.labels,
        annotations: metadata.annotations,
        image: raw.image,
        command: raw.command.unwrap_or_default(),
        args: raw.args.unwrap_or_default(),
        resources: raw.resources.map(validate_resources),
        networking,
        volumes,
        environment,
        security: raw.security.map(validate_security),
        startup_tasks,
        vpn,
        backups,
        observability,
        extra: raw.extra,
    })
}

// ---------------------------------------------------------------------
// resources

#[derive(Debug, Deserialize)]
struct RawResources {
    #[serde(default)]
    requests: Option<RawResourceSpec>,
    #[serde(default)]
    limits: Option<RawResourceSpec>,
    #[serde(default)]
    gpu: Option<RawGpu>,
}

#[derive(Debug, Deserialize)]
struct RawResourceSpec {
    #[serde(default)]
    cpu: Option<String>,
    #[serde(default)]
    memory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGpu {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "RawGpu::resource_name")]
    resource_name: String,
    #[serde(default = "RawGpu::runtime_class")]
    runtime_class_name: String,
    #[serde(default)]
    use_limit: bool,
}

impl RawGpu {
    fn resource_name() -> String {
        "nvidia.com/gpu".to_string()
    }
    fn runtime_class() -> String {
        "nvidia".to_string()
    }
}

fn validate_resources(raw: RawResources) -> Resources {
    let gpu = raw.gpu.map_or(
        GpuConfig {
            enabled: false,
            resource_name: RawGpu::resource_name(),
            runtime_class_name: RawGpu::runtime_class(),
            use_limit: false,
        },
        |g| GpuConfig {
            enabled: g.enabled,
            resource_name: g.resource_name,
            runtime_class_name: g.runtime_class_name,
            use_limit: g.use_limit,
        },
    );
    Resources {
        requests: raw.requests.map(|r| ResourceSpec {
            cpu: r.cpu,
            memory: r.memory,
        }),
        limits: raw.limits.map(|r| ResourceSpec {
            cpu: r.cpu,
            memory: r.memory,
        }),
        gpu,
    }
}

// ---------------------------------------------------------------------
// networking

#[derive(Debug, Deserialize)]
struct RawNetworking {
    #[serde(default)]
    ports: Option<BTreeMap<String, RawPort>>,
    #[serde(default)]
    ingresses: Option<Vec<RawIngress>>,
    #[serde(default)]
    dependencies: Option<Vec<RawDependency>>,
    #[serde(default)]
    ip_bindings: Option<Vec<RawIpBinding>>,
    #[serde(default)]
    tunnel_routes: Option<Vec<RawTunnelRoute>>,
    #[serde(default)]
    tls: Option<RawTlsDefaults>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Config {
        port: u16,
        #[serde(default = "default_protocol")]
        protocol: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawIngress {
    #[serde(default = "default_true")]
    enabled: bool,
    host: String,
    port: String,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default)]
    tls: Option<RawIngressTls>,
    #[serde(default)]
    proxy_body_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIngressTls {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    secret: Option<StringOr<RawTlsSecretSource>>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    #[serde(default)]
    id: Option<String>,
    name: String,
    port: StringOrNumber,
    #[serde(default = "default_protocol")]
    protocol: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(i64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Text(t) => t,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawIpBinding {
    ip: String,
    ports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTunnelRoute {
    port: StringOrNumber,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    direct: bool,
    #[serde(default)]
    virtual_path: Option<String>,
    #[serde(default)]
    virtual_dest: Option<String>,
    #[serde(default)]
    max_body_size: Option<String>,
    #[serde(default)]
    connection_timeout: Option<String>,
}

fn validate_networking(path: &str, raw: RawNetworking) -> ManifoldResult<Networking> {
    let mut ports = BTreeMap::new();
    for (name, port) in raw.ports.unwrap_or_default() {
        let config = match port {
            RawPort::Number(port) => PortConfig {
                port,
                protocol: default_protocol(),
            },
            RawPort::Config { port, protocol } => PortConfig {
                port,
                protocol: protocol.to_uppercase(),
            },
        };
        ports.insert(name, config);
    }

    let mut ingresses = Vec::new();
    for (index, ingress) in raw.ingresses.unwrap_or_default().into_iter().enumerate() {
        let ingress_path = format!("{path}.ingresses.{index}");
        let tls = match ingress.tls {
            None => IngressTls::default(),
            Some(tls) => IngressTls {
                enabled: tls.enabled,
                host: tls.host,
                secret: tls
                    .secret
                    .map(|s| validate_secret_source(&format!("{ingress_path}.tls.secret"), s))
                    .transpose()?,
            },
        };
        ingresses.push(IngressSpec {
            enabled: ingress.enabled,
            host: ingress.host,
            port: ingress.port,
            protocol: ingress.protocol.to_uppercase(),
            tls,
            proxy_body_size: ingress.proxy_body_size,
        });
    }

    let mut dependencies = Vec::new();
    for dependency in raw.dependencies.unwrap_or_default() {
        let port = dependency.port.into_string();
        let id = dependency
            .id
            .clone()
            .unwrap_or_else(|| stable_id(&(&dependency.name, &port, &dependency.protocol)));
        dependencies.push(DependencySpec {
            id,
            name: dependency.name,
            port,
            protocol: dependency.protocol.to_uppercase(),
        });
    }

    let ip_bindings = raw
        .ip_bindings
        .unwrap_or_default()
        .into_iter()
        .map(|b| IpBinding {
            ip: b.ip,
            ports: b.ports,
        })
        .collect();

    let mut tunnel_routes = Vec::new();
    for (index, route) in raw.tunnel_routes.unwrap_or_default().into_iter().enumerate() {
        if !route.direct && route.host.is_none() {
            return Err(ManifoldError::validation(
                format!("{path}.tunnel_routes.{index}"),
                "host must be supplied when the route is not direct",
            ));
        }
        tunnel_routes.push(TunnelRoute {
            port: route.port.into_string(),
            host: route.host,
            direct: route.direct,
            virtual_path: route.virtual_path,
            virtual_dest: route.virtual_dest,
            max_body_size: route.max_body_size,
            connection_timeout: route.connection_timeout,
        });
    }

    let tls = raw
        .tls
        .map(|tls| validate_tls_defaults(&format!("{path}.tls"), tls))
        .transpose()?;

    Ok(Networking {
        ports,
        ingresses,
        dependencies,
        ip_bindings,
        tunnel_routes,
        tls,
    })
}

// ---------------------------------------------------------------------
// volumes

#[derive(Debug, Deserialize)]
struct RawVolumeSpec {
    src: RawVolumeSource,
    dest: RawVolumeDestination,
}

#[derive(Debug, Deserialize)]
struct RawVolumeSource {
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    secret: bool,
    #[serde(default)]
    pvc: Option<RawPvcSource>,
    #[serde(default)]
    host: Option<RawHostSource>,
    #[serde(default)]
    scratch: Option<RawSizedSource>,
    #[serde(default)]
    memory: Option<RawSizedSource>,
}

#[derive(Debug, Deserialize)]
struct RawPvcSource {
    #[serde(default)]
    storage_class: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHostSource {
    dir: String,
    #[serde(default = "default_true")]
    read_only: bool,
    #[serde(default)]
    create: bool,
}

#[derive(Debug, Deserialize)]
struct RawSizedSource {
    #[serde(default)]
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVolumeDestination {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    dir: Option<String>,
}

fn validate_volume(path: &str, raw: RawVolumeSpec) -> ManifoldResult<VolumeSpec> {
    let src = raw.src;
    exactly_one(
        &format!("{path}.src"),
        &[
            ("glob", src.glob.is_some()),
            ("dir", src.dir.is_some()),
            ("file", src.file.is_some()),
            ("data", src.data.is_some()),
            ("pvc", src.pvc.is_some()),
            ("host", src.host.is_some()),
            ("scratch", src.scratch.is_some()),
            ("memory", src.memory.is_some()),
        ],
    )?;
    let source = if let Some(glob) = src.glob {
        VolumeSource::Glob(glob)
    } else if let Some(dir) = src.dir {
        VolumeSource::Dir(dir)
    } else if let Some(file) = src.file {
        VolumeSource::File(file)
    } else if let Some(data) = src.data {
        VolumeSource::Data(data)
    } else if let Some(pvc) = src.pvc {
        VolumeSource::Pvc {
            storage_class: pvc.storage_class,
            size: pvc.size,
        }
    } else if let Some(host) = src.host {
        VolumeSource::Host {
            dir: host.dir,
            read_only: host.read_only,
            create: host.create,
        }
    } else if let Some(scratch) = src.scratch {
        VolumeSource::Scratch { size: scratch.size }
    } else if let Some(memory) = src.memory {
        VolumeSource::Memory { size: memory.size }
    } else {
        unreachable!("exactly_one guarantees a selected source")
    };

    let dest = validate_destination(&format!("{path}.dest"), raw.dest)?;

    if source.is_single() != dest.is_single() {
        return Err(ManifoldError::validation(
            path,
            "src and dest must either both be single or both be not single",
        ));
    }

    Ok(VolumeSpec {
        source,
        secret: src.secret,
        dest,
    })
}

fn validate_destination(
    path: &str,
    raw: RawVolumeDestination,
) -> ManifoldResult<VolumeDestination> {
    exactly_one(
        path,
        &[("file", raw.file.is_some()), ("dir", raw.dir.is_some())],
    )?;
    Ok(match (raw.file, raw.dir) {
        (Some(file), _) => VolumeDestination::File(file),
        (_, Some(dir)) => VolumeDestination::Dir(dir),
        _ => unreachable!("exactly_one guarantees a selected destination"),
    })
}

// ---------------------------------------------------------------------
// environment

#[derive(Debug, Deserialize)]
struct RawEnvironmentSpec {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    secret: bool,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    raw: Option<BTreeMap<String, Value>>,
}

fn validate_environment(path: &str, raw: RawEnvironmentSpec) -> ManifoldResult<EnvironmentSpec> {
    exactly_one(
        path,
        &[("file", raw.file.is_some()), ("raw", raw.raw.is_some())],
    )?;
    let source = match (raw.file, raw.raw) {
        (Some(file), _) => EnvSource::File(file),
        (_, Some(map)) => {
            let mut values = BTreeMap::new();
            for (key, value) in map {
                let text = match value {
                    Value::Null => String::new(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s,
                    other => {
                        return Err(ManifoldError::validation(
                            format!("{path}.raw.{key}"),
                            format!(
                                "environment values must be scalars, found a {}",
                                if other.is_sequence() { "sequence" } else { "mapping" }
                            ),
                        ))
                    }
                };
                values.insert(key, text);
            }
            EnvSource::Inline(values)
        }
        _ => unreachable!("exactly_one guarantees a selected source"),
    };
    let id = raw.id.unwrap_or_else(|| match &source {
        EnvSource::Inline(values) => stable_id(values),
        EnvSource::File(file) => stable_id(file),
    });
    Ok(EnvironmentSpec {
        id,
        secret: raw.secret,
        source,
    })
}

// ---------------------------------------------------------------------
// security

#[derive(Debug, Deserialize)]
struct RawSecurity {
    #[serde(default)]
    cap: Option<RawCapabilities>,
    #[serde(default)]
    sysctls: Option<Vec<String>>,
    #[serde(default)]
    groups: Option<RawGroups>,
    #[serde(default)]
    uid: Option<i64>,
    #[serde(default)]
    gid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawCapabilities {
    #[serde(default)]
    add: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawGroups {
    #[serde(default)]
    add: Option<Vec<i64>>,
}

fn validate_security(raw: RawSecurity) -> Security {
    Security {
        capabilities: raw.cap.and_then(|c| c.add).unwrap_or_default(),
        sysctls: raw.sysctls.unwrap_or_default(),
        uid: raw.uid,
        gid: raw.gid,
        supplemental_groups: raw.groups.and_then(|g| g.add).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------
// startup

#[derive(Debug, Deserialize)]
struct RawStartup {
    #[serde(default)]
    tasks: Option<Vec<RawStartupTask>>,
}

#[derive(Debug, Deserialize)]
struct RawStartupTask {
    #[serde(default)]
    chown: Option<RawFileAttrTask>,
    #[serde(default)]
    chmod: Option<RawFileAttrTask>,
    #[serde(default)]
    chgrp: Option<RawFileAttrTask>,
    #[serde(default)]
    render: Option<RawRenderTask>,
    #[serde(default)]
    script: Option<RawScriptTask>,
}

#[derive(Debug, Deserialize)]
struct RawFileAttrTask {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    paths: Option<Vec<String>>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    group: Option<StringOrNumber>,
    #[serde(default)]
    recursive: bool,
}

impl RawFileAttrTask {
    /// Join the `path` shorthand and the `paths` list; at least one
    /// path is required.
    fn all_paths(&self, path: &str) -> ManifoldResult<Vec<String>> {
        let mut out = Vec::new();
        if let Some(single) = &self.path {
            out.push(single.clone());
        }
        out.extend(self.paths.clone().unwrap_or_default());
        if out.is_empty() {
            return Err(ManifoldError::validation(
                path,
                "at least one path must be specified",
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct RawRenderTask {
    input: RawRenderSelector,
    output: RawRenderSelector,
    #[serde(default)]
    extra_args: Option<Vec<String>>,
    #[serde(default)]
    data_sources: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawRenderSelector {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    exclude: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScriptTask {
    script: String,
}

fn validate_startup_task(path: &str, raw: RawStartupTask) -> ManifoldResult<StartupTask> {
    exactly_one(
        path,
        &[
            ("chown", raw.chown.is_some()),
            ("chmod", raw.chmod.is_some()),
            ("chgrp", raw.chgrp.is_some()),
            ("render", raw.render.is_some()),
            ("script", raw.script.is_some()),
        ],
    )?;

    if let Some(task) = raw.chown {
        let owner = task.owner.clone().ok_or_else(|| {
            ManifoldError::validation(format!("{path}.chown.owner"), "owner is required")
        })?;
        return Ok(StartupTask::Chown {
            paths: task.all_paths(&format!("{path}.chown"))?,
            owner,
            recursive: task.recursive,
        });
    }
    if let Some(task) = raw.chmod {
        let mode = task.mode.clone().ok_or_else(|| {
            ManifoldError::validation(format!("{path}.chmod.mode"), "mode is required")
        })?;
        return Ok(StartupTask::Chmod {
            paths: task.all_paths(&format!("{path}.chmod"))?,
            mode,
            recursive: task.recursive,
        });
    }
    if let Some(task) = raw.chgrp {
        let group = match &task.group {
            Some(StringOrNumber::Text(t)) => t.clone(),
            Some(StringOrNumber::Number(n)) => n.to_string(),
            None => {
                return Err(ManifoldError::validation(
                    format!("{path}.chgrp.group"),
                    "group is required",
                ))
            }
        };
        return Ok(StartupTask::Chgrp {
            paths: task.all_paths(&format!("{path}.chgrp"))?,
            group,
            recursive: task.recursive,
        });
    }
    if let Some(task) = raw.render {
        let input = validate_render_selector(&format!("{path}.render.input"), task.input)?;
        let output = validate_render_selector(&format!("{path}.render.output"), task.output)?;
        return Ok(StartupTask::Render {
            input,
            output,
            extra_args: task.extra_args.unwrap_or_default(),
            data_sources: task.data_sources.unwrap_or_default(),
        });
    }
    if let Some(task) = raw.script {
        return Ok(StartupTask::Script {
            script: task.script,
        });
    }
    unreachable!("exactly_one guarantees a selected task kind")
}

fn validate_render_selector(
    path: &str,
    raw: RawRenderSelector,
) -> ManifoldResult<RenderSelector> {
    exactly_one(
        path,
        &[
            ("file", raw.file.is_some()),
            ("files", raw.files.is_some()),
            ("dir", raw.dir.is_some()),
        ],
    )?;
    Ok(match (raw.file, raw.files, raw.dir) {
        (Some(file), _, _) => RenderSelector::File(file),
        (_, Some(files), _) => RenderSelector::Files(files),
        (_, _, Some(dir)) => RenderSelector::Dir {
            dir,
            exclude: raw.exclude,
        },
        _ => unreachable!("exactly_one guarantees a selected selector"),
    })
}

// ---------------------------------------------------------------------
// vpn sidecar

#[derive(Debug, Deserialize)]
struct RawVpn {
    provider: String,
    #[serde(default)]
    wireguard: Option<RawWireguard>,
    #[serde(default)]
    server_countries: Option<Vec<String>>,
    #[serde(default)]
    port_forward_only: bool,
    #[serde(default)]
    dns_over_tls: bool,
}

#[derive(Debug, Deserialize)]
struct RawWireguard {
    private_key: String,
}

fn validate_vpn(path: &str, raw: RawVpn) -> ManifoldResult<VpnSidecar> {
    exactly_one(path, &[("wireguard", raw.wireguard.is_some())])?;
    let wireguard = raw
        .wireguard
        .expect("exactly_one guarantees the tunnel config");
    Ok(VpnSidecar {
        provider: raw.provider,
        tunnel: VpnTunnel::Wireguard {
            private_key: wireguard.private_key,
        },
        server_countries: raw.server_countries.unwrap_or_default(),
        port_forward_only: raw.port_forward_only,
        dns_over_tls: raw.dns_over_tls,
    })
}

// ---------------------------------------------------------------------
// backups

#[derive(Debug, Deserialize)]
struct RawBackupSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    repository_configs: Option<Vec<RawRepositoryConfig>>,
    #[serde(default)]
    volumes: Option<Vec<RawBackupVolume>>,
    #[serde(default)]
    source: Option<RawBackupSource>,
    #[serde(default)]
    scale_down: Option<bool>,
    #[serde(default)]
    overlays: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepositoryConfig {
    #[serde(default)]
    config_map: Option<RawValueRef>,
    #[serde(default)]
    secret: Option<RawValueRef>,
    #[serde(default)]
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawValueRef {
    namespace: String,
    name: String,
    key: String,
}

impl RawValueRef {
    fn into_ref(self) -> ValueRef {
        ValueRef {
            namespace: self.namespace,
            name: self.name,
            key: self.key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBackupVolume {
    #[serde(default)]
    secret: Option<RawValueRef>,
    dest: RawVolumeDestination,
}

#[derive(Debug, Deserialize)]
struct RawBackupSource {
    #[serde(default)]
    volumes: Option<BTreeMap<String, Vec<String>>>,
}

/// Resolve overlay presets, then parse and validate the merged spec.
/// Overlays merge in listed order; the spec's own explicit fields win,
/// and optional fields left null never erase an inherited value.
fn validate_backup(
    path: &str,
    raw: Value,
    defaults: &AppDefaults,
) -> ManifoldResult<BackupSpec> {
    let overlay_names: Vec<String> = raw
        .get("overlays")
        .map(|v| {
            serde_yaml_ng::from_value(v.clone()).map_err(|e| {
                ManifoldError::validation(format!("{path}.overlays"), e.to_string())
            })
        })
        .transpose()?
        .unwrap_or_default();

    let mut merged = Value::Mapping(serde_yaml_ng::Mapping::new());
    for name in &overlay_names {
        let overlay = defaults.backup_overlays.get(name).ok_or_else(|| {
            ManifoldError::validation(
                format!("{path}.overlays"),
                format!("unknown backup overlay '{name}'"),
            )
        })?;
        merged = deep_merge(&merged, overlay, MergePolicy::PreferNew, false)?;
    }
    merged = deep_merge(&merged, &raw, MergePolicy::PreferNew, false)?;

    let spec: RawBackupSpec = serde_yaml_ng::from_value(merged)
        .map_err(|e| ManifoldError::validation(path, e.to_string()))?;

    let name = spec.name.ok_or_else(|| {
        ManifoldError::validation(format!("{path}.name"), "name is required")
    })?;

    let mut repository_configs = Vec::new();
    for (index, config) in spec.repository_configs.unwrap_or_default().into_iter().enumerate() {
        let config_path = format!("{path}.repository_configs.{index}");
        exactly_one(
            &config_path,
            &[
                ("config_map", config.config_map.is_some()),
                ("secret", config.secret.is_some()),
                ("raw", config.raw.is_some()),
            ],
        )?;
        let validated = if let Some(reference) = config.config_map {
            RepositoryConfig::ConfigMapRef(reference.into_ref())
        } else if let Some(reference) = config.secret {
            RepositoryConfig::SecretRef(reference.into_ref())
        } else if let Some(inline) = config.raw {
            RepositoryConfig::Inline(inline)
        } else {
            unreachable!("exactly_one guarantees a selected config")
        };
        repository_configs.push(validated);
    }

    let mut volumes = Vec::new();
    for (index, volume) in spec.volumes.unwrap_or_default().into_iter().enumerate() {
        let volume_path = format!("{path}.volumes.{index}");
        exactly_one(&volume_path, &[("secret", volume.secret.is_some())])?;
        let dest = validate_destination(&format!("{volume_path}.dest"), volume.dest)?;
        volumes.push(BackupVolume {
            secret: volume
                .secret
                .expect("exactly_one guarantees the secret reference")
                .into_ref(),
            dest,
        });
    }

    Ok(BackupSpec {
        name,
        schedule: spec.schedule,
        repository_configs,
        volumes,
        source_volumes: spec.source.and_then(|s| s.volumes).unwrap_or_default(),
        scale_down: spec.scale_down.unwrap_or(false),
    })
}

// ---------------------------------------------------------------------
// observability

#[derive(Debug, Deserialize)]
struct RawObservability {
    #[serde(default)]
    logs: Option<RawLogShipping>,
    #[serde(default)]
    probes: Option<BTreeMap<String, RawProbe>>,
}

#[derive(Debug, Deserialize)]
struct RawLogShipping {
    #[serde(default)]
    process: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    http_get: Option<RawHttpGet>,
    #[serde(default = "RawProbe::module")]
    module: String,
}

impl RawProbe {
    fn module() -> String {
        "http_2xx".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct RawHttpGet {
    port: String,
    #[serde(default = "RawHttpGet::root")]
    path: String,
}

impl RawHttpGet {
    fn root() -> String {
        "/".to_string()
    }
}

fn validate_observability(path: &str, raw: RawObservability) -> ManifoldResult<Observability> {
    let mut probes = BTreeMap::new();
    for (name, probe) in raw.probes.unwrap_or_default() {
        let probe_path = format!("{path}.probes.{name}");
        exactly_one(&probe_path, &[("http_get", probe.http_get.is_some())])?;
        let http_get = probe
            .http_get
            .expect("exactly_one guarantees the probe target");
        probes.insert(
            name,
            ProbeSpec {
                target: ProbeTarget::HttpGet {
                    port: http_get.port,
                    path: http_get.path,
                },
                module: probe.module,
            },
        );
    }
    Ok(Observability {
        logs: raw.logs.map(|l| LogShipping { process: l.process }),
        probes,
    })
}
