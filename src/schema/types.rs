//! Validated application definition
//!
//! The types synthesis consumes. Tagged-union configuration fields are
//! real sum types here - zero-or-many-selected states are rejected
//! during validation and cannot be represented downstream.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml_ng::Value;

/// A fully-validated application definition
#[derive(Debug, Clone, PartialEq)]
pub struct AppDefinition {
    pub metadata: AppMetadata,
    pub defaults: AppDefaults,
    pub components: BTreeMap<String, Component>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppMetadata {
    pub name: String,
    pub namespace: String,
    pub project: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// App-level defaults threaded into synthesis (no hidden global state)
#[derive(Debug, Clone, PartialEq)]
pub struct AppDefaults {
    pub images: HelperImages,
    pub pvc: Option<PvcDefaults>,
    pub tls: Option<TlsDefaults>,
    pub backup_overlays: BTreeMap<String, Value>,
}

/// Images for generated helper containers
#[derive(Debug, Clone, PartialEq)]
pub struct HelperImages {
    pub startup_shell: String,
    pub startup_chown: String,
    pub startup_chmod: String,
    pub startup_chgrp: String,
    pub startup_render: String,
    pub backup_job: String,
    pub vpn: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PvcDefaults {
    pub storage_class: Option<String>,
    pub size: Option<String>,
}

/// App- or component-level TLS defaults for the ingress secret chain
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TlsDefaults {
    pub host: Option<TlsDefaultHost>,
    pub secret: Option<TlsDefaultSecret>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TlsDefaultHost {
    /// A literal certificate host
    Literal(String),
    /// Derive `*.parent` from the ingress host
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TlsDefaultSecret {
    pub source: Option<TlsSecretSource>,
    /// Exact-host overrides, checked before the default source
    pub from_host: Vec<TlsHostOverride>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsHostOverride {
    pub host: String,
    pub value: TlsSecretSource,
}

/// How an ingress TLS secret comes to exist
#[derive(Debug, Clone, PartialEq)]
pub enum TlsSecretSource {
    /// An existing secret, referenced by name
    Name(String),
    /// Created by the certificate controller
    Create,
    /// Mirrored from `namespace/name` by the secret-mirroring controller
    Mirror(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub resources: Option<Resources>,
    pub networking: Networking,
    pub volumes: BTreeMap<String, VolumeSpec>,
    pub environment: Vec<EnvironmentSpec>,
    pub security: Option<Security>,
    pub startup_tasks: Vec<StartupTask>,
    pub vpn: Option<VpnSidecar>,
    pub backups: Vec<BackupSpec>,
    pub observability: Option<Observability>,
    /// Unknown fields, preserved for forward compatibility but never
    /// interpreted
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resources {
    pub requests: Option<ResourceSpec>,
    pub limits: Option<ResourceSpec>,
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpuConfig {
    pub enabled: bool,
    pub resource_name: String,
    pub runtime_class_name: String,
    pub use_limit: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Networking {
    pub ports: BTreeMap<String, PortConfig>,
    pub ingresses: Vec<IngressSpec>,
    pub dependencies: Vec<DependencySpec>,
    pub ip_bindings: Vec<IpBinding>,
    pub tunnel_routes: Vec<TunnelRoute>,
    /// Component-level TLS defaults, consulted between an ingress's own
    /// TLS block and the app-level default chain
    pub tls: Option<TlsDefaults>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressSpec {
    pub enabled: bool,
    pub host: String,
    pub port: String,
    pub protocol: String,
    pub tls: IngressTls,
    pub proxy_body_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressTls {
    pub enabled: bool,
    pub host: Option<String>,
    pub secret: Option<TlsSecretSource>,
}

impl Default for IngressTls {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            secret: None,
        }
    }
}

/// An explicit network dependency: this component may reach `name`
#[derive(Debug, Clone, PartialEq)]
pub struct DependencySpec {
    /// Stable discriminator for the generated policy name
    pub id: String,
    /// `component`, `app/component` or `namespace/app/component`
    pub name: String,
    pub port: String,
    pub protocol: String,
}

/// A static load-balancer address bound to named ports
#[derive(Debug, Clone, PartialEq)]
pub struct IpBinding {
    pub ip: String,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelRoute {
    pub port: String,
    pub host: Option<String>,
    /// Direct routes only open the network path; no route resource
    pub direct: bool,
    pub virtual_path: Option<String>,
    pub virtual_dest: Option<String>,
    pub max_body_size: Option<String>,
    pub connection_timeout: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub source: VolumeSource,
    /// Materialize file-like sources as a Secret instead of a ConfigMap
    pub secret: bool,
    pub dest: VolumeDestination,
}

impl VolumeSpec {
    pub fn is_single(&self) -> bool {
        self.source.is_single()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSource {
    /// Staged files matching a glob
    Glob(String),
    /// A staged directory
    Dir(String),
    /// One staged file
    File(String),
    /// Inline file content
    Data(String),
    /// A persistent volume claim
    Pvc {
        storage_class: Option<String>,
        size: Option<String>,
    },
    /// A host path
    Host {
        dir: String,
        read_only: bool,
        create: bool,
    },
    /// Node-local scratch space
    Scratch { size: Option<String> },
    /// Memory-backed scratch space
    Memory { size: Option<String> },
}

impl VolumeSource {
    /// Single sources produce exactly one file and must pair with a
    /// single (file path) destination
    pub fn is_single(&self) -> bool {
        matches!(self, Self::File(_) | Self::Data(_))
    }

    /// Human-readable discriminator used in generated resource names
    pub fn human_name(&self) -> &str {
        match self {
            Self::Glob(s) | Self::Dir(s) | Self::File(s) | Self::Data(s) => s,
            Self::Pvc { .. } => "pvc",
            Self::Host { dir, .. } => dir,
            Self::Scratch { .. } => "scratch",
            Self::Memory { .. } => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VolumeDestination {
    File(String),
    Dir(String),
}

impl VolumeDestination {
    pub fn is_single(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File(p) | Self::Dir(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    /// Stable discriminator for the generated object name
    pub id: String,
    pub secret: bool,
    pub source: EnvSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvSource {
    Inline(BTreeMap<String, String>),
    File(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Security {
    pub capabilities: Vec<String>,
    pub sysctls: Vec<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub supplemental_groups: Vec<i64>,
}

/// One ordered init step
#[derive(Debug, Clone, PartialEq)]
pub enum StartupTask {
    Chown {
        paths: Vec<String>,
        owner: String,
        recursive: bool,
    },
    Chmod {
        paths: Vec<String>,
        mode: String,
        recursive: bool,
    },
    Chgrp {
        paths: Vec<String>,
        group: String,
        recursive: bool,
    },
    Render {
        input: RenderSelector,
        output: RenderSelector,
        extra_args: Vec<String>,
        data_sources: BTreeMap<String, String>,
    },
    Script {
        script: String,
    },
}

impl StartupTask {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chown { .. } => "chown",
            Self::Chmod { .. } => "chmod",
            Self::Chgrp { .. } => "chgrp",
            Self::Render { .. } => "render",
            Self::Script { .. } => "script",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderSelector {
    File(String),
    Files(Vec<String>),
    Dir { dir: String, exclude: Option<String> },
}

/// VPN sidecar sharing the workload pod
#[derive(Debug, Clone, PartialEq)]
pub struct VpnSidecar {
    pub provider: String,
    pub tunnel: VpnTunnel,
    pub server_countries: Vec<String>,
    pub port_forward_only: bool,
    pub dns_over_tls: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VpnTunnel {
    Wireguard { private_key: String },
}

/// A scheduled or one-shot backup of component volumes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSpec {
    pub name: String,
    pub schedule: Option<String>,
    pub repository_configs: Vec<RepositoryConfig>,
    /// Extra secret-backed files mounted into the backup job
    pub volumes: Vec<BackupVolume>,
    /// Component volume id -> subpaths to back up
    pub source_volumes: BTreeMap<String, Vec<String>>,
    pub scale_down: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RepositoryConfig {
    Inline(String),
    SecretRef(ValueRef),
    ConfigMapRef(ValueRef),
}

/// A `namespace/name#key` reference into an existing object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupVolume {
    pub secret: ValueRef,
    pub dest: VolumeDestination,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observability {
    pub logs: Option<LogShipping>,
    pub probes: BTreeMap<String, ProbeSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogShipping {
    /// Optional processing stage appended to the shipping pipeline
    pub process: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSpec {
    pub target: ProbeTarget,
    pub module: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeTarget {
    HttpGet { port: String, path: String },
}
