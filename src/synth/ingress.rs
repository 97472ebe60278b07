//! Ingress sub-generator
//!
//! Per enabled ingress rule: one Ingress routing the host to the
//! component's named-port service, TLS resolved through the default
//! chain, and one NetworkPolicy admitting the ingress controller's
//! namespace on the rule's port.
//!
//! TLS secret resolution order:
//! 1. the ingress's own explicit host/secret,
//! 2. the component-networking defaults,
//! 3. the app-level default chain - a literal secret name, `create`
//!    (certificate controller), `mirror` (secret-mirroring controller),
//!    or a per-host override list matched by exact host string.
//!
//! The first fully-specified triple wins; an enabled TLS block that
//! resolves nothing is a fatal synthesis error naming the ingress.

use crate::error::{ManifoldError, ManifoldResult};
use crate::manifest::{
    HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec as IngressManifestSpec, IngressTlsBlock, IntOrString,
    LabelSelector, NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec, ObjectMeta, Resource, Secret, ServiceBackendPort,
};
use crate::schema::{
    IngressSpec, TlsDefaultHost, TlsDefaults, TlsSecretSource,
};

use super::naming::coerce_dns_name;
use super::service::{service_name, SERVICE_PORT};
use super::ComponentContext;

/// Class name of the cluster's ingress controller
const INGRESS_CLASS: &str = "nginx";
/// Namespace-identity label of the ingress controller's namespace
const INGRESS_CONTROLLER_LABEL: (&str, &str) = ("app.kubernetes.io/name", "ingress-nginx");
/// Annotation asking the certificate controller to issue the secret
const ISSUER_ANNOTATION: (&str, &str) = ("cert-manager.io/cluster-issuer", "letsencrypt-prod");
/// Annotations asking the mirroring controller to populate a secret
const MIRROR_SOURCE_ANNOTATION: &str = "reflector.v1.k8s.emberstack.com/reflects";
const MIRROR_VERSION_ANNOTATION: &str = "reflector.v1.k8s.emberstack.com/reflected-version";

pub fn generate(ctx: &ComponentContext) -> ManifoldResult<Vec<Resource>> {
    let mut resources = Vec::new();

    for spec in &ctx.component.networking.ingresses {
        if !spec.enabled {
            continue;
        }

        let ingress_name = ctx.prefixed(&coerce_dns_name(&spec.host));
        let mut annotations = ctx.annotations.clone();
        if let Some(size) = &spec.proxy_body_size {
            annotations.insert(
                "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
                size.clone(),
            );
        }

        let mut tls_blocks = Vec::new();
        if spec.tls.enabled {
            let resolution = resolve_tls(ctx, spec, &ingress_name)?;
            if resolution.create {
                annotations.insert(
                    ISSUER_ANNOTATION.0.to_string(),
                    ISSUER_ANNOTATION.1.to_string(),
                );
            }
            if let Some(source) = &resolution.mirror_source {
                resources.push(mirror_placeholder(ctx, &resolution.secret_name, source));
            }
            tls_blocks.push(IngressTlsBlock {
                hosts: vec![resolution.host],
                secret_name: resolution.secret_name,
            });
        }

        let ingress = Ingress::new(
            ObjectMeta {
                name: ingress_name,
                namespace: Some(ctx.namespace().to_string()),
                labels: ctx.labels.clone(),
                annotations,
            },
            IngressManifestSpec {
                ingress_class_name: Some(INGRESS_CLASS.to_string()),
                rules: vec![IngressRule {
                    host: spec.host.clone(),
                    http: HttpIngressRuleValue {
                        paths: vec![HttpIngressPath {
                            path: "/".to_string(),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: IngressServiceBackend {
                                    name: service_name(
                                        &ctx.app.metadata.name,
                                        &ctx.component.name,
                                        &spec.port,
                                    ),
                                    port: ServiceBackendPort {
                                        number: SERVICE_PORT,
                                    },
                                },
                            },
                        }],
                    },
                }],
                tls: tls_blocks,
            },
        );

        let policy = NetworkPolicy::new(
            ctx.meta(ctx.prefixed(&format!(
                "ingress-{}-{}",
                coerce_dns_name(&spec.host),
                spec.port
            ))),
            NetworkPolicySpec {
                pod_selector: ctx.selector(),
                policy_types: vec!["Ingress".to_string()],
                ingress: vec![NetworkPolicyIngressRule {
                    from: vec![NetworkPolicyPeer {
                        namespace_selector: Some(LabelSelector {
                            match_labels: [(
                                INGRESS_CONTROLLER_LABEL.0.to_string(),
                                INGRESS_CONTROLLER_LABEL.1.to_string(),
                            )]
                            .into_iter()
                            .collect(),
                        }),
                        ..NetworkPolicyPeer::default()
                    }],
                    ports: vec![NetworkPolicyPort {
                        protocol: spec.protocol.clone(),
                        port: IntOrString::Name(spec.port.clone()),
                    }],
                }],
            },
        );

        resources.push(Resource::Ingress(ingress));
        resources.push(Resource::NetworkPolicy(policy));
    }

    Ok(resources)
}

struct TlsResolution {
    host: String,
    secret_name: String,
    create: bool,
    mirror_source: Option<String>,
}

fn resolve_tls(
    ctx: &ComponentContext,
    spec: &IngressSpec,
    ingress_name: &str,
) -> ManifoldResult<TlsResolution> {
    let component_tls = ctx.component.networking.tls.as_ref();
    let app_tls = ctx.app.defaults.tls.as_ref();

    let host = resolve_tls_host(spec, component_tls, app_tls)?;
    let default_secret_name = format!("{ingress_name}-tls");

    // the ingress's own secret wins outright
    if let Some(source) = &spec.tls.secret {
        return Ok(apply_source(source, &default_secret_name, host));
    }

    // then the component-level, then the app-level default chain
    for defaults in [component_tls, app_tls].into_iter().flatten() {
        if let Some(secret) = &defaults.secret {
            if let Some(source) = &secret.source {
                return Ok(apply_source(source, &default_secret_name, host));
            }
            for entry in &secret.from_host {
                if entry.host == host {
                    return Ok(apply_source(&entry.value, &default_secret_name, host));
                }
            }
        }
    }

    Err(ManifoldError::synthesis(format!(
        "ingress '{}' (host {}) has TLS enabled but no secret could be resolved \
         from the ingress, component or app-level defaults",
        ingress_name, spec.host
    )))
}

fn resolve_tls_host(
    spec: &IngressSpec,
    component_tls: Option<&TlsDefaults>,
    app_tls: Option<&TlsDefaults>,
) -> ManifoldResult<String> {
    if let Some(host) = &spec.tls.host {
        return Ok(host.clone());
    }
    for defaults in [component_tls, app_tls].into_iter().flatten() {
        match &defaults.host {
            Some(TlsDefaultHost::Literal(host)) => return Ok(host.clone()),
            Some(TlsDefaultHost::Wildcard) => {
                let (_, parent) = spec.host.split_once('.').ok_or_else(|| {
                    ManifoldError::synthesis(format!(
                        "cannot derive a wildcard certificate host: ingress host '{}' has no parent domain",
                        spec.host
                    ))
                })?;
                return Ok(format!("*.{parent}"));
            }
            None => {}
        }
    }
    // no defaults configured: the certificate host is the ingress host
    Ok(spec.host.clone())
}

fn apply_source(source: &TlsSecretSource, default_secret_name: &str, host: String) -> TlsResolution {
    match source {
        TlsSecretSource::Name(name) => TlsResolution {
            host,
            secret_name: name.clone(),
            create: false,
            mirror_source: None,
        },
        TlsSecretSource::Create => TlsResolution {
            host,
            secret_name: default_secret_name.to_string(),
            create: true,
            mirror_source: None,
        },
        TlsSecretSource::Mirror(from) => TlsResolution {
            host,
            secret_name: default_secret_name.to_string(),
            create: false,
            mirror_source: Some(from.clone()),
        },
    }
}

/// Placeholder TLS secret for the mirroring controller to populate
fn mirror_placeholder(ctx: &ComponentContext, secret_name: &str, source: &str) -> Resource {
    let mut secret = Secret::tls_placeholder(ObjectMeta {
        name: secret_name.to_string(),
        namespace: Some(ctx.namespace().to_string()),
        labels: ctx.labels.clone(),
        annotations: [
            (MIRROR_SOURCE_ANNOTATION.to_string(), source.to_string()),
            (MIRROR_VERSION_ANNOTATION.to_string(), String::new()),
        ]
        .into_iter()
        .collect(),
    });
    secret.string_data = None;
    Resource::Secret(secret)
}
