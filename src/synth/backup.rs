//! Backup sub-generator
//!
//! Each backup spec becomes a BackupRun custom resource describing the
//! run's repositories and sources, a dedicated ServiceAccount, and a
//! CronJob (scheduled) or TTL'd one-shot Job executing it. Source
//! volumes are cloned from the workload pod and the job is pinned to
//! the workload's node so single-attach claims stay mountable;
//! cross-namespace secret files arrive through mirrored Secrets.

use serde_yaml_ng::{Mapping, Value};

use crate::error::{ManifoldError, ManifoldResult};
use crate::manifest::{
    Affinity, Container, CronJob, CronJobSpec, Deployment, EnvVar, Job, JobSpec, JobTemplateSpec,
    KeyToPath, ObjectMeta, PodAffinity, PodAffinityTerm, PodSpec, PodTemplateSpec, PodVolume,
    Resource, Secret, SecretVolumeSource, ServiceAccount, VolumeMount,
};
use crate::schema::{RepositoryConfig, ValueRef, VolumeDestination};

use super::naming::{coerce_dns_name, config_key, stable_id};
use super::ComponentContext;

/// Annotations asking the mirroring controller to populate a secret
const MIRROR_SOURCE_ANNOTATION: &str = "reflector.v1.k8s.emberstack.com/reflects";
const MIRROR_VERSION_ANNOTATION: &str = "reflector.v1.k8s.emberstack.com/reflected-version";

/// Where cloned source volumes are mounted inside the backup job
const SOURCE_MOUNT_ROOT: &str = "/mnt/src";

/// Finished one-shot jobs are kept around this long
const JOB_TTL_SECONDS: i64 = 3600;

pub fn generate(
    ctx: &ComponentContext,
    deployment: &Deployment,
    component_volumes: &[PodVolume],
) -> ManifoldResult<Vec<Resource>> {
    let mut resources = Vec::new();

    for spec in &ctx.component.backups {
        let run_name = format!(
            "{}-{}-{}",
            ctx.component.name,
            spec.name,
            stable_id(spec)
        );
        let job_name = format!("backup-{run_name}");

        let repository_configs: Vec<Value> = spec
            .repository_configs
            .iter()
            .map(repository_config_value)
            .collect();

        let mut pod = PodSpec {
            service_account_name: Some(job_name.clone()),
            restart_policy: Some("OnFailure".to_string()),
            containers: vec![Container {
                name: "primary".to_string(),
                image: ctx.app.defaults.images.backup_job.clone(),
                env: vec![
                    EnvVar {
                        name: "BACKUP_RUN_NAME".to_string(),
                        value: run_name.clone(),
                    },
                    EnvVar {
                        name: "BACKUP_RUN_NAMESPACE".to_string(),
                        value: ctx.namespace().to_string(),
                    },
                    EnvVar {
                        name: "BACKUP_RUN_MODE".to_string(),
                        value: "backup".to_string(),
                    },
                ],
                ..Container::default()
            }],
            ..PodSpec::default()
        };

        // extra secret-backed files, mirrored into this namespace
        for volume in &spec.volumes {
            resources.push(mirrored_secret(ctx, &volume.secret));
            mount_mirrored_file(volume.secret.clone(), &volume.dest, &mut pod)?;
        }

        // cloned source volumes, with the raw repository description
        let mut source_config = None;
        if !spec.source_volumes.is_empty() {
            let mut raw_config = String::from("type: local\npaths:\n");
            for (volume_id, sub_paths) in &spec.source_volumes {
                let base_path = format!("{SOURCE_MOUNT_ROOT}/{}", config_key(volume_id));
                for sub_path in sub_paths {
                    raw_config.push_str(&format!("  - {base_path}{sub_path}\n"));
                }

                let volume_name = coerce_dns_name(volume_id);
                let cloned = component_volumes
                    .iter()
                    .find(|v| v.name == volume_name)
                    .cloned()
                    .ok_or_else(|| {
                        ManifoldError::synthesis(format!(
                            "backup '{}' references volume '{volume_id}' which does not exist on component '{}'",
                            spec.name, ctx.component.name
                        ))
                    })?;
                pod.volumes.push(cloned);
                pod.containers[0].volume_mounts.push(VolumeMount {
                    name: volume_name,
                    mount_path: base_path,
                    sub_path: None,
                    read_only: false,
                });
            }

            // share the workload's node so single-attach claims mount
            pod.affinity = Some(Affinity {
                pod_affinity: Some(PodAffinity {
                    required_during_scheduling_ignored_during_execution: vec![PodAffinityTerm {
                        label_selector: deployment.spec.selector.clone(),
                        topology_key: "kubernetes.io/hostname".to_string(),
                    }],
                }),
            });

            let mut config = Mapping::new();
            config.insert(text("raw"), text(&raw_config));
            source_config = Some(Value::Mapping(config));
        }
        // the run description itself
        let mut run_spec = Mapping::new();
        run_spec.insert(text("name"), text(&spec.name));
        run_spec.insert(
            text("repositoryConfigs"),
            Value::Sequence(repository_configs),
        );
        if let Some(source_config) = source_config {
            run_spec.insert(text("sourceConfig"), source_config);
        }
        if spec.scale_down {
            let mut target = Mapping::new();
            target.insert(text("name"), text(&deployment.metadata.name));
            target.insert(
                text("namespace"),
                text(deployment.metadata.namespace.as_deref().unwrap_or_default()),
            );
            run_spec.insert(
                text("scaleDownDeployments"),
                Value::Sequence(vec![Value::Mapping(target)]),
            );
        }

        let job_spec = JobSpec {
            ttl_seconds_after_finished: None,
            template: PodTemplateSpec {
                metadata: ObjectMeta::named(&job_name),
                spec: pod,
            },
        };

        if let Some(schedule) = &spec.schedule {
            resources.push(Resource::CronJob(CronJob::new(
                ObjectMeta {
                    name: job_name.clone(),
                    namespace: Some(ctx.namespace().to_string()),
                    ..ObjectMeta::default()
                },
                CronJobSpec {
                    schedule: schedule.clone(),
                    concurrency_policy: "Forbid".to_string(),
                    successful_jobs_history_limit: 3,
                    failed_jobs_history_limit: 1,
                    job_template: JobTemplateSpec { spec: job_spec },
                },
            )));
        } else {
            let mut one_shot = job_spec;
            one_shot.ttl_seconds_after_finished = Some(JOB_TTL_SECONDS);
            resources.push(Resource::Job(Job::new(
                ObjectMeta {
                    name: job_name.clone(),
                    namespace: Some(ctx.namespace().to_string()),
                    ..ObjectMeta::default()
                },
                one_shot,
            )));
        }

        resources.push(Resource::Custom(crate::manifest::CustomResource {
            api_version: "backup.manifold.dev/v1".to_string(),
            kind: "BackupRun".to_string(),
            metadata: ObjectMeta {
                name: run_name,
                namespace: Some(ctx.namespace().to_string()),
                ..ObjectMeta::default()
            },
            spec: Value::Mapping(run_spec),
        }));

        resources.push(Resource::ServiceAccount(ServiceAccount::new(ObjectMeta {
            name: job_name,
            namespace: Some(ctx.namespace().to_string()),
            ..ObjectMeta::default()
        })));
    }

    Ok(resources)
}

fn repository_config_value(config: &RepositoryConfig) -> Value {
    let mut entry = Mapping::new();
    match config {
        RepositoryConfig::Inline(raw) => {
            entry.insert(text("raw"), text(raw));
        }
        RepositoryConfig::SecretRef(reference) => {
            entry.insert(text("secret"), value_ref(reference));
        }
        RepositoryConfig::ConfigMapRef(reference) => {
            entry.insert(text("configMap"), value_ref(reference));
        }
    }
    Value::Mapping(entry)
}

fn value_ref(reference: &ValueRef) -> Value {
    let mut entry = Mapping::new();
    entry.insert(text("name"), text(&reference.name));
    entry.insert(text("namespace"), text(&reference.namespace));
    entry.insert(text("key"), text(&reference.key));
    Value::Mapping(entry)
}

/// A placeholder secret in this namespace, populated by the mirroring
/// controller from the referenced source
fn mirrored_secret(ctx: &ComponentContext, reference: &ValueRef) -> Resource {
    let mut secret = Secret::opaque(
        ObjectMeta {
            name: mirror_name(reference),
            namespace: Some(ctx.namespace().to_string()),
            labels: Default::default(),
            annotations: [
                (
                    MIRROR_SOURCE_ANNOTATION.to_string(),
                    format!("{}/{}", reference.namespace, reference.name),
                ),
                (MIRROR_VERSION_ANNOTATION.to_string(), String::new()),
            ]
            .into_iter()
            .collect(),
        },
        Default::default(),
    );
    secret.string_data = None;
    Resource::Secret(secret)
}

fn mirror_name(reference: &ValueRef) -> String {
    format!("{}-{}-mirror", reference.namespace, reference.name)
}

fn mount_mirrored_file(
    reference: ValueRef,
    dest: &VolumeDestination,
    pod: &mut PodSpec,
) -> ManifoldResult<()> {
    let file = match dest {
        VolumeDestination::File(file) => file.clone(),
        VolumeDestination::Dir(_) => {
            return Err(ManifoldError::synthesis(format!(
                "backup volume for secret '{}/{}' must have a file destination",
                reference.namespace, reference.name
            )))
        }
    };
    let basename = file.rsplit('/').next().unwrap_or(&file).to_string();
    let volume_name = coerce_dns_name(&format!(
        "{}-{}-{}",
        reference.name,
        reference.key,
        stable_id(&reference)
    ));

    pod.volumes.push(PodVolume {
        name: volume_name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: mirror_name(&reference),
            items: vec![KeyToPath {
                key: reference.key.clone(),
                path: basename.clone(),
            }],
        }),
        ..PodVolume::default()
    });
    pod.containers[0].volume_mounts.push(VolumeMount {
        name: volume_name,
        mount_path: file,
        sub_path: Some(basename),
        read_only: true,
    });
    Ok(())
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}
