//! Volume sub-generator
//!
//! Materializes each component volume: file-like sources become
//! ConfigMaps or Secrets projected into the pod, claim-like sources
//! become PVCs, and host/scratch/memory sources become plain pod
//! volumes. Single sources (one file, inline data) project the single
//! `data` key to an exact file path via a subPath mount.

use std::collections::BTreeMap;

use crate::error::{ManifoldError, ManifoldResult};
use crate::manifest::{
    ConfigMap, ConfigMapVolumeSource, EmptyDirVolumeSource, HostPathVolumeSource, KeyToPath,
    PersistentVolumeClaim, PodVolume, PvcSpec, PvcVolumeSource, Resource, Secret,
    SecretVolumeSource, VolumeMount, VolumeResourceRequirements,
};
use crate::schema::{VolumeDestination, VolumeSource, VolumeSpec};

use super::naming::{coerce_dns_name, config_key};
use super::ComponentContext;

/// Key under which a single source's content is stored
const SINGLE_KEY: &str = "data";

pub struct VolumeOutputs {
    pub resources: Vec<Resource>,
    pub pod_volumes: Vec<PodVolume>,
    pub mounts: Vec<VolumeMount>,
}

pub fn generate(ctx: &ComponentContext) -> ManifoldResult<VolumeOutputs> {
    let mut outputs = VolumeOutputs {
        resources: Vec::new(),
        pod_volumes: Vec::new(),
        mounts: Vec::new(),
    };

    for (id, spec) in &ctx.component.volumes {
        let volume_name = coerce_dns_name(id);
        match &spec.source {
            VolumeSource::Glob(_)
            | VolumeSource::Dir(_)
            | VolumeSource::File(_)
            | VolumeSource::Data(_) => {
                generate_projected(ctx, id, &volume_name, spec, &mut outputs)?;
            }
            VolumeSource::Pvc { storage_class, size } => {
                let claim_name = ctx.prefixed(&volume_name);
                let storage_class = storage_class
                    .clone()
                    .or_else(|| ctx.app.defaults.pvc.as_ref().and_then(|d| d.storage_class.clone()));
                let size = size
                    .clone()
                    .or_else(|| ctx.app.defaults.pvc.as_ref().and_then(|d| d.size.clone()))
                    .ok_or_else(|| {
                        ManifoldError::synthesis(format!(
                            "volume '{id}' on component '{}' has no size and no pvc default",
                            ctx.component.name
                        ))
                    })?;
                outputs
                    .resources
                    .push(Resource::PersistentVolumeClaim(PersistentVolumeClaim::new(
                        ctx.meta(&claim_name),
                        PvcSpec {
                            access_modes: vec!["ReadWriteOnce".to_string()],
                            storage_class_name: storage_class,
                            resources: VolumeResourceRequirements {
                                requests: [("storage".to_string(), size)].into_iter().collect(),
                            },
                        },
                    )));
                outputs.pod_volumes.push(PodVolume {
                    name: volume_name.clone(),
                    persistent_volume_claim: Some(PvcVolumeSource { claim_name }),
                    ..PodVolume::default()
                });
                outputs.mounts.push(mount(&volume_name, &spec.dest, false));
            }
            VolumeSource::Host {
                dir,
                read_only,
                create,
            } => {
                outputs.pod_volumes.push(PodVolume {
                    name: volume_name.clone(),
                    host_path: Some(HostPathVolumeSource {
                        path: dir.clone(),
                        path_type: if *create { "DirectoryOrCreate" } else { "Directory" }
                            .to_string(),
                    }),
                    ..PodVolume::default()
                });
                outputs.mounts.push(mount(&volume_name, &spec.dest, *read_only));
            }
            VolumeSource::Scratch { size } => {
                outputs.pod_volumes.push(PodVolume {
                    name: volume_name.clone(),
                    empty_dir: Some(EmptyDirVolumeSource {
                        medium: None,
                        size_limit: size.clone(),
                    }),
                    ..PodVolume::default()
                });
                outputs.mounts.push(mount(&volume_name, &spec.dest, false));
            }
            VolumeSource::Memory { size } => {
                outputs.pod_volumes.push(PodVolume {
                    name: volume_name.clone(),
                    empty_dir: Some(EmptyDirVolumeSource {
                        medium: Some("Memory".to_string()),
                        size_limit: size.clone(),
                    }),
                    ..PodVolume::default()
                });
                outputs.mounts.push(mount(&volume_name, &spec.dest, false));
            }
        }
    }

    Ok(outputs)
}

/// ConfigMap/Secret-backed volumes: load the staged source data, store
/// it under sanitized keys and project the keys back to their relative
/// paths at the mount point.
fn generate_projected(
    ctx: &ComponentContext,
    id: &str,
    volume_name: &str,
    spec: &VolumeSpec,
    outputs: &mut VolumeOutputs,
) -> ManifoldResult<()> {
    let source_data = load_source_data(ctx, &spec.source)?;

    let object_name = ctx.prefixed(&format!(
        "{}-{}",
        coerce_dns_name(spec.source.human_name()),
        coerce_dns_name(id)
    ));

    let mut object_data = BTreeMap::new();
    let mut items = Vec::new();
    if spec.is_single() {
        let content = source_data.get("").cloned().unwrap_or_default();
        object_data.insert(SINGLE_KEY.to_string(), content);
        let file = match &spec.dest {
            VolumeDestination::File(path) => path,
            VolumeDestination::Dir(_) => {
                // excluded by validation; guard for synthesis purity
                return Err(ManifoldError::synthesis(format!(
                    "single-source volume '{id}' has a directory destination"
                )));
            }
        };
        items.push(KeyToPath {
            key: SINGLE_KEY.to_string(),
            path: basename(file).to_string(),
        });
        outputs.mounts.push(VolumeMount {
            name: volume_name.to_string(),
            mount_path: file.clone(),
            sub_path: Some(basename(file).to_string()),
            read_only: true,
        });
    } else {
        for (relative, content) in &source_data {
            let key = config_key(relative);
            object_data.insert(key.clone(), content.clone());
            items.push(KeyToPath {
                key,
                path: relative.clone(),
            });
        }
        outputs.mounts.push(mount(volume_name, &spec.dest, true));
    }

    if spec.secret {
        outputs.resources.push(Resource::Secret(Secret::opaque(
            ctx.meta(&object_name),
            object_data,
        )));
        outputs.pod_volumes.push(PodVolume {
            name: volume_name.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: object_name,
                items,
            }),
            ..PodVolume::default()
        });
    } else {
        outputs.resources.push(Resource::ConfigMap(ConfigMap::new(
            ctx.meta(&object_name),
            object_data,
        )));
        outputs.pod_volumes.push(PodVolume {
            name: volume_name.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: object_name,
                items,
            }),
            ..PodVolume::default()
        });
    }

    Ok(())
}

fn load_source_data(
    ctx: &ComponentContext,
    source: &VolumeSource,
) -> ManifoldResult<BTreeMap<String, String>> {
    match source {
        VolumeSource::Glob(pattern) => ctx.staged.read_glob(pattern),
        VolumeSource::Dir(dir) => ctx.staged.read_dir(dir),
        VolumeSource::File(file) => {
            let content = ctx.staged.read_file(file)?;
            Ok([(String::new(), content)].into_iter().collect())
        }
        VolumeSource::Data(data) => Ok([(String::new(), data.clone())].into_iter().collect()),
        other => Err(ManifoldError::synthesis(format!(
            "volume source '{}' does not carry file data",
            other.human_name()
        ))),
    }
}

fn mount(volume_name: &str, dest: &VolumeDestination, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: volume_name.to_string(),
        mount_path: dest.path().to_string(),
        sub_path: None,
        read_only,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
