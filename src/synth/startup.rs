//! Startup-task sub-generator
//!
//! Turns the ordered startup task list into ordered init containers.
//! Task order in configuration is execution order in the pod. Names
//! carry a stable content hash so identical tasks always produce
//! identical names and repeated same-kind tasks never collide.

use serde::Serialize;

use crate::error::ManifoldResult;
use crate::manifest::{Container, VolumeMount};
use crate::schema::{RenderSelector, StartupTask};

use super::naming::{coerce_dns_name, stable_id};
use super::ComponentContext;

/// Longest path fragment kept in a container name before the hash
const NAME_PATH_BUDGET: usize = 24;

pub fn init_containers(
    ctx: &ComponentContext,
    mounts: &[VolumeMount],
) -> ManifoldResult<Vec<Container>> {
    let images = &ctx.app.defaults.images;
    let mut containers = Vec::new();

    for task in &ctx.component.startup_tasks {
        let container = match task {
            StartupTask::Chown {
                paths,
                owner,
                recursive,
            } => Container {
                name: task_name(task, paths),
                image: images.startup_chown.clone(),
                command: attr_command("chown", owner, paths, *recursive),
                volume_mounts: writable(mounts),
                ..Container::default()
            },
            StartupTask::Chmod {
                paths,
                mode,
                recursive,
            } => Container {
                name: task_name(task, paths),
                image: images.startup_chmod.clone(),
                command: attr_command("chmod", mode, paths, *recursive),
                volume_mounts: writable(mounts),
                ..Container::default()
            },
            StartupTask::Chgrp {
                paths,
                group,
                recursive,
            } => Container {
                name: task_name(task, paths),
                image: images.startup_chgrp.clone(),
                command: attr_command("chgrp", group, paths, *recursive),
                volume_mounts: writable(mounts),
                ..Container::default()
            },
            StartupTask::Render {
                input,
                output,
                extra_args,
                data_sources,
            } => {
                let mut args = selector_args(input, true);
                args.extend(selector_args(output, false));
                for (name, url) in data_sources {
                    args.push("--datasource".to_string());
                    args.push(format!("{name}={url}"));
                }
                args.extend(extra_args.iter().cloned());
                Container {
                    name: task_name(task, &[]),
                    image: images.startup_render.clone(),
                    args,
                    volume_mounts: writable(mounts),
                    ..Container::default()
                }
            }
            StartupTask::Script { script } => Container {
                name: task_name(task, &[]),
                image: images.startup_shell.clone(),
                command: vec!["sh".to_string(), "-c".to_string(), script.clone()],
                volume_mounts: writable(mounts),
                ..Container::default()
            },
        };
        containers.push(container);
    }

    Ok(containers)
}

/// `startup-{kind}-[path-]{hash}`, DNS-coerced
fn task_name(task: &StartupTask, paths: &[String]) -> String {
    let mut name = format!("startup-{}-", task.kind());
    if let [only] = paths {
        let mut fragment = coerce_dns_name(only);
        fragment.truncate(NAME_PATH_BUDGET);
        if !fragment.is_empty() {
            name.push_str(&fragment);
            name.push('-');
        }
    }
    name.push_str(&stable_id(&CanonicalTask::from(task)));
    coerce_dns_name(&name)
}

fn attr_command(tool: &str, argument: &str, paths: &[String], recursive: bool) -> Vec<String> {
    let mut command = vec![tool.to_string()];
    if recursive {
        command.push("-R".to_string());
    }
    command.push(argument.to_string());
    command.extend(paths.iter().cloned());
    command
}

fn selector_args(selector: &RenderSelector, input: bool) -> Vec<String> {
    match selector {
        RenderSelector::File(file) => {
            vec![if input { "--file" } else { "--out" }.to_string(), file.clone()]
        }
        RenderSelector::Files(files) => files
            .iter()
            .flat_map(|f| {
                [
                    if input { "--file" } else { "--out" }.to_string(),
                    f.clone(),
                ]
            })
            .collect(),
        RenderSelector::Dir { dir, exclude } => {
            let mut args = vec![
                if input { "--input-dir" } else { "--output-dir" }.to_string(),
                dir.clone(),
            ];
            if input {
                if let Some(exclude) = exclude {
                    args.push("--exclude".to_string());
                    args.push(exclude.clone());
                }
            }
            args
        }
    }
}

fn writable(mounts: &[VolumeMount]) -> Vec<VolumeMount> {
    mounts
        .iter()
        .map(|m| VolumeMount {
            read_only: false,
            ..m.clone()
        })
        .collect()
}

/// Serializable task shape for the name hash
#[derive(Serialize)]
struct CanonicalTask<'a> {
    kind: &'static str,
    detail: String,
    paths: Vec<&'a String>,
}

impl<'a> From<&'a StartupTask> for CanonicalTask<'a> {
    fn from(task: &'a StartupTask) -> Self {
        match task {
            StartupTask::Chown {
                paths,
                owner,
                recursive,
            } => Self {
                kind: "chown",
                detail: format!("{owner}:{recursive}"),
                paths: paths.iter().collect(),
            },
            StartupTask::Chmod {
                paths,
                mode,
                recursive,
            } => Self {
                kind: "chmod",
                detail: format!("{mode}:{recursive}"),
                paths: paths.iter().collect(),
            },
            StartupTask::Chgrp {
                paths,
                group,
                recursive,
            } => Self {
                kind: "chgrp",
                detail: format!("{group}:{recursive}"),
                paths: paths.iter().collect(),
            },
            StartupTask::Render {
                input,
                output,
                extra_args,
                data_sources,
            } => Self {
                kind: "render",
                detail: format!("{input:?}|{output:?}|{extra_args:?}|{data_sources:?}"),
                paths: Vec::new(),
            },
            StartupTask::Script { script } => Self {
                kind: "script",
                detail: script.clone(),
                paths: Vec::new(),
            },
        }
    }
}
