//! Configuration composition engine
//!
//! Builds, for one deployable unit, a fully-resolved
//! [`Environment`](crate::env::Environment) and a fully-merged
//! configuration document from the project's layer chain:
//!
//! ```text
//! <project>/
//!   project.yml              project config (name)
//!   env.yml                  project environment layer
//!   app-defaults.yml         shared app template
//!   component-defaults.yml   shared per-component template
//!   apps/<unit>/
//!     env.yml                unit environment layer
//!     app.yml                the unit's application document
//! ```
//!
//! Environments combine left-to-right before later layers hydrate, so a
//! later layer can reference keys bound by an earlier one. Hydration is
//! textual and precedes parsing; each parsed layer deep-merges into the
//! accumulating document with later-wins semantics. Any failure aborts
//! the unit's composition - no partial output.

use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;
use serde_yaml_ng::{Mapping, Value};

use crate::env::Environment;
use crate::error::{ManifoldError, ManifoldResult};
use crate::hydrate::hydrate;
use crate::merge::{deep_merge, MergePolicy};
use crate::plugins::PluginResolver;
use crate::synth::naming::{MANAGED_BY, PROJECT_LABEL};

/// Synthetic key naming the component currently being rendered.
/// Injected (with explicit overwrite) while hydrating the shared
/// component template, so one template specializes per component.
pub const COMPONENT_KEY: &str = "MANIFOLD_COMPONENT";

/// Project-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,
}

/// One unit's composition result
#[derive(Debug)]
pub struct ComposedUnit {
    pub document: Value,
    pub env: Environment,
}

/// Compose one deployable unit's environment and document.
pub fn compose_unit(
    project_root: &Path,
    unit: &str,
    resolver: Rc<dyn PluginResolver>,
) -> ManifoldResult<ComposedUnit> {
    let project_config = load_project_config(project_root)?;
    let project_name = project_config.name.clone().unwrap_or_else(|| {
        project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    // environment layers combine before later layers hydrate
    let mut base_env = Environment::new();
    base_env.load_yaml_layer_file(&project_root.join("env.yml"), &resolver, true)?;

    let mut unit_env = Environment::new();
    unit_env.load_yaml_layer_file(
        &project_root.join("apps").join(unit).join("env.yml"),
        &resolver,
        true,
    )?;
    let env = base_env.combine(&unit_env);

    // the unit's own document
    let app_path = project_root.join("apps").join(unit).join("app.yml");
    if !app_path.is_file() {
        return Err(ManifoldError::MissingFile {
            path: app_path.display().to_string(),
        });
    }
    let app_text = std::fs::read_to_string(&app_path)?;
    let mut document: Value = serde_yaml_ng::from_str(&hydrate(&app_text, &env)?)?;

    // shared app template merges underneath
    if let Some(defaults_text) = read_optional(&project_root.join("app-defaults.yml"))? {
        let defaults: Value = serde_yaml_ng::from_str(&hydrate(&defaults_text, &env)?)?;
        document = deep_merge(&defaults, &document, MergePolicy::PreferNew, true)?;
    }

    // shared component template specializes once per component
    if let Some(component_text) = read_optional(&project_root.join("component-defaults.yml"))? {
        for component in component_names(&document) {
            let mut component_env = env.clone();
            component_env.overwrite(COMPONENT_KEY, component.clone());
            let overlay: Value =
                serde_yaml_ng::from_str(&hydrate(&component_text, &component_env)?)?;
            document = deep_merge(&overlay, &document, MergePolicy::PreferNew, true)?;
        }
    }

    // static per-component metadata underneath everything else
    for component in component_names(&document) {
        let overlay = static_component_document(&component);
        document = deep_merge(&overlay, &document, MergePolicy::PreferNew, true)?;
    }

    // static app metadata lowest
    let app_name = document
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(unit)
        .to_string();
    let statics = static_app_document(&project_name, &app_name);
    document = deep_merge(&statics, &document, MergePolicy::PreferNew, true)?;

    Ok(ComposedUnit { document, env })
}

/// Merge sibling units' documents into one bundle. Siblings must not
/// collide: every real conflict is fatal with its dotted path.
pub fn merge_sibling_documents(documents: &[Value]) -> ManifoldResult<Value> {
    let mut merged = Value::Mapping(Mapping::new());
    for document in documents {
        merged = deep_merge(&merged, document, MergePolicy::Error, true)?;
    }
    Ok(merged)
}

fn load_project_config(project_root: &Path) -> ManifoldResult<ProjectConfig> {
    match read_optional(&project_root.join("project.yml"))? {
        Some(text) => Ok(serde_yaml_ng::from_str(&text)?),
        None => Ok(ProjectConfig::default()),
    }
}

fn read_optional(path: &Path) -> ManifoldResult<Option<String>> {
    if path.is_file() {
        Ok(Some(std::fs::read_to_string(path)?))
    } else {
        Ok(None)
    }
}

fn component_names(document: &Value) -> Vec<String> {
    document
        .get("components")
        .and_then(Value::as_mapping)
        .map(|components| {
            components
                .keys()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The app namespace is always `{project}-{app}`.
pub fn app_namespace(project_name: &str, app_name: &str) -> String {
    format!("{project_name}-{app_name}")
}

fn static_app_document(project_name: &str, app_name: &str) -> Value {
    let mut labels = Mapping::new();
    labels.insert(yaml_str("deploy.manifold.dev/managed-by"), yaml_str(MANAGED_BY));
    labels.insert(yaml_str("app.kubernetes.io/managed-by"), yaml_str(MANAGED_BY));
    labels.insert(yaml_str("app.kubernetes.io/part-of"), yaml_str(app_name));
    labels.insert(yaml_str(PROJECT_LABEL), yaml_str(project_name));

    let mut metadata = Mapping::new();
    metadata.insert(yaml_str("name"), yaml_str(app_name));
    metadata.insert(
        yaml_str("namespace"),
        yaml_str(&app_namespace(project_name, app_name)),
    );
    metadata.insert(yaml_str("project"), yaml_str(project_name));
    metadata.insert(yaml_str("labels"), Value::Mapping(labels));

    let mut root = Mapping::new();
    root.insert(yaml_str("metadata"), Value::Mapping(metadata));
    Value::Mapping(root)
}

fn static_component_document(component_name: &str) -> Value {
    let mut labels = Mapping::new();
    labels.insert(yaml_str("app.kubernetes.io/name"), yaml_str(component_name));

    let mut metadata = Mapping::new();
    metadata.insert(yaml_str("name"), yaml_str(component_name));
    metadata.insert(yaml_str("labels"), Value::Mapping(labels));

    let mut component = Mapping::new();
    component.insert(yaml_str("metadata"), Value::Mapping(metadata));

    let mut components = Mapping::new();
    components.insert(yaml_str(component_name), Value::Mapping(component));

    let mut root = Mapping::new();
    root.insert(yaml_str("components"), Value::Mapping(components));
    Value::Mapping(root)
}

fn yaml_str(s: &str) -> Value {
    Value::String(s.to_string())
}
