//! Common test utilities for Manifold scenario tests.
//!
//! Provides an isolated project fixture (temp project tree + staged
//! file tree), a one-call compile pipeline and small lookup helpers
//! over the synthesized resource list.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use manifold::manifest::Resource;
use manifold::plugins::{PluginResolver, StaticResolver};
use manifold::schema::AppDefinition;
use manifold::staging::StagedTree;
use manifold::Environment;

/// An isolated project layout plus staged file tree
pub struct TestProject {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub staged: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp project");
        let root = dir.path().join("project");
        let staged = dir.path().join("staged");
        std::fs::create_dir_all(&root).expect("create project root");
        std::fs::create_dir_all(&staged).expect("create staging root");
        Self {
            _dir: dir,
            root,
            staged,
        }
    }

    /// Write a file under the project root, creating parents.
    pub fn write(&self, relative: &str, text: &str) {
        write_file(&self.root.join(relative), text);
    }

    /// Write a file under the staging root, creating parents.
    pub fn stage(&self, relative: &str, text: &str) {
        write_file(&self.staged.join(relative), text);
    }

    pub fn staged_tree(&self) -> StagedTree {
        StagedTree::new(&self.staged)
    }

    /// Compose, validate and synthesize one unit.
    pub fn compile(&self, unit: &str) -> Vec<Resource> {
        self.compile_with(unit, StaticResolver::new())
    }

    pub fn compile_with(&self, unit: &str, resolver: StaticResolver) -> Vec<Resource> {
        let resolver: Rc<dyn PluginResolver> = Rc::new(resolver);
        let composed =
            manifold::compose_unit(&self.root, unit, resolver).expect("composition succeeds");
        let app = manifold::validate(&composed.document).expect("validation succeeds");
        manifold::synthesize(&app, &composed.env, &self.staged_tree())
            .expect("synthesis succeeds")
    }
}

fn write_file(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, text).expect("write file");
}

/// Validate an app document and synthesize it against a staged tree.
pub fn synthesize_doc(yaml: &str, staged: &StagedTree) -> Vec<Resource> {
    try_synthesize_doc(yaml, staged).expect("synthesis succeeds")
}

pub fn try_synthesize_doc(
    yaml: &str,
    staged: &StagedTree,
) -> manifold::ManifoldResult<Vec<Resource>> {
    let app = validate_doc(yaml);
    manifold::synthesize(&app, &Environment::new(), staged)
}

pub fn validate_doc(yaml: &str) -> AppDefinition {
    let document = serde_yaml_ng::from_str(yaml).expect("parse app document");
    manifold::validate(&document).expect("validation succeeds")
}

/// An empty staged tree for documents that read no files.
pub fn empty_staging() -> (tempfile::TempDir, StagedTree) {
    let dir = tempfile::tempdir().expect("create staging dir");
    let tree = StagedTree::new(dir.path());
    (dir, tree)
}

pub fn find<'a>(resources: &'a [Resource], kind: &str, name: &str) -> Option<&'a Resource> {
    resources
        .iter()
        .find(|r| r.kind() == kind && r.name() == name)
}

pub fn all_of<'a>(resources: &'a [Resource], kind: &str) -> Vec<&'a Resource> {
    resources.iter().filter(|r| r.kind() == kind).collect()
}

/// Serialize one resource to YAML for content assertions.
pub fn yaml_of(resource: &Resource) -> String {
    resource.to_yaml().expect("serialize resource")
}
