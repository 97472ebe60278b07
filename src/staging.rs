//! Staged file tree access
//!
//! Volume and environment specs of kind `file`, `dir` or `glob` read
//! already-staged files. The staging step (copy + hydration + format
//! transformation) is an external collaborator; its contract is that by
//! synthesis time every referenced relative path exists under one
//! staging root. All reads are confined to that root.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::GitignoreBuilder;
use regex::Regex;

use crate::error::{ManifoldError, ManifoldResult};

/// Read-only handle on the staging root
#[derive(Debug, Clone)]
pub struct StagedTree {
    root: PathBuf,
}

impl StagedTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path, rejecting absolute paths and `..` hops.
    fn resolve(&self, relative: &str) -> ManifoldResult<PathBuf> {
        let path = Path::new(relative);
        let escapes = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(ManifoldError::StagedPathEscape {
                path: relative.to_string(),
            });
        }
        Ok(self.root.join(path))
    }

    /// Read one staged file as text.
    pub fn read_file(&self, relative: &str) -> ManifoldResult<String> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(ManifoldError::MissingFile {
                path: path.display().to_string(),
            });
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Read a staged directory recursively. Keys are paths relative to
    /// the directory itself (the mount point supplies the parent).
    pub fn read_dir(&self, relative: &str) -> ManifoldResult<BTreeMap<String, String>> {
        let dir = self.resolve(relative)?;
        if !dir.is_dir() {
            return Err(ManifoldError::MissingFile {
                path: dir.display().to_string(),
            });
        }
        let mut results = BTreeMap::new();
        collect_files(&dir, &dir, &mut results)?;
        Ok(results)
    }

    /// Read every staged file matching a gitignore-style glob. Keys are
    /// paths relative to the staging root.
    pub fn read_glob(&self, pattern: &str) -> ManifoldResult<BTreeMap<String, String>> {
        let mut builder = GitignoreBuilder::new(&self.root);
        builder
            .add_line(None, pattern)
            .map_err(|e| ManifoldError::validation("src.glob", e.to_string()))?;
        let matcher = builder
            .build()
            .map_err(|e| ManifoldError::validation("src.glob", e.to_string()))?;

        let mut all = BTreeMap::new();
        collect_files(&self.root, &self.root, &mut all)?;

        Ok(all
            .into_iter()
            .filter(|(rel, _)| matcher.matched(rel, false).is_ignore())
            .collect())
    }

    /// Read a staged dotenv file into an ordered map.
    pub fn read_env_file(&self, relative: &str) -> ManifoldResult<BTreeMap<String, String>> {
        let text = self.read_file(relative)?;
        parse_env_text(&text, relative)
    }
}

fn collect_files(
    base: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, String>,
) -> ManifoldResult<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(relative, std::fs::read_to_string(&path)?);
        }
    }
    Ok(())
}

/// Parse dotenv text: `KEY=value` or `KEY="quoted value"` per line, `#`
/// comments and blank lines ignored, anything else fatal.
pub fn parse_env_text(text: &str, source: &str) -> ManifoldResult<BTreeMap<String, String>> {
    let ignore_re = Regex::new(r"^\s*(#.*)?$").expect("comment pattern is a valid regex");
    let line_re = Regex::new(r##"^\s*([^\s#=]+)\s*=\s*(?:(?:"([^"#]*)")|([^\s#]*))\s*$"##)
        .expect("line pattern is a valid regex");

    let mut out = BTreeMap::new();
    for line in text.lines() {
        if ignore_re.is_match(line) {
            continue;
        }
        let caps = line_re
            .captures(line)
            .ok_or_else(|| ManifoldError::MalformedEnvEntry {
                file: source.to_string(),
                line: line.trim().to_string(),
            })?;
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        out.insert(caps[1].to_string(), value);
    }
    Ok(out)
}
