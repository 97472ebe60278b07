//! Error types for Manifold
//!
//! Uses `thiserror` for library errors. Every error is fatal to the
//! current unit's build: composition and synthesis never emit partial
//! output, and retries are an external concern.

use thiserror::Error;

/// Result type alias for Manifold operations
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Main error type for Manifold operations
#[derive(Error, Debug)]
pub enum ManifoldError {
    /// Hydration referenced a key that is not bound in the environment
    #[error("unresolved reference '{{{{ {key} }}}}' - key is not bound in any configuration layer")]
    UnresolvedReference { key: String },

    /// A key was bound twice in the same environment layer
    #[error("multiple entries for variable '{key}'")]
    DuplicateBinding { key: String },

    /// An external lookup failed; `call` is the rendered plugin invocation
    #[error("unable to execute plugin {call}: {message}")]
    PluginExecution { call: String, message: String },

    /// A line in an environment layer did not match any accepted form
    #[error("malformed environment entry in {file}: '{line}'")]
    MalformedEnvEntry { file: String, line: String },

    /// Merge policy `error` hit a real conflict
    #[error("multiple entries found for key '{path}'")]
    MergeConflict { path: String },

    /// Schema or invariant violation; `path` is the dotted field path
    #[error("invalid configuration at '{path}': {message}")]
    Validation { path: String, message: String },

    /// A cross-reference could not be resolved during synthesis
    #[error("synthesis failed: {message}")]
    Synthesis { message: String },

    /// A referenced file was missing from the expected layout
    #[error("could not find file {path}")]
    MissingFile { path: String },

    /// A staged source path escapes the staging root
    #[error("staged path '{path}' escapes the staging root")]
    StagedPathEscape { path: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ManifoldError {
    /// Shorthand for a validation error at a dotted field path
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a synthesis error
    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::Synthesis {
            message: message.into(),
        }
    }
}
