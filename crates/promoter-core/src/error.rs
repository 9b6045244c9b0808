//! Error taxonomy for the promotion engine.
//!
//! Every engine error maps onto one [`ErrorKind`], which is what callers use
//! to decide between surfacing a config problem, retrying later, or filing a
//! bug. A `Failed` step is never an error and an error is never a `Failed`
//! step.

use std::fmt;

use promoter_state::CollaboratorError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directives::registry::Capability;

/// Classification of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User-supplied config or freight selection is wrong.
    ConfigInvalid,
    /// A directive needs a capability its registration does not grant.
    CapabilityDenied,
    /// A collaborator (or the local filesystem) failed.
    CollaboratorFailure,
    /// Engine invariant violated.
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConfigInvalid => write!(f, "config_invalid"),
            ErrorKind::CapabilityDenied => write!(f, "capability_denied"),
            ErrorKind::CollaboratorFailure => write!(f, "collaborator_failure"),
            ErrorKind::Bug => write!(f, "bug"),
        }
    }
}

/// One violated schema constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer into the config (`""` for the root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Config validation and binding errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {directive} config: {}", join_violations(.violations))]
    Invalid {
        directive: String,
        violations: Vec<Violation>,
    },

    #[error("could not convert config into {directive} config: {message}")]
    Bind { directive: String, message: String },

    #[error("schema for {directive} is not a valid JSON Schema: {message}")]
    Schema { directive: String, message: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Invalid { .. } => ErrorKind::ConfigInvalid,
            ConfigError::Bind { .. } | ConfigError::Schema { .. } => ErrorKind::Bug,
        }
    }
}

/// Directive registry errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("directive already registered: {name}")]
    Duplicate { name: String },

    /// A builtin directive's embedded schema failed to compile.
    #[error("directive {name} has an invalid config schema: {message}")]
    InvalidSchema { name: String, message: String },
}

impl From<ConfigError> for RegistryError {
    fn from(err: ConfigError) -> Self {
        let message = err.to_string();
        match err {
            ConfigError::Invalid { directive, .. }
            | ConfigError::Bind { directive, .. }
            | ConfigError::Schema { directive, .. } => RegistryError::InvalidSchema {
                name: directive,
                message,
            },
        }
    }
}

/// Artifact matcher errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error(
        "{artifact} is supplied by more than one origin ({}); pin an origin with fromOrigin",
        .origins.join(", ")
    )]
    AmbiguousOrigin {
        artifact: String,
        origins: Vec<String>,
    },
}

/// Desired-revision resolver errors.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("more than one source update matches repo {repo_url:?}{}", chart_suffix(.chart))]
    AmbiguousOverride {
        repo_url: String,
        chart: Option<String>,
    },

    #[error("error finding chart from repo {repo_url:?}: {source}")]
    Chart {
        repo_url: String,
        #[source]
        source: MatchError,
    },

    #[error("error finding commit from repo {repo_url:?}: {source}")]
    Commit {
        repo_url: String,
        #[source]
        source: MatchError,
    },

    #[error("error fetching Argo CD Application {namespace}/{name}: {source}")]
    Application {
        namespace: String,
        name: String,
        #[source]
        source: CollaboratorError,
    },
}

fn chart_suffix(chart: &Option<String>) -> String {
    match chart {
        Some(c) => format!(" and chart {c:?}"),
        None => String::new(),
    }
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::Application { .. } => ErrorKind::CollaboratorFailure,
            _ => ErrorKind::ConfigInvalid,
        }
    }
}

/// Work directory errors.
#[derive(Error, Debug)]
pub enum WorkDirError {
    #[error("too many levels of symbolic links resolving {path:?}")]
    TooManyLinks { path: String },

    #[error("failed to resolve {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by a directive run.
#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    WorkDir(#[from] WorkDirError),

    #[error("{context}: {source}")]
    Collaborator {
        context: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Repository content (chart metadata, values files) is malformed.
    #[error("{context}: {message}")]
    InvalidContent { context: String, message: String },

    #[error("{0} collaborator is not available to this step")]
    MissingCollaborator(Capability),

    /// The directive finished with an `Error` status.
    #[error("{0}")]
    Reported(String),
}

impl DirectiveError {
    pub fn collaborator(context: impl Into<String>, source: CollaboratorError) -> Self {
        DirectiveError::Collaborator {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DirectiveError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_content(context: impl Into<String>, message: impl fmt::Display) -> Self {
        DirectiveError::InvalidContent {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectiveError::Config(e) => e.kind(),
            DirectiveError::Match(_) => ErrorKind::ConfigInvalid,
            DirectiveError::Resolve(e) => e.kind(),
            DirectiveError::WorkDir(_) => ErrorKind::ConfigInvalid,
            DirectiveError::Collaborator { .. } | DirectiveError::Io { .. } => {
                ErrorKind::CollaboratorFailure
            }
            DirectiveError::InvalidContent { .. } => ErrorKind::ConfigInvalid,
            DirectiveError::MissingCollaborator(_) => ErrorKind::Bug,
            DirectiveError::Reported(_) => ErrorKind::CollaboratorFailure,
        }
    }
}

/// Pipeline errors. Pre-flight errors are returned from `execute`; errors
/// raised while a step runs are recorded on the pipeline result instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("step {index} ({alias}): unknown directive {directive:?}")]
    UnknownDirective {
        index: usize,
        alias: String,
        directive: String,
    },

    #[error("step {index}: duplicate step alias {alias:?}")]
    DuplicateAlias { index: usize, alias: String },

    #[error("step {index} ({alias}): unresolved output reference {reference:?}")]
    UnresolvedReference {
        index: usize,
        alias: String,
        reference: String,
    },

    #[error("step {index} ({alias}): {source}")]
    ConfigInvalid {
        index: usize,
        alias: String,
        #[source]
        source: ConfigError,
    },

    #[error("step {index} ({alias}): directive {directive} requires capability {capability}, which is not granted")]
    CapabilityDenied {
        index: usize,
        alias: String,
        directive: String,
        capability: Capability,
    },

    #[error("step {index} ({alias}): {source}")]
    Step {
        index: usize,
        alias: String,
        #[source]
        source: DirectiveError,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnknownDirective { .. } => ErrorKind::Bug,
            PipelineError::DuplicateAlias { .. } | PipelineError::UnresolvedReference { .. } => {
                ErrorKind::ConfigInvalid
            }
            PipelineError::ConfigInvalid { source, .. } => source.kind(),
            PipelineError::CapabilityDenied { .. } => ErrorKind::CapabilityDenied,
            PipelineError::Step { source, .. } => source.kind(),
        }
    }

    /// Alias of the step the error is attributed to.
    pub fn alias(&self) -> &str {
        match self {
            PipelineError::UnknownDirective { alias, .. }
            | PipelineError::DuplicateAlias { alias, .. }
            | PipelineError::UnresolvedReference { alias, .. }
            | PipelineError::ConfigInvalid { alias, .. }
            | PipelineError::CapabilityDenied { alias, .. }
            | PipelineError::Step { alias, .. } => alias,
        }
    }
}

/// Render mechanism errors for a single repository update.
#[derive(Error, Debug)]
pub enum MechanismError {
    #[error("no commit found in stage state for git repo {repo_url:?}")]
    NoCommitForRepo { repo_url: String },

    #[error("error obtaining credentials for git repo {repo_url:?}: {source}")]
    Credentials {
        repo_url: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("error rendering manifests for git repo {repo_url:?}: {source}")]
    Render {
        repo_url: String,
        #[source]
        source: CollaboratorError,
    },
}

impl MechanismError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MechanismError::NoCommitForRepo { .. } => ErrorKind::ConfigInvalid,
            _ => ErrorKind::CollaboratorFailure,
        }
    }
}
