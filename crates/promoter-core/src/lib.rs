//! Promoter Core: promotion execution engine
//!
//! Runs an ordered list of schema-validated directives against a shared
//! promotion context, and resolves the revision every deployment source
//! should move to for the freight being promoted.
//!
//! ## Key Components
//!
//! - `directives`: registry, config validation, step pipeline and the
//!   builtin directives
//! - `revision` / `freight`: desired-revision resolver and artifact matchers
//! - `mechanism`: render-and-commit promotion through an external service
//! - `git` / `helm`: command-line collaborator implementations
//! - `telemetry` / `obs`: tracing setup and lifecycle events
//!
//! ## Setup
//!
//! ```ignore
//! let config = EngineConfig::from_env();
//! telemetry::init_from_config(&config);
//! let clients = BuiltinClients::from_config(&config, pull_requests);
//! let registry = builtin_registry(&clients)?;
//! let result = Pipeline::new(&registry).execute(&ctx, &steps).await?;
//! ```

pub mod config;
pub mod directives;
pub mod error;
pub mod freight;
pub mod git;
pub mod helm;
pub mod mechanism;
pub mod obs;
mod process;
pub mod report;
pub mod revision;
pub mod telemetry;
pub mod workdir;

pub use config::EngineConfig;
pub use directives::config::{bind, validate, ConfigSchema};
pub use directives::context::{
    CancelHandle, Cancellation, PromotionContext, State, StepContext, StepResult, StepStatus,
};
pub use directives::pipeline::{
    Pipeline, PipelineResult, PipelineStatus, StepRecord, StepSpec,
};
pub use directives::registry::{
    Capability, Directive, DirectiveRegistry, Permissions, Registration, StepReference,
};
pub use directives::{builtin_registry, BuiltinClients};
pub use error::{
    ConfigError, DirectiveError, ErrorKind, MatchError, MechanismError, PipelineError,
    RegistryError, ResolveError, Violation, WorkDirError,
};
pub use freight::{
    find_chart, find_commit, normalize_git_url, OriginPolicy, PolicyTarget, SourceUpdate,
    UpdatePolicy,
};
pub use git::GitCli;
pub use helm::HelmCli;
pub use mechanism::{
    GitRepoUpdate, PartialRender, RenderConfig, RenderMechanism, RenderOutcome, UnhandledRender,
};
pub use report::{render_pipeline_summary_md, write_pipeline_report, PipelineReport};
pub use revision::{
    fold_oci_reference, resolve_application_revisions, resolve_revisions, StagePolicy,
};
pub use workdir::WorkDir;

/// Result type for engine operations that can fail for more than one reason.
pub type Result<T> = anyhow::Result<T>;
