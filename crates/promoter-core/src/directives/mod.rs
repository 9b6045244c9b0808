//! Directives: the typed, schema-validated operations a promotion runs.
//!
//! - [`registry`]: directive trait, capabilities and the registry
//! - [`config`]: JSON Schema validation and typed binding of step config
//! - [`context`]: promotion/step contexts, shared state and step results
//! - [`pipeline`]: ordered, fail-fast step execution
//!
//! [`builtin_registry`] assembles the standard directive set.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod registry;

mod argocd_revisions;
mod chart;
mod git_open_pr;
mod git_overwrite;
mod git_push;
mod git_wait_for_pr;
mod helm_template;
mod helm_update_chart;

use std::sync::Arc;

use promoter_state::{GitClient, HelmClient, PullRequestClient};

pub use argocd_revisions::{
    AppRevisionsConfig, ArgoCdDesiredRevisions, ArgoCdDesiredRevisionsConfig, SourceOverride,
};
pub use git_open_pr::{GitOpenPr, GitOpenPrConfig, SourceBranch};
pub use git_overwrite::{GitOverwrite, GitOverwriteConfig};
pub use git_push::{generated_branch_name, GitPush, GitPushConfig, PushTarget};
pub use git_wait_for_pr::{GitWaitForPr, GitWaitForPrConfig, PrNumber};
pub use helm_template::{HelmTemplate, HelmTemplateConfig};
pub use helm_update_chart::{
    compare_chart_versions, generate_commit_message, normalize_chart_reference, ChartUpdate,
    HelmUpdateChart, HelmUpdateChartConfig,
};

use crate::config::EngineConfig;
use crate::error::RegistryError;
use crate::git::GitCli;
use crate::helm::HelmCli;
use registry::{Capability, DirectiveRegistry, Permissions};

/// Low-level clients the builtin directives call.
#[derive(Clone)]
pub struct BuiltinClients {
    pub git: Arc<dyn GitClient>,
    pub helm: Arc<dyn HelmClient>,
    pub pull_requests: Arc<dyn PullRequestClient>,
}

impl BuiltinClients {
    /// `git` and `helm` CLIs from `config`, plus the given pull-request
    /// provider.
    pub fn from_config(config: &EngineConfig, pull_requests: Arc<dyn PullRequestClient>) -> Self {
        Self {
            git: Arc::new(GitCli::from_config(config)),
            helm: Arc::new(HelmCli::from_config(config)),
            pull_requests,
        }
    }
}

impl std::fmt::Debug for BuiltinClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinClients").finish_non_exhaustive()
    }
}

/// Registry with every builtin directive and its permissions.
pub fn builtin_registry(clients: &BuiltinClients) -> Result<DirectiveRegistry, RegistryError> {
    let credentials = || Permissions::none().with(Capability::CredentialsDb);

    let mut registry = DirectiveRegistry::new();
    registry.register(Arc::new(GitOverwrite::new()?), Permissions::none())?;
    registry.register(
        Arc::new(GitPush::new(Arc::clone(&clients.git))?),
        credentials(),
    )?;
    registry.register(
        Arc::new(GitOpenPr::new(Arc::clone(&clients.pull_requests))?),
        credentials(),
    )?;
    registry.register(
        Arc::new(GitWaitForPr::new(Arc::clone(&clients.pull_requests))?),
        credentials(),
    )?;
    registry.register(
        Arc::new(HelmTemplate::new(Arc::clone(&clients.helm))?),
        credentials().with(Capability::ArgoCdClient),
    )?;
    registry.register(
        Arc::new(HelmUpdateChart::new(Arc::clone(&clients.helm))?),
        credentials(),
    )?;
    registry.register(
        Arc::new(ArgoCdDesiredRevisions::new()?),
        Permissions::none().with(Capability::ArgoCdClient),
    )?;
    Ok(registry)
}
