//! Collaborator contracts consumed by the promotion engine.
//!
//! These traits define the narrow interfaces the engine uses to reach the
//! outside world:
//! - `CredentialsDb`: credential lookup by namespace, type and repository
//! - `ArgoCdClient`: read-only access to Argo CD Applications
//! - `RenderService`: render configuration into plain manifests and commit
//! - `GitClient`: branch inspection and push for a local work tree
//! - `PullRequestClient`: open and inspect pull requests
//! - `HelmClient`: chart rendering, dependency update, registry login
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorResult;

// ---------------------------------------------------------------------------
// CredentialsDb
// ---------------------------------------------------------------------------

/// Kind of repository a credential applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Git,
    Helm,
    Image,
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialType::Git => write!(f, "git"),
            CredentialType::Helm => write!(f, "helm"),
            CredentialType::Image => write!(f, "image"),
        }
    }
}

/// Credentials for a repository or registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key: Option<String>,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ssh_private_key: None,
        }
    }
}

// Secrets never reach log output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "ssh_private_key",
                &self.ssh_private_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Credential lookup.
///
/// `Ok(None)` means no credentials are configured for the repository; only
/// backend faults are errors.
#[async_trait]
pub trait CredentialsDb: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        cred_type: CredentialType,
        repo: &str,
    ) -> CollaboratorResult<Option<Credentials>>;
}

// ---------------------------------------------------------------------------
// ArgoCdClient
// ---------------------------------------------------------------------------

/// One deployment source of an Argo CD Application.
///
/// A non-empty `chart` makes this a Helm source; otherwise a non-empty
/// `repo_url` makes it a Git source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_revision: Option<String>,
}

impl ApplicationSource {
    pub fn git(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            ..Default::default()
        }
    }

    pub fn helm(repo_url: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            chart: Some(chart.into()),
            ..Default::default()
        }
    }

    /// Chart name, treating an empty string as absent.
    pub fn chart_name(&self) -> Option<&str> {
        self.chart.as_deref().filter(|c| !c.is_empty())
    }
}

/// Read-only view of an Argo CD Application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
}

impl Application {
    /// Multi-source list when present, otherwise the single source.
    pub fn all_sources(&self) -> Vec<ApplicationSource> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        self.source.iter().cloned().collect()
    }
}

/// Read-only Argo CD access.
#[async_trait]
pub trait ArgoCdClient: Send + Sync {
    /// Fetch one Application. `Ok(None)` if it does not exist.
    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> CollaboratorResult<Option<Application>>;

    /// List Applications in a namespace.
    async fn list_applications(&self, namespace: &str) -> CollaboratorResult<Vec<Application>>;
}

// ---------------------------------------------------------------------------
// RenderService
// ---------------------------------------------------------------------------

/// Request to render environment-specific configuration into plain manifests
/// on a target branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub repo_creds: Credentials,
    /// Ref to read configuration from (branch or commit ID).
    pub read_ref: String,
    /// `repo:tag` image references to render in.
    pub images: Vec<String>,
    pub target_branch: String,
}

/// What the render service did with the rendered manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderAction {
    /// A new commit was pushed straight to the target branch.
    PushedDirectly,
    /// Rendered output matched the target branch; nothing was committed.
    None,
    /// A pull request was opened instead of pushing.
    OpenedPr { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    #[serde(rename = "commitID")]
    pub commit_id: String,
    pub action_taken: RenderAction,
}

/// External render-and-commit mechanism.
#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render(&self, request: RenderRequest) -> CollaboratorResult<RenderResponse>;
}

// ---------------------------------------------------------------------------
// GitClient
// ---------------------------------------------------------------------------

/// Push parameters for a local work tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub work_tree: PathBuf,
    /// Remote branch to push to.
    pub target_branch: String,
    pub credentials: Option<Credentials>,
}

/// Result of a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub branch: String,
    pub commit: String,
}

/// Git operations on a checked-out work tree.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Name of the branch currently checked out in `work_tree`.
    async fn current_branch(&self, work_tree: &std::path::Path) -> CollaboratorResult<String>;

    /// URL of the `origin` remote of `work_tree`.
    async fn remote_url(&self, work_tree: &std::path::Path) -> CollaboratorResult<String>;

    /// Push the current HEAD of the work tree to `options.target_branch`.
    async fn push(&self, options: PushOptions) -> CollaboratorResult<PushOutcome>;
}

// ---------------------------------------------------------------------------
// PullRequestClient
// ---------------------------------------------------------------------------

/// Provider-independent pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    /// Still open; neither merged nor closed.
    Open,
    Merged,
    /// Closed without being merged.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub url: String,
    pub state: PullRequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPullRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
}

/// Pull request provider (GitHub, GitLab, ...).
#[async_trait]
pub trait PullRequestClient: Send + Sync {
    async fn create_pull_request(
        &self,
        repo_url: &str,
        credentials: Option<&Credentials>,
        request: NewPullRequest,
    ) -> CollaboratorResult<PullRequest>;

    async fn get_pull_request(
        &self,
        repo_url: &str,
        credentials: Option<&Credentials>,
        number: u64,
    ) -> CollaboratorResult<PullRequest>;
}

// ---------------------------------------------------------------------------
// HelmClient
// ---------------------------------------------------------------------------

/// Client-only chart rendering request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRequest {
    pub chart_path: PathBuf,
    pub release_name: String,
    pub namespace: String,
    /// Fully merged values.
    pub values: serde_json::Value,
    pub include_crds: bool,
    pub kube_version: Option<String>,
    pub api_versions: Vec<String>,
}

/// Dependency update for one chart, using an isolated Helm home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyUpdateRequest {
    pub chart_path: PathBuf,
    pub helm_home: PathBuf,
    pub repository_config: PathBuf,
    pub registry_config: PathBuf,
}

/// Helm operations.
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Render a chart without contacting a cluster; returns the manifest.
    async fn template(&self, request: TemplateRequest) -> CollaboratorResult<String>;

    /// Download dependencies into `charts/` and write `Chart.lock`.
    async fn update_dependencies(&self, request: DependencyUpdateRequest)
        -> CollaboratorResult<()>;

    /// Log in to an OCI registry, storing auth in `registry_config`.
    async fn registry_login(
        &self,
        registry_config: &std::path::Path,
        host: &str,
        credentials: &Credentials,
    ) -> CollaboratorResult<()>;
}
