//! In-memory fakes for collaborator traits (testing only)
//!
//! Every fake records the calls it receives so tests can assert on what the
//! engine asked for, and can be scripted to fail.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::*;
use crate::error::{CollaboratorError, CollaboratorResult};

// ---------------------------------------------------------------------------
// MemoryCredentialsDb
// ---------------------------------------------------------------------------

/// Credentials keyed by `(namespace, type, repo)`.
#[derive(Debug, Default)]
pub struct MemoryCredentialsDb {
    creds: Mutex<HashMap<(String, CredentialType, String), Credentials>>,
    fail_with: Mutex<Option<String>>,
    lookups: Mutex<Vec<(String, CredentialType, String)>>,
}

impl MemoryCredentialsDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        namespace: &str,
        cred_type: CredentialType,
        repo: &str,
        credentials: Credentials,
    ) {
        self.creds.lock().unwrap().insert(
            (namespace.to_string(), cred_type, repo.to_string()),
            credentials,
        );
    }

    /// Make every subsequent lookup fail with a connection error.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn lookups(&self) -> Vec<(String, CredentialType, String)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialsDb for MemoryCredentialsDb {
    async fn get(
        &self,
        namespace: &str,
        cred_type: CredentialType,
        repo: &str,
    ) -> CollaboratorResult<Option<Credentials>> {
        self.lookups
            .lock()
            .unwrap()
            .push((namespace.to_string(), cred_type, repo.to_string()));
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(CollaboratorError::Connection(msg));
        }
        let creds = self.creds.lock().unwrap();
        Ok(creds
            .get(&(namespace.to_string(), cred_type, repo.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryArgoCd
// ---------------------------------------------------------------------------

/// Applications keyed by `(namespace, name)`.
#[derive(Debug, Default)]
pub struct MemoryArgoCd {
    apps: Mutex<HashMap<(String, String), Application>>,
}

impl MemoryArgoCd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, app: Application) {
        self.apps
            .lock()
            .unwrap()
            .insert((app.namespace.clone(), app.name.clone()), app);
    }
}

#[async_trait]
impl ArgoCdClient for MemoryArgoCd {
    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> CollaboratorResult<Option<Application>> {
        let apps = self.apps.lock().unwrap();
        Ok(apps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_applications(&self, namespace: &str) -> CollaboratorResult<Vec<Application>> {
        let apps = self.apps.lock().unwrap();
        let mut list: Vec<Application> = apps
            .values()
            .filter(|a| a.namespace == namespace)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// ScriptedRenderService
// ---------------------------------------------------------------------------

/// Render service that replays queued responses in order.
///
/// When the queue is empty it answers `PushedDirectly` with a commit ID
/// derived from the call count.
#[derive(Debug, Default)]
pub struct ScriptedRenderService {
    responses: Mutex<VecDeque<CollaboratorResult<RenderResponse>>>,
    requests: Mutex<Vec<RenderRequest>>,
}

impl ScriptedRenderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: RenderResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, err: CollaboratorError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderService for ScriptedRenderService {
    async fn render(&self, request: RenderRequest) -> CollaboratorResult<RenderResponse> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(RenderResponse {
                commit_id: format!("rendered-{call}"),
                action_taken: RenderAction::PushedDirectly,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingGitClient
// ---------------------------------------------------------------------------

/// Git client that records pushes and returns a fixed head commit.
#[derive(Debug)]
pub struct RecordingGitClient {
    branch: String,
    head_commit: String,
    remote_url: String,
    pushes: Mutex<Vec<PushOptions>>,
    fail_push: Mutex<Option<String>>,
}

impl RecordingGitClient {
    pub fn new(branch: &str, head_commit: &str) -> Self {
        Self {
            branch: branch.to_string(),
            head_commit: head_commit.to_string(),
            remote_url: "https://git.example.com/org/repo.git".to_string(),
            pushes: Mutex::new(Vec::new()),
            fail_push: Mutex::new(None),
        }
    }

    pub fn with_remote_url(mut self, url: &str) -> Self {
        self.remote_url = url.to_string();
        self
    }

    pub fn fail_push(&self, message: &str) {
        *self.fail_push.lock().unwrap() = Some(message.to_string());
    }

    pub fn pushes(&self) -> Vec<PushOptions> {
        self.pushes.lock().unwrap().clone()
    }
}

impl Default for RecordingGitClient {
    fn default() -> Self {
        Self::new("main", "0000000000000000000000000000000000000000")
    }
}

#[async_trait]
impl GitClient for RecordingGitClient {
    async fn current_branch(&self, _work_tree: &Path) -> CollaboratorResult<String> {
        Ok(self.branch.clone())
    }

    async fn remote_url(&self, _work_tree: &Path) -> CollaboratorResult<String> {
        Ok(self.remote_url.clone())
    }

    async fn push(&self, options: PushOptions) -> CollaboratorResult<PushOutcome> {
        if let Some(msg) = self.fail_push.lock().unwrap().clone() {
            return Err(CollaboratorError::Rejected(msg));
        }
        let branch = options.target_branch.clone();
        self.pushes.lock().unwrap().push(options);
        Ok(PushOutcome {
            branch,
            commit: self.head_commit.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryPullRequests
// ---------------------------------------------------------------------------

/// Pull requests keyed by `(repo_url, number)`.
#[derive(Debug, Default)]
pub struct MemoryPullRequests {
    prs: Mutex<HashMap<(String, u64), PullRequest>>,
    created: Mutex<Vec<(String, NewPullRequest)>>,
}

impl MemoryPullRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repo_url: &str, pr: PullRequest) {
        self.prs
            .lock()
            .unwrap()
            .insert((repo_url.to_string(), pr.number), pr);
    }

    pub fn created(&self) -> Vec<(String, NewPullRequest)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestClient for MemoryPullRequests {
    async fn create_pull_request(
        &self,
        repo_url: &str,
        _credentials: Option<&Credentials>,
        request: NewPullRequest,
    ) -> CollaboratorResult<PullRequest> {
        let mut prs = self.prs.lock().unwrap();
        let number = prs
            .keys()
            .filter(|(repo, _)| repo == repo_url)
            .map(|(_, n)| *n)
            .max()
            .unwrap_or(0)
            + 1;
        let pr = PullRequest {
            number,
            url: format!("{}/pull/{}", repo_url.trim_end_matches('/'), number),
            state: PullRequestState::Open,
            merge_commit: None,
        };
        prs.insert((repo_url.to_string(), number), pr.clone());
        self.created
            .lock()
            .unwrap()
            .push((repo_url.to_string(), request));
        Ok(pr)
    }

    async fn get_pull_request(
        &self,
        repo_url: &str,
        _credentials: Option<&Credentials>,
        number: u64,
    ) -> CollaboratorResult<PullRequest> {
        let prs = self.prs.lock().unwrap();
        prs.get(&(repo_url.to_string(), number))
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("pull request {repo_url}#{number}")))
    }
}

// ---------------------------------------------------------------------------
// RecordingHelmClient
// ---------------------------------------------------------------------------

/// Helm client that records calls.
///
/// `template` returns a canned manifest; `update_dependencies` writes the
/// configured `Chart.lock` contents (if any) into the chart directory.
#[derive(Debug, Default)]
pub struct RecordingHelmClient {
    manifest: Mutex<String>,
    lock_contents: Mutex<Option<String>>,
    fail_update: Mutex<Option<String>>,
    templates: Mutex<Vec<TemplateRequest>>,
    updates: Mutex<Vec<DependencyUpdateRequest>>,
    logins: Mutex<Vec<(PathBuf, String, String)>>,
}

impl RecordingHelmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(self, manifest: &str) -> Self {
        *self.manifest.lock().unwrap() = manifest.to_string();
        self
    }

    pub fn with_lock_file(self, contents: &str) -> Self {
        *self.lock_contents.lock().unwrap() = Some(contents.to_string());
        self
    }

    pub fn fail_update(&self, message: &str) {
        *self.fail_update.lock().unwrap() = Some(message.to_string());
    }

    pub fn templates(&self) -> Vec<TemplateRequest> {
        self.templates.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<DependencyUpdateRequest> {
        self.updates.lock().unwrap().clone()
    }

    /// `(registry_config, host, username)` per login.
    pub fn logins(&self) -> Vec<(PathBuf, String, String)> {
        self.logins.lock().unwrap().clone()
    }
}

#[async_trait]
impl HelmClient for RecordingHelmClient {
    async fn template(&self, request: TemplateRequest) -> CollaboratorResult<String> {
        self.templates.lock().unwrap().push(request);
        Ok(self.manifest.lock().unwrap().clone())
    }

    async fn update_dependencies(
        &self,
        request: DependencyUpdateRequest,
    ) -> CollaboratorResult<()> {
        if let Some(msg) = self.fail_update.lock().unwrap().clone() {
            return Err(CollaboratorError::Command {
                command: "helm dependency update".to_string(),
                exit_code: 1,
                stderr: msg,
            });
        }
        let lock = self.lock_contents.lock().unwrap().clone();
        if let Some(contents) = lock {
            std::fs::write(request.chart_path.join("Chart.lock"), contents)?;
        }
        self.updates.lock().unwrap().push(request);
        Ok(())
    }

    async fn registry_login(
        &self,
        registry_config: &Path,
        host: &str,
        credentials: &Credentials,
    ) -> CollaboratorResult<()> {
        self.logins.lock().unwrap().push((
            registry_config.to_path_buf(),
            host.to_string(),
            credentials.username.clone(),
        ));
        Ok(())
    }
}
