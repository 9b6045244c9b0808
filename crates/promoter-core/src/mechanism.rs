//! Render mechanism: hand each configured Git repository to an external
//! render-and-commit service and record what it committed.
//!
//! Updates run in declared order. The first failure stops the run and the
//! state as updated so far is returned alongside the error.

use std::sync::Arc;

use promoter_state::{
    CredentialType, CredentialsDb, Image, RenderAction, RenderRequest, RenderService, StageState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::MechanismError;
use crate::freight::normalize_git_url;

/// Marker that a Git repository update is handled by the render mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {}

/// How one Git repository is updated during a promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoUpdate {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Branch to read configuration from. Empty means the commit the stage
    /// state holds for this repository.
    #[serde(default)]
    pub read_branch: String,
    #[serde(default)]
    pub write_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderConfig>,
}

impl GitRepoUpdate {
    pub fn new(repo_url: impl Into<String>, write_branch: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            write_branch: write_branch.into(),
            render: Some(RenderConfig::default()),
            ..Default::default()
        }
    }

    pub fn with_read_branch(mut self, branch: impl Into<String>) -> Self {
        self.read_branch = branch.into();
        self
    }
}

/// A render result this mechanism does not act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnhandledRender {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub action: RenderAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    pub state: StageState,
    /// Updates whose action (an opened pull request) left the state as is.
    pub unhandled: Vec<UnhandledRender>,
}

/// A promotion that stopped part way; `state` holds every update applied
/// before `repo_url` failed.
#[derive(Error, Debug)]
#[error("render mechanism stopped at {repo_url:?}: {source}")]
pub struct PartialRender {
    pub state: StageState,
    pub repo_url: String,
    #[source]
    pub source: MechanismError,
}

/// Read ref for `update`, plus the index of the stage-state commit it came
/// from when read from that commit.
fn read_ref(
    update: &GitRepoUpdate,
    state: &StageState,
) -> Result<(String, Option<usize>), MechanismError> {
    if !update.read_branch.is_empty() {
        return Ok((update.read_branch.clone(), None));
    }
    let wanted = normalize_git_url(&update.repo_url);
    state
        .commits
        .iter()
        .position(|c| normalize_git_url(&c.repo_url) == wanted)
        .map(|i| (state.commits[i].id.clone(), Some(i)))
        .ok_or_else(|| MechanismError::NoCommitForRepo {
            repo_url: update.repo_url.clone(),
        })
}

pub struct RenderMechanism {
    credentials: Arc<dyn CredentialsDb>,
    renderer: Arc<dyn RenderService>,
}

impl std::fmt::Debug for RenderMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderMechanism").finish_non_exhaustive()
    }
}

impl RenderMechanism {
    pub fn new(credentials: Arc<dyn CredentialsDb>, renderer: Arc<dyn RenderService>) -> Self {
        Self {
            credentials,
            renderer,
        }
    }

    /// Apply every update that carries a render config.
    #[instrument(skip(self, updates, state), fields(updates = updates.len()))]
    pub async fn promote(
        &self,
        namespace: &str,
        updates: &[GitRepoUpdate],
        state: &StageState,
    ) -> Result<RenderOutcome, PartialRender> {
        let mut outcome = RenderOutcome {
            state: state.clone(),
            unhandled: Vec::new(),
        };
        let images: Vec<String> = state.images.iter().map(Image::reference).collect();

        for update in updates.iter().filter(|u| u.render.is_some()) {
            if let Err(source) = self
                .apply(namespace, update, &images, &mut outcome)
                .await
            {
                return Err(PartialRender {
                    state: outcome.state,
                    repo_url: update.repo_url.clone(),
                    source,
                });
            }
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        namespace: &str,
        update: &GitRepoUpdate,
        images: &[String],
        outcome: &mut RenderOutcome,
    ) -> Result<(), MechanismError> {
        let (read_ref, commit_index) = read_ref(update, &outcome.state)?;

        let repo_creds = self
            .credentials
            .get(namespace, CredentialType::Git, &update.repo_url)
            .await
            .map_err(|source| MechanismError::Credentials {
                repo_url: update.repo_url.clone(),
                source,
            })?;
        if repo_creds.is_none() {
            debug!(repo_url = %update.repo_url, "no credentials for git repo; rendering anonymously");
        }

        let response = self
            .renderer
            .render(RenderRequest {
                repo_url: update.repo_url.clone(),
                repo_creds: repo_creds.unwrap_or_default(),
                read_ref,
                images: images.to_vec(),
                target_branch: update.write_branch.clone(),
            })
            .await
            .map_err(|source| MechanismError::Render {
                repo_url: update.repo_url.clone(),
                source,
            })?;

        match response.action_taken {
            RenderAction::PushedDirectly | RenderAction::None => {
                debug!(
                    repo_url = %update.repo_url,
                    commit = %response.commit_id,
                    action = ?response.action_taken,
                    "rendered manifests"
                );
                if let Some(i) = commit_index {
                    outcome.state.commits[i].health_check_commit = Some(response.commit_id);
                }
            }
            action @ RenderAction::OpenedPr { .. } => {
                warn!(repo_url = %update.repo_url, ?action, "render opened a pull request; state left unchanged");
                outcome.unhandled.push(UnhandledRender {
                    repo_url: update.repo_url.clone(),
                    action,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promoter_state::fakes::{MemoryCredentialsDb, ScriptedRenderService};
    use promoter_state::{CollaboratorError, Credentials, GitCommit, RenderResponse};

    const REPO: &str = "https://github.com/org/config";

    fn state() -> StageState {
        StageState {
            commits: vec![
                GitCommit::new("https://github.com/org/other", "0000"),
                GitCommit::new(REPO, "abc123"),
            ],
            images: vec![Image::new("nginx", "1.25")],
            charts: Vec::new(),
        }
    }

    fn mechanism(
        creds: Arc<MemoryCredentialsDb>,
        renderer: Arc<ScriptedRenderService>,
    ) -> RenderMechanism {
        RenderMechanism::new(creds, renderer)
    }

    #[tokio::test]
    async fn test_pushed_directly_sets_health_check_commit() {
        let creds = Arc::new(MemoryCredentialsDb::new());
        creds.insert("proj", CredentialType::Git, REPO, Credentials::basic("bot", "s3cret"));
        let renderer = Arc::new(ScriptedRenderService::new());
        renderer.push_response(RenderResponse {
            commit_id: "def456".to_string(),
            action_taken: RenderAction::PushedDirectly,
        });

        let outcome = mechanism(creds, Arc::clone(&renderer))
            .promote("proj", &[GitRepoUpdate::new(REPO, "env/prod")], &state())
            .await
            .unwrap();

        assert_eq!(
            outcome.state.commits[1].health_check_commit.as_deref(),
            Some("def456")
        );
        assert_eq!(outcome.state.commits[1].desired_revision(), "def456");
        assert_eq!(outcome.state.commits[0].health_check_commit, None);

        let requests = renderer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].read_ref, "abc123");
        assert_eq!(requests[0].target_branch, "env/prod");
        assert_eq!(requests[0].images, vec!["nginx:1.25".to_string()]);
        assert_eq!(requests[0].repo_creds.username, "bot");
    }

    #[tokio::test]
    async fn test_no_change_still_records_commit() {
        let renderer = Arc::new(ScriptedRenderService::new());
        renderer.push_response(RenderResponse {
            commit_id: "same".to_string(),
            action_taken: RenderAction::None,
        });
        let outcome = mechanism(Arc::new(MemoryCredentialsDb::new()), Arc::clone(&renderer))
            .promote("proj", &[GitRepoUpdate::new(REPO, "env/prod")], &state())
            .await
            .unwrap();
        assert_eq!(
            outcome.state.commits[1].health_check_commit.as_deref(),
            Some("same")
        );
        assert_eq!(renderer.requests()[0].repo_creds, Credentials::default());
    }

    #[tokio::test]
    async fn test_read_branch_leaves_commits_untouched() {
        let renderer = Arc::new(ScriptedRenderService::new());
        let update = GitRepoUpdate::new(REPO, "env/prod").with_read_branch("main");
        let outcome = mechanism(Arc::new(MemoryCredentialsDb::new()), Arc::clone(&renderer))
            .promote("proj", &[update], &state())
            .await
            .unwrap();
        assert_eq!(outcome.state, state());
        assert_eq!(renderer.requests()[0].read_ref, "main");
    }

    #[tokio::test]
    async fn test_opened_pr_is_unhandled() {
        let renderer = Arc::new(ScriptedRenderService::new());
        renderer.push_response(RenderResponse {
            commit_id: String::new(),
            action_taken: RenderAction::OpenedPr {
                url: "https://github.com/org/config/pull/9".to_string(),
            },
        });
        let outcome = mechanism(Arc::new(MemoryCredentialsDb::new()), renderer)
            .promote("proj", &[GitRepoUpdate::new(REPO, "env/prod")], &state())
            .await
            .unwrap();
        assert_eq!(outcome.state, state());
        assert_eq!(outcome.unhandled.len(), 1);
        assert_eq!(outcome.unhandled[0].repo_url, REPO);
    }

    #[tokio::test]
    async fn test_updates_without_render_config_are_skipped() {
        let renderer = Arc::new(ScriptedRenderService::new());
        let update = GitRepoUpdate {
            render: None,
            ..GitRepoUpdate::new(REPO, "env/prod")
        };
        let outcome = mechanism(Arc::new(MemoryCredentialsDb::new()), Arc::clone(&renderer))
            .promote("proj", &[update], &state())
            .await
            .unwrap();
        assert_eq!(outcome.state, state());
        assert!(renderer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_returns_partial_state() {
        let renderer = Arc::new(ScriptedRenderService::new());
        renderer.push_response(RenderResponse {
            commit_id: "first".to_string(),
            action_taken: RenderAction::PushedDirectly,
        });
        renderer.push_error(CollaboratorError::Rejected("branch protected".to_string()));

        let updates = vec![
            GitRepoUpdate::new(REPO, "env/prod"),
            GitRepoUpdate::new("https://github.com/org/other", "env/prod"),
            GitRepoUpdate::new("https://github.com/org/third", "env/prod"),
        ];
        let err = mechanism(Arc::new(MemoryCredentialsDb::new()), Arc::clone(&renderer))
            .promote("proj", &updates, &state())
            .await
            .unwrap_err();

        assert_eq!(err.repo_url, "https://github.com/org/other");
        assert!(matches!(err.source, MechanismError::Render { .. }));
        assert_eq!(
            err.state.commits[1].health_check_commit.as_deref(),
            Some("first")
        );
        assert_eq!(renderer.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_commit_for_repo() {
        let renderer = Arc::new(ScriptedRenderService::new());
        let err = mechanism(Arc::new(MemoryCredentialsDb::new()), renderer)
            .promote(
                "proj",
                &[GitRepoUpdate::new("https://github.com/org/unknown", "main")],
                &state(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.source, MechanismError::NoCommitForRepo { .. }));
    }
}
