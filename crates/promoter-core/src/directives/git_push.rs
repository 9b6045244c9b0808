//! `git-push`: push the HEAD of a work tree to a remote branch.

use std::sync::Arc;

use async_trait::async_trait;
use promoter_state::{CredentialType, GitClient, PushOptions};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::Directive;
use crate::error::{ConfigError, DirectiveError};

const NAME: &str = "git-push";

/// Where a push goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTarget {
    Branch(String),
    /// A branch named after the promotion.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawGitPushConfig")]
pub struct GitPushConfig {
    pub path: String,
    pub target: PushTarget,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGitPushConfig {
    path: String,
    #[serde(default)]
    target_branch: Option<String>,
    #[serde(default)]
    generate_target_branch: bool,
}

impl TryFrom<RawGitPushConfig> for GitPushConfig {
    type Error = String;

    fn try_from(raw: RawGitPushConfig) -> Result<Self, Self::Error> {
        let target = match (raw.target_branch, raw.generate_target_branch) {
            (Some(branch), false) => PushTarget::Branch(branch),
            (None, true) => PushTarget::Generated,
            (Some(_), true) => {
                return Err("targetBranch and generateTargetBranch are mutually exclusive".into())
            }
            (None, false) => {
                return Err("one of targetBranch or generateTargetBranch is required".into())
            }
        };
        Ok(Self {
            path: raw.path,
            target,
        })
    }
}

/// Branch `generateTargetBranch` pushes to.
pub fn generated_branch_name(promotion: &str) -> String {
    format!("promoter/promotion/{promotion}")
}

pub struct GitPush {
    schema: ConfigSchema,
    git: Arc<dyn GitClient>,
}

impl GitPush {
    pub fn new(git: Arc<dyn GitClient>) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/git-push-config.json"),
            )?,
            git,
        })
    }
}

#[async_trait]
impl Directive for GitPush {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: GitPushConfig = bind(NAME, config)?;
        let work_tree = ctx.work_dir().join(&cfg.path)?;

        let target_branch = match cfg.target {
            PushTarget::Branch(branch) => branch,
            PushTarget::Generated => generated_branch_name(&ctx.promotion.promotion),
        };

        let credentials = match ctx.credentials() {
            Some(db) => {
                let remote = self.git.remote_url(&work_tree).await.map_err(|e| {
                    DirectiveError::collaborator(
                        format!("error reading remote of {:?}", cfg.path),
                        e,
                    )
                })?;
                db.get(ctx.project(), CredentialType::Git, &remote)
                    .await
                    .map_err(|e| {
                        DirectiveError::collaborator(
                            format!("error obtaining credentials for git repo {remote:?}"),
                            e,
                        )
                    })?
            }
            None => None,
        };

        let local_branch = self.git.current_branch(&work_tree).await.map_err(|e| {
            DirectiveError::collaborator(format!("error reading branch of {:?}", cfg.path), e)
        })?;

        let outcome = self
            .git
            .push(PushOptions {
                work_tree,
                target_branch: target_branch.clone(),
                credentials,
            })
            .await
            .map_err(|e| {
                DirectiveError::collaborator(format!("error pushing to {target_branch:?}"), e)
            })?;

        info!(
            local_branch = %local_branch,
            branch = %outcome.branch,
            commit = %outcome.commit,
            "pushed work tree"
        );
        Ok(StepResult::success()
            .with_output("branch", outcome.branch)
            .with_output("commit", outcome.commit))
    }
}
