//! `git-open-pr`: open a pull request from a pushed branch.

use std::sync::Arc;

use async_trait::async_trait;
use promoter_state::{CredentialType, NewPullRequest, PullRequestClient};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::{Directive, StepReference};
use crate::error::{ConfigError, DirectiveError};

const NAME: &str = "git-open-pr";

/// Output key of `git-push` holding the pushed branch.
const BRANCH_OUTPUT: &str = "branch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceBranch {
    Named(String),
    /// The `branch` output of an earlier step.
    FromStep(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawGitOpenPrConfig")]
pub struct GitOpenPrConfig {
    pub repo_url: String,
    pub source: SourceBranch,
    pub target_branch: String,
    pub title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGitOpenPrConfig {
    #[serde(rename = "repoURL")]
    repo_url: String,
    #[serde(default)]
    source_branch: Option<String>,
    #[serde(default)]
    source_branch_from_step: Option<String>,
    target_branch: String,
    #[serde(default)]
    title: Option<String>,
}

impl TryFrom<RawGitOpenPrConfig> for GitOpenPrConfig {
    type Error = String;

    fn try_from(raw: RawGitOpenPrConfig) -> Result<Self, Self::Error> {
        let source = match (raw.source_branch, raw.source_branch_from_step) {
            (Some(branch), None) => SourceBranch::Named(branch),
            (None, Some(alias)) => SourceBranch::FromStep(alias),
            _ => return Err("exactly one of sourceBranch or sourceBranchFromStep is required".into()),
        };
        Ok(Self {
            repo_url: raw.repo_url,
            source,
            target_branch: raw.target_branch,
            title: raw.title.filter(|t| !t.is_empty()),
        })
    }
}

pub struct GitOpenPr {
    schema: ConfigSchema,
    pull_requests: Arc<dyn PullRequestClient>,
}

impl GitOpenPr {
    pub fn new(pull_requests: Arc<dyn PullRequestClient>) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/git-open-pr-config.json"),
            )?,
            pull_requests,
        })
    }
}

#[async_trait]
impl Directive for GitOpenPr {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn step_references(&self, config: &Value) -> Vec<StepReference> {
        config
            .get("sourceBranchFromStep")
            .and_then(Value::as_str)
            .map(|alias| vec![StepReference::new(alias, BRANCH_OUTPUT)])
            .unwrap_or_default()
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: GitOpenPrConfig = bind(NAME, config)?;

        let source_branch = match &cfg.source {
            SourceBranch::Named(branch) => branch.clone(),
            SourceBranch::FromStep(alias) => ctx
                .state
                .output(alias, BRANCH_OUTPUT)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    DirectiveError::invalid_content(
                        format!("error reading output of step {alias:?}"),
                        "branch is not a string",
                    )
                })?,
        };

        let credentials = match ctx.credentials() {
            Some(db) => db
                .get(ctx.project(), CredentialType::Git, &cfg.repo_url)
                .await
                .map_err(|e| {
                    DirectiveError::collaborator(
                        format!("error obtaining credentials for git repo {:?}", cfg.repo_url),
                        e,
                    )
                })?,
            None => None,
        };

        let title = cfg.title.clone().unwrap_or_else(|| {
            format!(
                "Promote {} to stage {}",
                ctx.promotion.promotion, ctx.promotion.stage
            )
        });
        let pr = self
            .pull_requests
            .create_pull_request(
                &cfg.repo_url,
                credentials.as_ref(),
                NewPullRequest {
                    source_branch,
                    target_branch: cfg.target_branch.clone(),
                    title,
                },
            )
            .await
            .map_err(|e| {
                DirectiveError::collaborator(
                    format!("error opening pull request in {:?}", cfg.repo_url),
                    e,
                )
            })?;

        info!(repo_url = %cfg.repo_url, pr = pr.number, url = %pr.url, "opened pull request");
        Ok(StepResult::success()
            .with_output("prNumber", pr.number)
            .with_output("prURL", pr.url))
    }
}
