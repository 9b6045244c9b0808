//! `git-wait-for-pr`: check once whether a pull request has been merged.
//!
//! The check never blocks. An open pull request yields a `Failure` result so
//! the promotion can be retried later; a merged one yields the merge commit.

use std::sync::Arc;

use async_trait::async_trait;
use promoter_state::{CredentialType, PullRequestClient, PullRequestState};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::{Directive, StepReference};
use crate::error::{ConfigError, DirectiveError};

const NAME: &str = "git-wait-for-pr";

/// Output key of `git-open-pr` holding the pull request number.
const PR_NUMBER_OUTPUT: &str = "prNumber";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrNumber {
    Literal(u64),
    /// The `prNumber` output of an earlier step.
    FromStep(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawGitWaitForPrConfig")]
pub struct GitWaitForPrConfig {
    pub repo_url: String,
    pub pr: PrNumber,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGitWaitForPrConfig {
    #[serde(rename = "repoURL")]
    repo_url: String,
    #[serde(default)]
    pr_number: Option<u64>,
    #[serde(default)]
    pr_number_from_step: Option<String>,
}

impl TryFrom<RawGitWaitForPrConfig> for GitWaitForPrConfig {
    type Error = String;

    fn try_from(raw: RawGitWaitForPrConfig) -> Result<Self, Self::Error> {
        let pr = match (raw.pr_number, raw.pr_number_from_step) {
            (Some(number), None) => PrNumber::Literal(number),
            (None, Some(alias)) => PrNumber::FromStep(alias),
            _ => return Err("exactly one of prNumber or prNumberFromStep is required".into()),
        };
        Ok(Self {
            repo_url: raw.repo_url,
            pr,
        })
    }
}

pub struct GitWaitForPr {
    schema: ConfigSchema,
    pull_requests: Arc<dyn PullRequestClient>,
}

impl GitWaitForPr {
    pub fn new(pull_requests: Arc<dyn PullRequestClient>) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/git-wait-for-pr-config.json"),
            )?,
            pull_requests,
        })
    }
}

#[async_trait]
impl Directive for GitWaitForPr {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn step_references(&self, config: &Value) -> Vec<StepReference> {
        config
            .get("prNumberFromStep")
            .and_then(Value::as_str)
            .map(|alias| vec![StepReference::new(alias, PR_NUMBER_OUTPUT)])
            .unwrap_or_default()
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: GitWaitForPrConfig = bind(NAME, config)?;

        let number = match &cfg.pr {
            PrNumber::Literal(n) => *n,
            PrNumber::FromStep(alias) => ctx
                .state
                .output(alias, PR_NUMBER_OUTPUT)
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    DirectiveError::invalid_content(
                        format!("error reading output of step {alias:?}"),
                        "prNumber is not a positive integer",
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

        let pr = self
            .pull_requests
            .get_pull_request(&cfg.repo_url, credentials.as_ref(), number)
            .await
            .map_err(|e| {
                DirectiveError::collaborator(
                    format!("error getting pull request {number} from {:?}", cfg.repo_url),
                    e,
                )
            })?;

        match pr.state {
            PullRequestState::Open => Ok(StepResult::failure(format!(
                "pull request {number} is not yet merged"
            ))),
            PullRequestState::Closed => Ok(StepResult::failure(format!(
                "pull request {number} was closed without being merged"
            ))),
            PullRequestState::Merged => {
                info!(repo_url = %cfg.repo_url, pr = number, "pull request merged");
                let mut result = StepResult::success();
                if let Some(commit) = pr.merge_commit {
                    result = result.with_output("commit", commit);
                }
                Ok(result)
            }
        }
    }
}
