//! `argocd-desired-revisions`: report the revision each source of one or
//! more Argo CD Applications should be synced to after this promotion.

use std::collections::BTreeMap;

use async_trait::async_trait;
use promoter_state::{FreightOrigin, FreightRequest};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::{Capability, Directive};
use crate::error::{ConfigError, DirectiveError};
use crate::freight::{SourceUpdate, UpdatePolicy};
use crate::revision::{resolve_application_revisions, StagePolicy};

const NAME: &str = "argocd-desired-revisions";
const DEFAULT_NAMESPACE: &str = "argocd";

/// Origin override for one source of an Application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceOverride {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub chart: Option<String>,
    #[serde(default, rename = "fromOrigin")]
    pub origin: Option<FreightOrigin>,
}

impl From<&SourceOverride> for SourceUpdate {
    fn from(source: &SourceOverride) -> Self {
        SourceUpdate {
            repo_url: source.repo_url.clone(),
            chart: source.chart.clone(),
            origin: source.origin.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppRevisionsConfig {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, rename = "fromOrigin")]
    pub origin: Option<FreightOrigin>,
    #[serde(default)]
    pub sources: Vec<SourceOverride>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArgoCdDesiredRevisionsConfig {
    #[serde(default, rename = "fromOrigin")]
    pub origin: Option<FreightOrigin>,
    pub apps: Vec<AppRevisionsConfig>,
}

impl ArgoCdDesiredRevisionsConfig {
    /// Stage policy for `app`: its own origin wins over the step-wide one.
    fn policy_for(&self, app: &AppRevisionsConfig, requests: &[FreightRequest]) -> StagePolicy {
        let origin = app.origin.clone().or_else(|| self.origin.clone());
        StagePolicy::new(requests.to_vec()).with_update(UpdatePolicy { origin })
    }
}

pub struct ArgoCdDesiredRevisions {
    schema: ConfigSchema,
}

impl ArgoCdDesiredRevisions {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/argocd-desired-revisions-config.json"),
            )?,
        })
    }
}

#[async_trait]
impl Directive for ArgoCdDesiredRevisions {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn required_capabilities(&self, _config: &Value) -> Vec<Capability> {
        vec![Capability::ArgoCdClient]
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: ArgoCdDesiredRevisionsConfig = bind(NAME, config)?;
        let argocd = ctx.require_argocd()?;

        let mut revisions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for app in &cfg.apps {
            let policy = cfg.policy_for(app, ctx.freight_requests());
            let overrides: Vec<SourceUpdate> = app.sources.iter().map(SourceUpdate::from).collect();
            let resolved = resolve_application_revisions(
                argocd,
                &app.namespace,
                &app.name,
                &policy,
                &overrides,
                ctx.freight(),
            )
            .await?;
            debug!(namespace = %app.namespace, app = %app.name, ?resolved, "desired revisions");
            revisions.insert(app.name.clone(), resolved);
        }

        let output: Map<String, Value> = revisions
            .into_iter()
            .map(|(name, revs)| (name, Value::from(revs)))
            .collect();
        Ok(StepResult::success().with_output("revisions", Value::Object(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_defaults_namespace() {
        let cfg: ArgoCdDesiredRevisionsConfig =
            bind(NAME, &json!({"apps": [{"name": "guestbook"}]})).unwrap();
        assert_eq!(cfg.apps[0].namespace, "argocd");
        assert!(cfg.apps[0].sources.is_empty());
        assert_eq!(cfg.origin, None);
    }

    #[test]
    fn test_app_origin_overrides_step_origin() {
        let cfg: ArgoCdDesiredRevisionsConfig = bind(
            NAME,
            &json!({
                "fromOrigin": {"kind": "Warehouse", "name": "step"},
                "apps": [
                    {"name": "a", "fromOrigin": {"kind": "Warehouse", "name": "app"}},
                    {"name": "b"}
                ]
            }),
        )
        .unwrap();
        let requests = vec![FreightRequest::direct(FreightOrigin::warehouse("x"))];
        assert_eq!(
            cfg.policy_for(&cfg.apps[0], &requests).update.origin,
            Some(FreightOrigin::warehouse("app"))
        );
        assert_eq!(
            cfg.policy_for(&cfg.apps[1], &requests).update.origin,
            Some(FreightOrigin::warehouse("step"))
        );
    }

    #[test]
    fn test_schema_rejects_unknown_origin_kind() {
        let directive = ArgoCdDesiredRevisions::new().unwrap();
        let err = directive
            .schema()
            .validate(&json!({
                "apps": [{"name": "a", "fromOrigin": {"kind": "Stage", "name": "x"}}]
            }))
            .unwrap_err();
        assert!(err.to_string().contains("invalid argocd-desired-revisions config"));
        assert!(directive.schema().validate(&json!({"apps": []})).is_err());
    }
}
