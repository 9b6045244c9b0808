//! `helm-template`: render a chart to plain manifests without a cluster.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use promoter_state::{HelmClient, TemplateRequest};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::chart::{read_chart_metadata, ChartMetadata, CHART_FILE};
use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::Directive;
use crate::error::{ConfigError, DirectiveError};
use crate::workdir::write_private;

const NAME: &str = "helm-template";
const DEFAULT_RELEASE_NAME: &str = "release-name";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmTemplateConfig {
    pub path: String,
    pub out_path: String,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub values_files: Vec<String>,
    #[serde(default, rename = "includeCRDs")]
    pub include_crds: bool,
    #[serde(default)]
    pub kube_version: Option<String>,
    #[serde(default)]
    pub api_versions: Vec<String>,
}

pub struct HelmTemplate {
    schema: ConfigSchema,
    helm: Arc<dyn HelmClient>,
}

impl HelmTemplate {
    pub fn new(helm: Arc<dyn HelmClient>) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/helm-template-config.json"),
            )?,
            helm,
        })
    }
}

/// Merge `overlay` into `base`: maps merge key by key, anything else is
/// replaced.
fn merge_values(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_values(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Merge values files in order; later files take precedence.
fn compose_values(files: &[(String, PathBuf)]) -> Result<Value, DirectiveError> {
    let mut composed = Map::new();
    for (name, path) in files {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectiveError::io(format!("failed to read values file {name:?}"), e))?;
        let parsed: Value = serde_yaml::from_str(&raw).map_err(|e| {
            DirectiveError::invalid_content(format!("failed to parse values file {name:?}"), e)
        })?;
        match parsed {
            Value::Object(map) => merge_values(&mut composed, map),
            Value::Null => {}
            _ => {
                return Err(DirectiveError::invalid_content(
                    format!("failed to parse values file {name:?}"),
                    "top level is not a map",
                ))
            }
        }
    }
    Ok(Value::Object(composed))
}

/// Names of the charts vendored under `<chart_dir>/charts`.
fn vendored_dependencies(chart_dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let charts_dir = chart_dir.join("charts");
    let entries = match std::fs::read_dir(&charts_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Ok(metadata) = read_chart_metadata(&path.join(CHART_FILE)) {
                names.insert(metadata.name);
            }
        } else if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(stem) = file_name.strip_suffix(".tgz") {
                names.insert(stem.to_string());
            }
        }
    }
    Ok(names)
}

/// Fail when `Chart.yaml` declares a dependency that is not vendored.
fn check_dependencies(metadata: &ChartMetadata, chart_dir: &Path) -> Result<(), DirectiveError> {
    if metadata.dependencies.is_empty() {
        return Ok(());
    }
    let vendored = vendored_dependencies(chart_dir)
        .map_err(|e| DirectiveError::io("failed to read charts/ directory", e))?;
    let missing: Vec<&str> = metadata
        .dependencies
        .iter()
        .filter(|dep| {
            !vendored.contains(&dep.name)
                && !vendored.contains(&format!("{}-{}", dep.name, dep.version))
                && !vendored
                    .iter()
                    .any(|v| v.strip_prefix(&format!("{}-", dep.name)).is_some_and(is_version))
        })
        .map(|dep| dep.name.as_str())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(DirectiveError::invalid_content(
        "missing chart dependencies",
        format!(
            "found in Chart.yaml, but missing in charts/ directory: {}",
            missing.join(", ")
        ),
    ))
}

/// Whether `s` looks like a chart version (`1.2.3`, `0.1.0-rc.1`, ...).
fn is_version(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Validate a Kubernetes version such as `1.29`, `v1.29.0` or `1.30.0-rc.1`.
fn parse_kube_version(raw: &str) -> Result<String, DirectiveError> {
    let invalid = || {
        DirectiveError::invalid_content(
            format!("failed to parse Kubernetes version {raw:?}"),
            "expected MAJOR[.MINOR[.PATCH]]",
        )
    };
    let trimmed = raw.trim().trim_start_matches('v');
    let core = trimmed
        .split(|c| c == '-' || c == '+')
        .next()
        .unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(invalid());
    }
    Ok(format!("v{trimmed}"))
}

#[async_trait]
impl Directive for HelmTemplate {
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
        let cfg: HelmTemplateConfig = bind(NAME, config)?;
        let work_dir = ctx.work_dir();

        let values_files = cfg
            .values_files
            .iter()
            .map(|f| -> Result<_, DirectiveError> { Ok((f.clone(), work_dir.join(f)?)) })
            .collect::<Result<Vec<_>, DirectiveError>>()?;
        let values = compose_values(&values_files)?;

        let chart_dir = work_dir.join(&cfg.path)?;
        let metadata = read_chart_metadata(&chart_dir.join(CHART_FILE)).map_err(|e| {
            DirectiveError::invalid_content(format!("failed to load chart from {:?}", cfg.path), e)
        })?;
        check_dependencies(&metadata, &chart_dir)?;

        let kube_version = cfg
            .kube_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(parse_kube_version)
            .transpose()?;

        let manifest = self
            .helm
            .template(TemplateRequest {
                chart_path: chart_dir,
                release_name: cfg
                    .release_name
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| DEFAULT_RELEASE_NAME.to_string()),
                namespace: cfg
                    .namespace
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| ctx.project().to_string()),
                values,
                include_crds: cfg.include_crds,
                kube_version,
                api_versions: cfg.api_versions.clone(),
            })
            .await
            .map_err(|e| DirectiveError::collaborator("failed to render chart", e))?;

        let out_path = work_dir.join(&cfg.out_path)?;
        write_private(&out_path, manifest.as_bytes())
            .map_err(|e| DirectiveError::io("failed to write rendered chart", e))?;
        debug!(chart = %cfg.path, out_path = %cfg.out_path, bytes = manifest.len(), "rendered chart");
        Ok(StepResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::chart::ChartDependency;
    use serde_json::json;

    #[test]
    fn test_merge_values_is_deep() {
        let mut base = json!({"image": {"repo": "nginx", "tag": "1.0"}, "replicas": 1})
            .as_object()
            .cloned()
            .unwrap();
        let overlay = json!({"image": {"tag": "2.0"}, "replicas": 3, "extra": [1]})
            .as_object()
            .cloned()
            .unwrap();
        merge_values(&mut base, overlay);
        assert_eq!(
            Value::Object(base),
            json!({"image": {"repo": "nginx", "tag": "2.0"}, "replicas": 3, "extra": [1]})
        );
    }

    #[test]
    fn test_compose_values_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        let empty = dir.path().join("empty.yaml");
        std::fs::write(&a, "image:\n  tag: one\nreplicas: 1\n").unwrap();
        std::fs::write(&b, "image:\n  tag: two\n").unwrap();
        std::fs::write(&empty, "").unwrap();
        let values = compose_values(&[
            ("a.yaml".to_string(), a),
            ("empty.yaml".to_string(), empty),
            ("b.yaml".to_string(), b),
        ])
        .unwrap();
        assert_eq!(values, json!({"image": {"tag": "two"}, "replicas": 1}));
    }

    #[test]
    fn test_compose_values_rejects_scalar_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        std::fs::write(&a, "just a string\n").unwrap();
        let err = compose_values(&[("a.yaml".to_string(), a)]).unwrap_err();
        assert!(err.to_string().contains("failed to parse values file"));
    }

    #[test]
    fn test_check_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = ChartMetadata {
            name: "app".to_string(),
            version: "0.1.0".to_string(),
            dependencies: vec![
                ChartDependency {
                    name: "redis".to_string(),
                    version: "18.0.0".to_string(),
                    ..Default::default()
                },
                ChartDependency {
                    name: "common".to_string(),
                    version: "2.x.x".to_string(),
                    ..Default::default()
                },
            ],
        };
        let err = check_dependencies(&metadata, dir.path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("found in Chart.yaml, but missing in charts/ directory: redis, common"));

        let charts = dir.path().join("charts");
        std::fs::create_dir_all(charts.join("common")).unwrap();
        std::fs::write(
            charts.join("common").join(CHART_FILE),
            "name: common\nversion: 2.1.0\n",
        )
        .unwrap();
        std::fs::write(charts.join("redis-18.0.0.tgz"), b"archive").unwrap();
        check_dependencies(&metadata, dir.path()).unwrap();
    }

    #[test]
    fn test_parse_kube_version() {
        assert_eq!(parse_kube_version("1.29").unwrap(), "v1.29");
        assert_eq!(parse_kube_version("v1.29.3").unwrap(), "v1.29.3");
        assert_eq!(parse_kube_version("1.30.0-rc.1").unwrap(), "v1.30.0-rc.1");
        assert!(parse_kube_version("one.two").is_err());
        assert!(parse_kube_version("1.2.3.4").is_err());
    }
}
