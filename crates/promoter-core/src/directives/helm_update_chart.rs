//! `helm-update-chart`: move chart dependencies to the versions carried by
//! the promotion's freight, then refresh `charts/` and `Chart.lock`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use promoter_state::{
    CredentialType, CredentialsDb, DependencyUpdateRequest, FreightCollection, FreightOrigin,
    FreightRequest, HelmClient,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::chart::{read_chart_lock, read_chart_metadata, ChartDependency, CHART_FILE};
use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::{Capability, Directive};
use crate::error::{ConfigError, DirectiveError};
use crate::freight::{find_chart, OriginPolicy, PolicyTarget, UpdatePolicy};
use crate::workdir::{create_private_dir_all, write_private};

const NAME: &str = "helm-update-chart";
const OCI_SCHEME: &str = "oci://";

/// One dependency to update, identified exactly as in `Chart.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartUpdate {
    pub repository: String,
    pub name: String,
    #[serde(default, rename = "fromOrigin", skip_serializing_if = "Option::is_none")]
    pub origin: Option<FreightOrigin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelmUpdateChartConfig {
    pub path: String,
    pub charts: Vec<ChartUpdate>,
}

pub struct HelmUpdateChart {
    schema: ConfigSchema,
    helm: Arc<dyn HelmClient>,
}

impl HelmUpdateChart {
    pub fn new(helm: Arc<dyn HelmClient>) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/helm-update-chart-config.json"),
            )?,
            helm,
        })
    }
}

/// Freight key for a dependency: OCI repositories fold the chart name into
/// the URL and leave the name empty.
pub fn normalize_chart_reference(repo_url: &str, chart: &str) -> (String, String) {
    if repo_url.starts_with(OCI_SCHEME) {
        return (
            format!("{}/{}", repo_url.trim_end_matches('/'), chart),
            String::new(),
        );
    }
    (repo_url.to_string(), chart.to_string())
}

/// Map each configured update that has a freight match onto the
/// `dependencies.<i>.version` path it changes.
fn process_chart_updates(
    freight: &FreightCollection,
    requests: &[FreightRequest],
    updates: &[ChartUpdate],
    dependencies: &[ChartDependency],
) -> Result<BTreeMap<String, String>, DirectiveError> {
    let mut changes = BTreeMap::new();
    for update in updates {
        let (repo_url, chart_name) = normalize_chart_reference(&update.repository, &update.name);
        let default = UpdatePolicy {
            origin: update.origin.clone(),
        };
        let policy = OriginPolicy::derive(PolicyTarget::Default(&default), requests);
        let Some(chart) = find_chart(&policy, freight, &repo_url, &chart_name)? else {
            debug!(repository = %update.repository, name = %update.name, "chart not found in freight");
            continue;
        };

        let index = dependencies
            .iter()
            .position(|d| d.repository == update.repository && d.name == update.name)
            .ok_or_else(|| {
                DirectiveError::invalid_content(
                    "failed to process chart updates",
                    format!(
                        "no dependency in Chart.yaml matched update with repository {:?} and name {:?}",
                        update.repository, update.name
                    ),
                )
            })?;
        changes.insert(format!("dependencies.{index}.version"), chart.version.clone());
    }
    Ok(changes)
}

/// Set a dotted path (`dependencies.0.version`) in a YAML document.
fn set_yaml_path(
    root: &mut serde_yaml::Value,
    path: &str,
    value: &str,
) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty path".to_string());
    };
    let mut node = root;
    for segment in parents {
        node = match node {
            serde_yaml::Value::Sequence(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| format!("{path}: no element {segment}"))?,
            serde_yaml::Value::Mapping(map) => map
                .get_mut(*segment)
                .ok_or_else(|| format!("{path}: no key {segment}"))?,
            _ => return Err(format!("{path}: {segment} is not a map or list")),
        };
    }
    match node {
        serde_yaml::Value::Mapping(map) => {
            map.insert(
                serde_yaml::Value::String((*last).to_string()),
                serde_yaml::Value::String(value.to_string()),
            );
            Ok(())
        }
        _ => Err(format!("{path}: parent of {last} is not a map")),
    }
}

fn apply_changes(chart_file: &Path, changes: &BTreeMap<String, String>) -> Result<(), DirectiveError> {
    let context = || format!("failed to update {}", chart_file.display());
    let raw = std::fs::read_to_string(chart_file).map_err(|e| DirectiveError::io(context(), e))?;
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|e| DirectiveError::invalid_content(context(), e))?;
    for (path, version) in changes {
        set_yaml_path(&mut doc, path, version)
            .map_err(|e| DirectiveError::invalid_content(context(), e))?;
    }
    let rendered =
        serde_yaml::to_string(&doc).map_err(|e| DirectiveError::invalid_content(context(), e))?;
    write_private(chart_file, rendered.as_bytes()).map_err(|e| DirectiveError::io(context(), e))
}

/// Per-dependency changes between two lock states: `"old -> new"` for an
/// update, `"new"` for an addition and `""` for a removal.
pub fn compare_chart_versions(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut changes = BTreeMap::new();
    for (name, new_version) in after {
        match before.get(name) {
            Some(old_version) if old_version == new_version => {}
            Some(old_version) => {
                changes.insert(name.clone(), format!("{old_version} -> {new_version}"));
            }
            None => {
                changes.insert(name.clone(), new_version.clone());
            }
        }
    }
    for name in before.keys() {
        if !after.contains_key(name) {
            changes.insert(name.clone(), String::new());
        }
    }
    changes
}

/// Commit message summarising `changes` for the chart at `path`. Empty when
/// nothing changed.
pub fn generate_commit_message(path: &str, changes: &BTreeMap<String, String>) -> String {
    if changes.is_empty() {
        return String::new();
    }
    let mut message = format!("Updated chart dependencies for {path}\n");
    for (name, change) in changes {
        let change = if change.is_empty() { "removed" } else { change };
        message.push_str(&format!("\n- {name}: {change}"));
    }
    message
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryFile {
    api_version: String,
    repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Serialize)]
struct RepositoryEntry {
    name: String,
    url: String,
    username: String,
    password: String,
}

/// Isolated Helm home for one dependency update.
struct HelmHome {
    dir: tempfile::TempDir,
}

impl HelmHome {
    fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        create_private_dir_all(&dir.path().join("registry"))?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn repository_config(&self) -> std::path::PathBuf {
        self.dir.path().join("repositories.yaml")
    }

    fn registry_config(&self) -> std::path::PathBuf {
        self.dir.path().join("registry").join("config.json")
    }
}

impl HelmUpdateChart {
    /// Register credentials for every dependency that has some: HTTP(S)
    /// repositories go into the repositories file, OCI registries get a
    /// login.
    async fn load_dependency_credentials(
        &self,
        credentials: &dyn CredentialsDb,
        project: &str,
        home: &HelmHome,
        dependencies: &[ChartDependency],
    ) -> Result<(), DirectiveError> {
        let mut repo_file = RepositoryFile {
            api_version: "v1".to_string(),
            ..Default::default()
        };

        for dep in dependencies {
            let lookup_key = if dep.repository.starts_with(OCI_SCHEME) {
                format!("{}/{}", dep.repository.trim_end_matches('/'), dep.name)
            } else if dep.repository.starts_with("https://") || dep.repository.starts_with("http://")
            {
                dep.repository.clone()
            } else {
                continue;
            };

            let creds = credentials
                .get(project, CredentialType::Helm, &lookup_key)
                .await
                .map_err(|e| {
                    DirectiveError::collaborator(
                        format!(
                            "failed to obtain credentials for chart repository {:?}",
                            dep.repository
                        ),
                        e,
                    )
                })?;
            let Some(creds) = creds else {
                continue;
            };

            if let Some(reference) = dep.repository.strip_prefix(OCI_SCHEME) {
                let host = reference.split('/').next().unwrap_or(reference);
                self.helm
                    .registry_login(&home.registry_config(), host, &creds)
                    .await
                    .map_err(|e| {
                        DirectiveError::collaborator(
                            format!("failed to log in to registry {host:?}"),
                            e,
                        )
                    })?;
            } else {
                repo_file.repositories.push(RepositoryEntry {
                    name: dep.repository.clone(),
                    url: dep.repository.clone(),
                    username: creds.username,
                    password: creds.password,
                });
            }
        }

        let rendered = serde_yaml::to_string(&repo_file)
            .map_err(|e| DirectiveError::invalid_content("failed to write repositories file", e))?;
        write_private(&home.repository_config(), rendered.as_bytes())
            .map_err(|e| DirectiveError::io("failed to write repositories file", e))
    }

    /// Run `helm dependency update` and report how `Chart.lock` changed.
    async fn update_dependencies(
        &self,
        credentials: &dyn CredentialsDb,
        project: &str,
        chart_dir: &Path,
        dependencies: &[ChartDependency],
    ) -> Result<BTreeMap<String, String>, DirectiveError> {
        let before = read_chart_lock(chart_dir)?;

        let home = HelmHome::new()
            .map_err(|e| DirectiveError::io("failed to create Helm home directory", e))?;
        self.load_dependency_credentials(credentials, project, &home, dependencies)
            .await?;

        self.helm
            .update_dependencies(DependencyUpdateRequest {
                chart_path: chart_dir.to_path_buf(),
                helm_home: home.path().to_path_buf(),
                repository_config: home.repository_config(),
                registry_config: home.registry_config(),
            })
            .await
            .map_err(|e| DirectiveError::collaborator("failed to update chart dependencies", e))?;

        let after = read_chart_lock(chart_dir)?;
        Ok(compare_chart_versions(&before, &after))
    }
}

#[async_trait]
impl Directive for HelmUpdateChart {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn required_capabilities(&self, _config: &Value) -> Vec<Capability> {
        vec![Capability::CredentialsDb]
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: HelmUpdateChartConfig = bind(NAME, config)?;
        let credentials = ctx.require_credentials()?;
        let chart_dir = ctx.work_dir().join(&cfg.path)?;
        let chart_file = chart_dir.join(CHART_FILE);

        let metadata = read_chart_metadata(&chart_file)?;
        let changes = process_chart_updates(
            ctx.freight(),
            ctx.freight_requests(),
            &cfg.charts,
            &metadata.dependencies,
        )?;
        if !changes.is_empty() {
            apply_changes(&chart_file, &changes)?;
        }

        let versions = self
            .update_dependencies(credentials, ctx.project(), &chart_dir, &metadata.dependencies)
            .await?;
        let message = generate_commit_message(&cfg.path, &versions);

        info!(chart = %cfg.path, changed = versions.len(), "updated chart dependencies");
        let mut result = StepResult::success();
        if !message.is_empty() {
            result = result.with_output("commitMessage", message);
        }
        Ok(result)
    }
}
