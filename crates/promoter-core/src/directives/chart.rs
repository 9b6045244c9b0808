//! Chart metadata files (`Chart.yaml`, `Chart.lock`) shared by the Helm
//! directives.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::DirectiveError;

pub(crate) const CHART_FILE: &str = "Chart.yaml";
pub(crate) const LOCK_FILE: &str = "Chart.lock";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChartMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,
}

/// Read and parse a `Chart.yaml` file.
pub(crate) fn read_chart_metadata(chart_file: &Path) -> Result<ChartMetadata, DirectiveError> {
    let raw = std::fs::read_to_string(chart_file).map_err(|e| {
        DirectiveError::io(format!("failed to read file {}", chart_file.display()), e)
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        DirectiveError::invalid_content(
            format!("failed to unmarshal {}", chart_file.display()),
            e,
        )
    })
}

#[derive(Deserialize)]
struct ChartLock {
    #[serde(default)]
    dependencies: Vec<ChartDependency>,
}

/// Dependency versions recorded in `<chart_dir>/Chart.lock`, keyed by name.
///
/// A missing lock file is an empty map.
pub(crate) fn read_chart_lock(chart_dir: &Path) -> Result<BTreeMap<String, String>, DirectiveError> {
    let path = chart_dir.join(LOCK_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(DirectiveError::io(
                format!("failed to read file {}", path.display()),
                e,
            ))
        }
    };
    let lock: ChartLock = serde_yaml::from_str(&raw)
        .map_err(|e| DirectiveError::invalid_content("failed to parse Chart.lock", e))?;
    Ok(lock
        .dependencies
        .into_iter()
        .map(|d| (d.name, d.version))
        .collect())
}
