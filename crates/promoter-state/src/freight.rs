//! Freight model: the artifacts a stage can be promoted to.
//!
//! Freight is produced outside the engine (by a Warehouse) and is read-only
//! here. Every type serializes with the same field names the upstream API
//! objects use (`repoURL`, `healthCheckCommit`, ...), so configs and fixtures
//! can be shared verbatim.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of producer a piece of freight originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OriginKind {
    Warehouse,
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginKind::Warehouse => write!(f, "Warehouse"),
        }
    }
}

/// Identity of a freight producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FreightOrigin {
    pub kind: OriginKind,
    pub name: String,
}

impl FreightOrigin {
    pub fn warehouse(name: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::Warehouse,
            name: name.into(),
        }
    }

    /// Canonical `Kind/Name` key used by [`FreightCollection`].
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl fmt::Display for FreightOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A specific commit in a Git repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Commit to verify health against when a rendering step produced a
    /// derived commit distinct from `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_commit: Option<String>,
}

impl GitCommit {
    pub fn new(repo_url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_health_check_commit(mut self, commit: impl Into<String>) -> Self {
        self.health_check_commit = Some(commit.into());
        self
    }

    /// The revision health checks should compare against.
    pub fn desired_revision(&self) -> &str {
        match self.health_check_commit.as_deref() {
            Some(hc) if !hc.is_empty() => hc,
            _ => &self.id,
        }
    }
}

/// A specific version of a Helm chart.
///
/// For OCI charts `repo_url` is the full repository reference
/// (`oci://registry/path/chart`) and `name` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub name: String,
    pub version: String,
}

impl Chart {
    pub fn new(
        repo_url: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A container image tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Image {
    pub fn new(repo_url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            tag: tag.into(),
            digest: None,
        }
    }

    /// `repo:tag` reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repo_url, self.tag)
    }
}

/// One resolved artifact set from one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightReference {
    #[serde(default)]
    pub name: String,
    pub origin: FreightOrigin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<GitCommit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
}

impl FreightReference {
    pub fn new(name: impl Into<String>, origin: FreightOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
        }
    }

    pub fn with_commit(mut self, commit: GitCommit) -> Self {
        self.commits.push(commit);
        self
    }

    pub fn with_chart(mut self, chart: Chart) -> Self {
        self.charts.push(chart);
        self
    }

    pub fn with_image(mut self, image: Image) -> Self {
        self.images.push(image);
        self
    }
}

/// Freight currently assigned to a promotion, keyed by `Kind/Name` of origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightCollection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, rename = "items")]
    pub freight: BTreeMap<String, FreightReference>,
}

impl FreightCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `reference`, replacing any freight from the same origin.
    pub fn update_or_push(&mut self, reference: FreightReference) {
        self.freight.insert(reference.origin.key(), reference);
    }

    pub fn with(mut self, reference: FreightReference) -> Self {
        self.update_or_push(reference);
        self
    }

    /// All references in deterministic (key) order.
    pub fn references(&self) -> Vec<FreightReference> {
        self.freight.values().cloned().collect()
    }

    pub fn get(&self, origin: &FreightOrigin) -> Option<&FreightReference> {
        self.freight.get(&origin.key())
    }
}

/// Where a stage may obtain freight from an origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightSources {
    /// Freight may come straight from the origin.
    #[serde(default)]
    pub direct: bool,
    /// Upstream stages the freight must have passed through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
}

/// An origin a stage is allowed to draw freight from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightRequest {
    pub origin: FreightOrigin,
    #[serde(default)]
    pub sources: FreightSources,
}

impl FreightRequest {
    pub fn direct(origin: FreightOrigin) -> Self {
        Self {
            origin,
            sources: FreightSources {
                direct: true,
                stages: Vec::new(),
            },
        }
    }
}

/// Artifacts currently deployed to (or being promoted into) a stage.
///
/// This is the value the render mechanism reads and updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default)]
    pub commits: Vec<GitCommit>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub charts: Vec<Chart>,
}

impl StageState {
    /// Flatten every reference of a collection into one state.
    pub fn from_collection(collection: &FreightCollection) -> Self {
        let mut state = StageState::default();
        for reference in collection.freight.values() {
            state.commits.extend(reference.commits.iter().cloned());
            state.images.extend(reference.images.iter().cloned());
            state.charts.extend(reference.charts.iter().cloned());
        }
        state
    }
}
