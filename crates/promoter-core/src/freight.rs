//! Artifact matchers: locate a chart or commit in the freight a promotion
//! carries, restricted by an origin policy.

use promoter_state::{Chart, FreightCollection, FreightOrigin, FreightRequest, GitCommit};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// Promotion-wide default rule for where artifacts come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default, rename = "fromOrigin", skip_serializing_if = "Option::is_none")]
    pub origin: Option<FreightOrigin>,
}

impl UpdatePolicy {
    pub fn from_origin(origin: FreightOrigin) -> Self {
        Self {
            origin: Some(origin),
        }
    }
}

/// Per-source override of the default origin rule, matched by exact
/// `(repoURL[, chart])` equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUpdate {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, rename = "fromOrigin", skip_serializing_if = "Option::is_none")]
    pub origin: Option<FreightOrigin>,
}

impl SourceUpdate {
    pub fn git(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            ..Default::default()
        }
    }

    pub fn helm(repo_url: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            chart: Some(chart.into()),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: FreightOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// What an origin policy is derived from.
#[derive(Debug, Clone, Copy)]
pub enum PolicyTarget<'a> {
    Default(&'a UpdatePolicy),
    Override {
        update: &'a SourceUpdate,
        fallback: &'a UpdatePolicy,
    },
}

/// Which origins an artifact may be taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Exact(FreightOrigin),
    AnyOf(Vec<FreightOrigin>),
}

impl OriginPolicy {
    /// Derive the policy for `target`.
    ///
    /// Override origin, then default origin, then the sole freight request;
    /// otherwise any requested origin.
    pub fn derive(target: PolicyTarget<'_>, requests: &[FreightRequest]) -> Self {
        let explicit = match target {
            PolicyTarget::Default(policy) => policy.origin.as_ref(),
            PolicyTarget::Override { update, fallback } => {
                update.origin.as_ref().or(fallback.origin.as_ref())
            }
        };
        if let Some(origin) = explicit {
            return OriginPolicy::Exact(origin.clone());
        }
        match requests {
            [only] => OriginPolicy::Exact(only.origin.clone()),
            _ => OriginPolicy::AnyOf(requests.iter().map(|r| r.origin.clone()).collect()),
        }
    }

    pub fn allows(&self, origin: &FreightOrigin) -> bool {
        match self {
            OriginPolicy::Exact(exact) => exact == origin,
            OriginPolicy::AnyOf(origins) => origins.contains(origin),
        }
    }
}

/// Scan the freight allowed by `policy` for the first artifact `select`
/// returns, failing if two different origins supply one.
fn find_unique<'f, T>(
    policy: &OriginPolicy,
    freight: &'f FreightCollection,
    artifact: impl Fn() -> String,
    select: impl Fn(&'f promoter_state::FreightReference) -> Option<&'f T>,
) -> Result<Option<&'f T>, MatchError> {
    let mut found: Option<&'f T> = None;
    let mut origins: Vec<String> = Vec::new();
    for reference in freight.freight.values() {
        if !policy.allows(&reference.origin) {
            continue;
        }
        if let Some(item) = select(reference) {
            origins.push(reference.origin.key());
            found.get_or_insert(item);
        }
    }
    if origins.len() > 1 {
        return Err(MatchError::AmbiguousOrigin {
            artifact: artifact(),
            origins,
        });
    }
    Ok(found)
}

/// Find a chart by exact repository URL and name.
///
/// For OCI charts, `repo_url` is the full `oci://` reference and `chart` is
/// empty.
pub fn find_chart<'f>(
    policy: &OriginPolicy,
    freight: &'f FreightCollection,
    repo_url: &str,
    chart: &str,
) -> Result<Option<&'f Chart>, MatchError> {
    find_unique(
        policy,
        freight,
        || {
            if chart.is_empty() {
                format!("chart {repo_url:?}")
            } else {
                format!("chart {chart:?} from {repo_url:?}")
            }
        },
        |reference| {
            reference
                .charts
                .iter()
                .find(|c| c.repo_url == repo_url && c.name == chart)
        },
    )
}

/// Find a commit for a Git repository, comparing normalized URLs.
pub fn find_commit<'f>(
    policy: &OriginPolicy,
    freight: &'f FreightCollection,
    repo_url: &str,
) -> Result<Option<&'f GitCommit>, MatchError> {
    let wanted = normalize_git_url(repo_url);
    find_unique(
        policy,
        freight,
        || format!("commit from {repo_url:?}"),
        |reference| {
            reference
                .commits
                .iter()
                .find(|c| normalize_git_url(&c.repo_url) == wanted)
        },
    )
}

/// Canonical form of a Git URL for equality checks: lowercased scheme and
/// host, no trailing `/` or `.git`.
pub fn normalize_git_url(url: &str) -> String {
    let mut trimmed = url.trim().trim_end_matches('/');
    if let Some(stripped) = trimmed.strip_suffix(".git") {
        trimmed = stripped.trim_end_matches('/');
    }

    if let Some((scheme, rest)) = trimmed.split_once("://") {
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        return format!(
            "{}://{}{}",
            scheme.to_lowercase(),
            lowercase_host(authority),
            path
        );
    }

    // scp-like: user@host:path
    if let Some((authority, path)) = trimmed.split_once(':') {
        if !authority.contains('/') {
            return format!("{}:{}", lowercase_host(authority), path);
        }
    }
    trimmed.to_string()
}

fn lowercase_host(authority: &str) -> String {
    match authority.rsplit_once('@') {
        Some((user, host)) => format!("{user}@{}", host.to_lowercase()),
        None => authority.to_lowercase(),
    }
}
