//! Desired-revision resolver.
//!
//! Given the sources of a deployment target (an Argo CD Application) and the
//! freight of a promotion, compute the revision each source should be synced
//! to: a chart version for Helm sources, a commit for Git sources.

use promoter_state::{ApplicationSource, ArgoCdClient, FreightCollection, FreightRequest};
use tracing::debug;

use crate::error::ResolveError;
use crate::freight::{find_chart, find_commit, OriginPolicy, PolicyTarget, SourceUpdate, UpdatePolicy};

/// Stage-level inputs to origin policy derivation.
#[derive(Debug, Clone, Default)]
pub struct StagePolicy {
    /// Origins the stage may draw freight from.
    pub requests: Vec<FreightRequest>,
    /// Default origin rule for every source without an override.
    pub update: UpdatePolicy,
}

impl StagePolicy {
    pub fn new(requests: Vec<FreightRequest>) -> Self {
        Self {
            requests,
            update: UpdatePolicy::default(),
        }
    }

    pub fn with_update(mut self, update: UpdatePolicy) -> Self {
        self.update = update;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind<'s> {
    Helm { chart: &'s str },
    Git,
}

fn classify(source: &ApplicationSource) -> Option<SourceKind<'_>> {
    // Chart first: a Helm repository URL is also a non-empty repoURL.
    if let Some(chart) = source.chart_name() {
        return Some(SourceKind::Helm { chart });
    }
    if !source.repo_url.is_empty() {
        return Some(SourceKind::Git);
    }
    None
}

/// Select the single override matching `source`, if any.
fn matching_override<'o>(
    overrides: &'o [SourceUpdate],
    source: &ApplicationSource,
    kind: SourceKind<'_>,
) -> Result<Option<&'o SourceUpdate>, ResolveError> {
    let wanted_chart = match kind {
        SourceKind::Helm { chart } => Some(chart),
        SourceKind::Git => None,
    };
    let mut matches = overrides.iter().filter(|o| {
        o.repo_url == source.repo_url && o.chart.as_deref().filter(|c| !c.is_empty()) == wanted_chart
    });
    let first = matches.next();
    if first.is_some() && matches.next().is_some() {
        return Err(ResolveError::AmbiguousOverride {
            repo_url: source.repo_url.clone(),
            chart: wanted_chart.map(str::to_string),
        });
    }
    Ok(first)
}

/// Fold an Argo CD-style OCI chart reference (registry without a scheme plus
/// a chart name) into the `oci://` form freight uses.
pub fn fold_oci_reference(repo_url: &str, chart: &str) -> (String, String) {
    if repo_url.contains("://") {
        return (repo_url.to_string(), chart.to_string());
    }
    (
        format!("oci://{}/{}", repo_url.trim_end_matches('/'), chart),
        String::new(),
    )
}

/// Resolve one desired revision per classifiable source, in source order.
///
/// Sources with neither a chart nor a repoURL are skipped. A source whose
/// artifact is not in the freight resolves to `""`. Any error aborts the
/// whole resolution.
pub fn resolve_revisions(
    policy: &StagePolicy,
    overrides: &[SourceUpdate],
    sources: &[ApplicationSource],
    freight: &FreightCollection,
) -> Result<Vec<String>, ResolveError> {
    let mut revisions = Vec::with_capacity(sources.len());
    for source in sources {
        let Some(kind) = classify(source) else {
            continue;
        };

        let target = match matching_override(overrides, source, kind)? {
            Some(update) => PolicyTarget::Override {
                update,
                fallback: &policy.update,
            },
            None => PolicyTarget::Default(&policy.update),
        };
        let origin_policy = OriginPolicy::derive(target, &policy.requests);

        let revision = match kind {
            SourceKind::Helm { chart } => {
                let (repo_url, chart) = fold_oci_reference(&source.repo_url, chart);
                find_chart(&origin_policy, freight, &repo_url, &chart)
                    .map_err(|source_err| ResolveError::Chart {
                        repo_url: source.repo_url.clone(),
                        source: source_err,
                    })?
                    .map(|c| c.version.clone())
            }
            SourceKind::Git => find_commit(&origin_policy, freight, &source.repo_url)
                .map_err(|source_err| ResolveError::Commit {
                    repo_url: source.repo_url.clone(),
                    source: source_err,
                })?
                .map(|c| c.desired_revision().to_string()),
        };

        debug!(
            repo_url = %source.repo_url,
            revision = revision.as_deref().unwrap_or(""),
            "resolved desired revision"
        );
        revisions.push(revision.unwrap_or_default());
    }
    Ok(revisions)
}

/// Resolve desired revisions for an Argo CD Application fetched through the
/// read-only client. A missing Application yields no revisions.
pub async fn resolve_application_revisions(
    argocd: &dyn ArgoCdClient,
    namespace: &str,
    name: &str,
    policy: &StagePolicy,
    overrides: &[SourceUpdate],
    freight: &FreightCollection,
) -> Result<Vec<String>, ResolveError> {
    let app = argocd
        .get_application(namespace, name)
        .await
        .map_err(|source| ResolveError::Application {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;
    let Some(app) = app else {
        debug!(namespace, name, "Application not found; no desired revisions");
        return Ok(Vec::new());
    };
    resolve_revisions(policy, overrides, &app.all_sources(), freight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use promoter_state::{Chart, FreightOrigin, FreightReference, GitCommit};

    fn single_warehouse() -> (StagePolicy, FreightCollection) {
        let origin = FreightOrigin::warehouse("w");
        let freight = FreightCollection::new().with(
            FreightReference::new("f", origin.clone())
                .with_commit(GitCommit::new("https://github.com/org/config", "c0ffee"))
                .with_chart(Chart::new("oci://registry.example.com/charts/app", "", "1.2.3"))
                .with_chart(Chart::new("https://charts.example.com", "web", "4.5.6")),
        );
        (StagePolicy::new(vec![FreightRequest::direct(origin)]), freight)
    }

    #[test]
    fn test_fold_oci_reference() {
        assert_eq!(
            fold_oci_reference("registry.example.com/charts/", "app"),
            (
                "oci://registry.example.com/charts/app".to_string(),
                String::new()
            )
        );
        assert_eq!(
            fold_oci_reference("https://charts.example.com", "web"),
            ("https://charts.example.com".to_string(), "web".to_string())
        );
    }

    #[test]
    fn test_resolve_positional_with_blank_for_missing() {
        let (policy, freight) = single_warehouse();
        let sources = vec![
            ApplicationSource::helm("registry.example.com/charts", "app"),
            ApplicationSource::git("https://github.com/org/unknown"),
            ApplicationSource::default(),
            ApplicationSource::helm("https://charts.example.com", "web"),
            ApplicationSource::git("https://github.com/org/config.git"),
        ];
        let revisions = resolve_revisions(&policy, &[], &sources, &freight).unwrap();
        assert_eq!(revisions, vec!["1.2.3", "", "4.5.6", "c0ffee"]);
    }

    #[test]
    fn test_resolve_prefers_health_check_commit() {
        let origin = FreightOrigin::warehouse("w");
        let freight = FreightCollection::new().with(
            FreightReference::new("f", origin.clone()).with_commit(
                GitCommit::new("https://github.com/org/config", "c0ffee")
                    .with_health_check_commit("rendered"),
            ),
        );
        let policy = StagePolicy::new(vec![FreightRequest::direct(origin)]);
        let revisions = resolve_revisions(
            &policy,
            &[],
            &[ApplicationSource::git("https://github.com/org/config")],
            &freight,
        )
        .unwrap();
        assert_eq!(revisions, vec!["rendered"]);
    }

    #[test]
    fn test_override_pins_origin_among_many() {
        let freight = FreightCollection::new()
            .with(
                FreightReference::new("a", FreightOrigin::warehouse("a"))
                    .with_commit(GitCommit::new("https://git/x", "from-a")),
            )
            .with(
                FreightReference::new("b", FreightOrigin::warehouse("b"))
                    .with_commit(GitCommit::new("https://git/x", "from-b")),
            );
        let policy = StagePolicy::new(vec![
            FreightRequest::direct(FreightOrigin::warehouse("a")),
            FreightRequest::direct(FreightOrigin::warehouse("b")),
        ]);
        let sources = [ApplicationSource::git("https://git/x")];

        let err = resolve_revisions(&policy, &[], &sources, &freight).unwrap_err();
        assert!(matches!(err, ResolveError::Commit { .. }));

        let overrides =
            [SourceUpdate::git("https://git/x").with_origin(FreightOrigin::warehouse("b"))];
        let revisions = resolve_revisions(&policy, &overrides, &sources, &freight).unwrap();
        assert_eq!(revisions, vec!["from-b"]);
    }

    #[test]
    fn test_two_matching_overrides_fail() {
        let (policy, freight) = single_warehouse();
        let overrides = [
            SourceUpdate::helm("https://charts.example.com", "web"),
            SourceUpdate::helm("https://charts.example.com", "web")
                .with_origin(FreightOrigin::warehouse("w")),
        ];
        let err = resolve_revisions(
            &policy,
            &overrides,
            &[ApplicationSource::helm("https://charts.example.com", "web")],
            &freight,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousOverride { .. }));
    }

    #[test]
    fn test_chart_override_ignored_for_git_source() {
        let (policy, freight) = single_warehouse();
        let overrides = [SourceUpdate::helm("https://github.com/org/config", "x")
            .with_origin(FreightOrigin::warehouse("elsewhere"))];
        let revisions = resolve_revisions(
            &policy,
            &overrides,
            &[ApplicationSource::git("https://github.com/org/config")],
            &freight,
        )
        .unwrap();
        assert_eq!(revisions, vec!["c0ffee"]);
    }
}
