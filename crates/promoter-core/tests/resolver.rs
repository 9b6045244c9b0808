//! Desired-revision scenarios across the resolver, the matchers and the
//! render mechanism.

use std::collections::BTreeMap;
use std::sync::Arc;

use promoter_core::directives::compare_chart_versions;
use promoter_core::{
    resolve_application_revisions, resolve_revisions, ErrorKind, GitRepoUpdate, RenderMechanism,
    ResolveError, SourceUpdate, StagePolicy, UpdatePolicy,
};
use promoter_state::fakes::{MemoryArgoCd, MemoryCredentialsDb, ScriptedRenderService};
use promoter_state::{
    Application, ApplicationSource, Chart, CollaboratorError, FreightCollection, FreightOrigin,
    FreightReference, FreightRequest, GitCommit, RenderAction, RenderResponse, StageState,
};

fn two_warehouses() -> (StagePolicy, FreightCollection) {
    let w1 = FreightOrigin::warehouse("w1");
    let w2 = FreightOrigin::warehouse("w2");
    let freight = FreightCollection::new()
        .with(
            FreightReference::new("f-1", w1.clone())
                .with_chart(Chart::new("https://x", "c", "1.2.3"))
                .with_commit(GitCommit::new("https://y", "from-w1")),
        )
        .with(
            FreightReference::new("f-2", w2.clone())
                .with_commit(GitCommit::new("https://y", "abc123")),
        );
    let policy = StagePolicy::new(vec![
        FreightRequest::direct(w1.clone()),
        FreightRequest::direct(w2),
    ])
    .with_update(UpdatePolicy::from_origin(w1));
    (policy, freight)
}

#[test]
fn test_two_source_scenario() {
    let (policy, freight) = two_warehouses();
    let overrides = vec![SourceUpdate::git("https://y").with_origin(FreightOrigin::warehouse("w2"))];
    let sources = vec![
        ApplicationSource::helm("https://x", "c"),
        ApplicationSource::git("https://y"),
    ];

    let revisions = resolve_revisions(&policy, &overrides, &sources, &freight).unwrap();
    assert_eq!(revisions, vec!["1.2.3", "abc123"]);

    // Without the override the Git source falls back to the default origin.
    let revisions = resolve_revisions(&policy, &[], &sources, &freight).unwrap();
    assert_eq!(revisions, vec!["1.2.3", "from-w1"]);
}

#[test]
fn test_unclassifiable_sources_are_skipped() {
    let (policy, freight) = two_warehouses();
    let sources = vec![
        ApplicationSource::default(),
        ApplicationSource::helm("https://x", "missing"),
        ApplicationSource::helm("https://x", "c"),
    ];
    let revisions = resolve_revisions(&policy, &[], &sources, &freight).unwrap();
    assert_eq!(revisions, vec!["", "1.2.3"]);
}

#[test]
fn test_overlapping_overrides_fail_fast() {
    let (policy, freight) = two_warehouses();
    let overrides = vec![
        SourceUpdate::git("https://y").with_origin(FreightOrigin::warehouse("w1")),
        SourceUpdate::git("https://y").with_origin(FreightOrigin::warehouse("w2")),
    ];
    let err = resolve_revisions(
        &policy,
        &overrides,
        &[ApplicationSource::git("https://y")],
        &freight,
    )
    .unwrap_err();
    assert!(matches!(err, ResolveError::AmbiguousOverride { .. }));
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
}

#[tokio::test]
async fn test_application_revisions_through_argocd() {
    let (policy, freight) = two_warehouses();
    let argocd = MemoryArgoCd::new();
    argocd.insert(Application {
        namespace: "argocd".to_string(),
        name: "web".to_string(),
        source: Some(ApplicationSource::helm("https://x", "c")),
        sources: Vec::new(),
    });

    let revisions =
        resolve_application_revisions(&argocd, "argocd", "web", &policy, &[], &freight)
            .await
            .unwrap();
    assert_eq!(revisions, vec!["1.2.3"]);

    let none = resolve_application_revisions(&argocd, "argocd", "nope", &policy, &[], &freight)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_rendered_commit_becomes_desired_revision() {
    let repo = "https://github.com/org/config";
    let origin = FreightOrigin::warehouse("w");
    let freight = FreightCollection::new().with(
        FreightReference::new("f", origin.clone()).with_commit(GitCommit::new(repo, "abc123")),
    );
    let state = StageState::from_collection(&freight);

    let renderer = Arc::new(ScriptedRenderService::new());
    renderer.push_response(RenderResponse {
        commit_id: "def456".to_string(),
        action_taken: RenderAction::PushedDirectly,
    });
    let mechanism = RenderMechanism::new(Arc::new(MemoryCredentialsDb::new()), renderer);
    let outcome = mechanism
        .promote("proj", &[GitRepoUpdate::new(repo, "env/prod")], &state)
        .await
        .unwrap();
    assert!(outcome.unhandled.is_empty());

    // Feed the rendered state back as freight and resolve the source.
    let rendered = FreightCollection::new().with(
        FreightReference::new("f", origin.clone()).with_commit(outcome.state.commits[0].clone()),
    );
    let policy = StagePolicy::new(vec![FreightRequest::direct(origin)]);
    let revisions = resolve_revisions(
        &policy,
        &[],
        &[ApplicationSource::git(repo)],
        &rendered,
    )
    .unwrap();
    assert_eq!(revisions, vec!["def456"]);
}

#[tokio::test]
async fn test_render_failure_keeps_earlier_updates() {
    let state = StageState {
        commits: vec![
            GitCommit::new("https://github.com/org/a", "a1"),
            GitCommit::new("https://github.com/org/b", "b1"),
        ],
        ..Default::default()
    };
    let renderer = Arc::new(ScriptedRenderService::new());
    renderer.push_response(RenderResponse {
        commit_id: "a2".to_string(),
        action_taken: RenderAction::PushedDirectly,
    });
    renderer.push_error(CollaboratorError::Unauthorized("token expired".to_string()));

    let mechanism = RenderMechanism::new(Arc::new(MemoryCredentialsDb::new()), renderer);
    let partial = mechanism
        .promote(
            "proj",
            &[
                GitRepoUpdate::new("https://github.com/org/a", "main"),
                GitRepoUpdate::new("https://github.com/org/b", "main"),
            ],
            &state,
        )
        .await
        .unwrap_err();

    assert_eq!(partial.repo_url, "https://github.com/org/b");
    assert_eq!(partial.source.kind(), ErrorKind::CollaboratorFailure);
    assert_eq!(partial.state.commits[0].desired_revision(), "a2");
    assert_eq!(partial.state.commits[1].desired_revision(), "b1");
}

#[test]
fn test_compare_chart_versions_reproduces_after() {
    let before: BTreeMap<String, String> = [("a", "1.0.0"), ("b", "2.0.0"), ("c", "3.0.0")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let after: BTreeMap<String, String> = [("a", "1.1.0"), ("b", "2.0.0"), ("d", "4.0.0")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    assert!(compare_chart_versions(&after, &after).is_empty());

    let mut applied = before.clone();
    for (name, change) in compare_chart_versions(&before, &after) {
        if change.is_empty() {
            applied.remove(&name);
        } else {
            let version = change.rsplit(" -> ").next().unwrap_or(&change).to_string();
            applied.insert(name, version);
        }
    }
    assert_eq!(applied, after);
}
