//! End-to-end runs of the builtin directives through the pipeline, against
//! in-memory collaborators and a temporary work directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use promoter_core::{
    builtin_registry, BuiltinClients, Pipeline, PipelineStatus, PromotionContext, StepSpec,
    StepStatus, WorkDir,
};
use promoter_state::fakes::{
    MemoryArgoCd, MemoryCredentialsDb, MemoryPullRequests, RecordingGitClient,
    RecordingHelmClient,
};
use promoter_state::{
    Application, ApplicationSource, Chart, CredentialType, Credentials, FreightCollection,
    FreightOrigin, FreightReference, FreightRequest, GitCommit, PullRequest, PullRequestState,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    dir: tempfile::TempDir,
    git: Arc<RecordingGitClient>,
    helm: Arc<RecordingHelmClient>,
    pull_requests: Arc<MemoryPullRequests>,
    credentials: Arc<MemoryCredentialsDb>,
}

impl Harness {
    fn new() -> Self {
        Self::with_helm(RecordingHelmClient::new())
    }

    fn with_helm(helm: RecordingHelmClient) -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            git: Arc::new(RecordingGitClient::new("main", "c0ffee")),
            helm: Arc::new(helm),
            pull_requests: Arc::new(MemoryPullRequests::new()),
            credentials: Arc::new(MemoryCredentialsDb::new()),
        }
    }

    fn clients(&self) -> BuiltinClients {
        BuiltinClients {
            git: self.git.clone(),
            helm: self.helm.clone(),
            pull_requests: self.pull_requests.clone(),
        }
    }

    fn context(&self) -> PromotionContext {
        PromotionContext::new("proj", "promo-1", "prod", WorkDir::new(self.dir.path()))
            .with_credentials(self.credentials.clone())
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read")
}

// ---------------------------------------------------------------------------
// git-overwrite
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_git_overwrite_replaces_work_tree() {
    let h = Harness::new();
    h.write("rendered/app/deploy.yaml", "kind: Deployment\n");
    h.write("rendered/.git/HEAD", "ref: refs/heads/source\n");
    h.write("env/.git/HEAD", "ref: refs/heads/env/prod\n");
    h.write("env/stale.yaml", "kind: Stale\n");
    h.write("env/app/deploy.yaml", "kind: Old\n");

    let registry = builtin_registry(&h.clients()).unwrap();
    let steps = vec![StepSpec::new(
        "git-overwrite",
        json!({"inPath": "rendered", "outPath": "env"}),
    )];
    let result = Pipeline::new(&registry)
        .execute(&h.context(), &steps)
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(read(&h.path("env/app/deploy.yaml")), "kind: Deployment\n");
    assert!(!h.path("env/stale.yaml").exists());
    assert_eq!(read(&h.path("env/.git/HEAD")), "ref: refs/heads/env/prod\n");
}

#[tokio::test]
async fn test_git_overwrite_requires_git_work_tree() {
    let h = Harness::new();
    h.write("rendered/a.yaml", "a\n");
    fs::create_dir_all(h.path("plain")).unwrap();

    let registry = builtin_registry(&h.clients()).unwrap();
    let result = Pipeline::new(&registry)
        .execute(
            &h.context(),
            &[StepSpec::new(
                "git-overwrite",
                json!({"inPath": "rendered", "outPath": "plain"}),
            )],
        )
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Errored);
    assert_eq!(result.steps[0].status, StepStatus::Error);
    assert!(result.steps[0]
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("not a git working tree"));
}

// ---------------------------------------------------------------------------
// git-push -> git-open-pr -> git-wait-for-pr
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_push_open_and_wait_for_pr() {
    let h = Harness::new();
    fs::create_dir_all(h.path("env/.git")).unwrap();
    h.credentials.insert(
        "proj",
        CredentialType::Git,
        "https://git.example.com/org/repo.git",
        Credentials::basic("bot", "token"),
    );

    let registry = builtin_registry(&h.clients()).unwrap();
    let steps = vec![
        StepSpec::new("git-push", json!({"path": "env", "generateTargetBranch": true}))
            .with_alias("push"),
        StepSpec::new(
            "git-open-pr",
            json!({
                "repoURL": "https://git.example.com/org/repo.git",
                "sourceBranchFromStep": "push",
                "targetBranch": "env/prod"
            }),
        )
        .with_alias("open"),
        StepSpec::new(
            "git-wait-for-pr",
            json!({
                "repoURL": "https://git.example.com/org/repo.git",
                "prNumberFromStep": "open"
            }),
        )
        .with_alias("wait"),
    ];
    let result = Pipeline::new(&registry)
        .execute(&h.context(), &steps)
        .await
        .unwrap();

    // A freshly opened PR is not merged yet.
    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(
        result.steps[2].message.as_deref(),
        Some("pull request 1 is not yet merged")
    );

    assert_eq!(
        result.state.output("push", "branch"),
        Some(&json!("promoter/promotion/promo-1"))
    );
    assert_eq!(result.state.output("push", "commit"), Some(&json!("c0ffee")));
    assert_eq!(result.state.output("open", "prNumber"), Some(&json!(1)));

    let pushes = h.git.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].target_branch, "promoter/promotion/promo-1");
    assert_eq!(
        pushes[0].credentials.as_ref().map(|c| c.username.as_str()),
        Some("bot")
    );

    let created = h.pull_requests.created();
    assert_eq!(created[0].1.source_branch, "promoter/promotion/promo-1");
    assert_eq!(created[0].1.target_branch, "env/prod");
    assert_eq!(created[0].1.title, "Promote promo-1 to stage prod");
}

#[tokio::test]
async fn test_wait_for_merged_pr_reports_merge_commit() {
    let h = Harness::new();
    h.pull_requests.insert(
        "https://git.example.com/org/repo.git",
        PullRequest {
            number: 12,
            url: "https://git.example.com/org/repo/pull/12".to_string(),
            state: PullRequestState::Merged,
            merge_commit: Some("feedbeef".to_string()),
        },
    );
    h.pull_requests.insert(
        "https://git.example.com/org/repo.git",
        PullRequest {
            number: 13,
            url: String::new(),
            state: PullRequestState::Closed,
            merge_commit: None,
        },
    );

    let registry = builtin_registry(&h.clients()).unwrap();
    let wait = |n: u64| {
        StepSpec::new(
            "git-wait-for-pr",
            json!({"repoURL": "https://git.example.com/org/repo.git", "prNumber": n}),
        )
    };

    let merged = Pipeline::new(&registry)
        .execute(&h.context(), &[wait(12)])
        .await
        .unwrap();
    assert!(merged.is_success());
    assert_eq!(merged.state.output("step-0", "commit"), Some(&json!("feedbeef")));

    let closed = Pipeline::new(&registry)
        .execute(&h.context(), &[wait(13)])
        .await
        .unwrap();
    assert_eq!(closed.status, PipelineStatus::Failed);
    assert_eq!(
        closed.steps[0].message.as_deref(),
        Some("pull request 13 was closed without being merged")
    );
}

// ---------------------------------------------------------------------------
// helm-update-chart
// ---------------------------------------------------------------------------

const CHART_YAML: &str = "\
apiVersion: v2
name: app
version: 0.1.0
dependencies:
- name: redis
  version: 17.0.0
  repository: https://charts.example.com
- name: common
  version: 1.0.0
  repository: oci://registry.example.com/charts
";

const LOCK_BEFORE: &str = "\
dependencies:
- name: redis
  version: 17.0.0
- name: common
  version: 1.0.0
";

const LOCK_AFTER: &str = "\
dependencies:
- name: redis
  version: 18.1.0
- name: common
  version: 1.2.0
";

#[tokio::test]
async fn test_helm_update_chart() {
    let h = Harness::with_helm(RecordingHelmClient::new().with_lock_file(LOCK_AFTER));
    h.write("charts/app/Chart.yaml", CHART_YAML);
    h.write("charts/app/Chart.lock", LOCK_BEFORE);
    h.credentials.insert(
        "proj",
        CredentialType::Helm,
        "oci://registry.example.com/charts/common",
        Credentials::basic("robot", "pw"),
    );

    let origin = FreightOrigin::warehouse("charts");
    let freight = FreightCollection::new().with(
        FreightReference::new("f-1", origin.clone())
            .with_chart(Chart::new("https://charts.example.com", "redis", "18.1.0"))
            .with_chart(Chart::new(
                "oci://registry.example.com/charts/common",
                "",
                "1.2.0",
            )),
    );
    let ctx = h
        .context()
        .with_freight(freight)
        .with_freight_requests(vec![FreightRequest::direct(origin)]);

    let registry = builtin_registry(&h.clients()).unwrap();
    let steps = vec![StepSpec::new(
        "helm-update-chart",
        json!({
            "path": "charts/app",
            "charts": [
                {"repository": "https://charts.example.com", "name": "redis"},
                {"repository": "oci://registry.example.com/charts", "name": "common"}
            ]
        }),
    )
    .with_alias("update")];
    let result = Pipeline::new(&registry).execute(&ctx, &steps).await.unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(
        result.state.output("update", "commitMessage"),
        Some(&json!(
            "Updated chart dependencies for charts/app\n\n- common: 1.0.0 -> 1.2.0\n- redis: 17.0.0 -> 18.1.0"
        ))
    );

    let chart: serde_yaml::Value =
        serde_yaml::from_str(&read(&h.path("charts/app/Chart.yaml"))).unwrap();
    assert_eq!(chart["dependencies"][0]["version"], "18.1.0");
    assert_eq!(chart["dependencies"][1]["version"], "1.2.0");
    assert_eq!(chart["name"], "app");

    let updates = h.helm.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].chart_path.ends_with("charts/app"));

    let logins = h.helm.logins();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].1, "registry.example.com");
    assert_eq!(logins[0].2, "robot");

    let lookups: Vec<String> = h.credentials.lookups().into_iter().map(|l| l.2).collect();
    assert!(lookups.contains(&"https://charts.example.com".to_string()));
    assert!(lookups.contains(&"oci://registry.example.com/charts/common".to_string()));
}

#[tokio::test]
async fn test_helm_update_chart_failure_is_collaborator_error() {
    let h = Harness::new();
    h.helm.fail_update("no repository definition");
    h.write("charts/app/Chart.yaml", CHART_YAML);

    let registry = builtin_registry(&h.clients()).unwrap();
    let result = Pipeline::new(&registry)
        .execute(
            &h.context(),
            &[StepSpec::new(
                "helm-update-chart",
                json!({
                    "path": "charts/app",
                    "charts": [{"repository": "https://charts.example.com", "name": "redis"}]
                }),
            )],
        )
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Errored);
    let err = result.error.expect("error recorded");
    assert_eq!(err.kind(), promoter_core::ErrorKind::CollaboratorFailure);
    assert!(err.to_string().contains("failed to update chart dependencies"));
}

// ---------------------------------------------------------------------------
// helm-template
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_helm_template_renders_to_out_path() {
    let h = Harness::with_helm(
        RecordingHelmClient::new().with_manifest("apiVersion: v1\nkind: ConfigMap\n"),
    );
    h.write("charts/app/Chart.yaml", "apiVersion: v2\nname: app\nversion: 0.1.0\n");
    h.write("values/base.yaml", "image:\n  repo: nginx\n  tag: '1.0'\nreplicas: 1\n");
    h.write("values/prod.yaml", "image:\n  tag: '2.0'\n");

    let registry = builtin_registry(&h.clients()).unwrap();
    let steps = vec![StepSpec::new(
        "helm-template",
        json!({
            "path": "charts/app",
            "outPath": "out/app.yaml",
            "valuesFiles": ["values/base.yaml", "values/prod.yaml"],
            "includeCRDs": true,
            "kubeVersion": "1.29"
        }),
    )];
    let result = Pipeline::new(&registry)
        .execute(&h.context(), &steps)
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(
        read(&h.path("out/app.yaml")),
        "apiVersion: v1\nkind: ConfigMap\n"
    );

    let templates = h.helm.templates();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].release_name, "release-name");
    assert_eq!(templates[0].namespace, "proj");
    assert!(templates[0].include_crds);
    assert_eq!(templates[0].kube_version.as_deref(), Some("v1.29"));
    assert_eq!(
        templates[0].values,
        json!({"image": {"repo": "nginx", "tag": "2.0"}, "replicas": 1})
    );
}

#[tokio::test]
async fn test_helm_template_rejects_missing_dependencies() {
    let h = Harness::new();
    h.write("charts/app/Chart.yaml", CHART_YAML);

    let registry = builtin_registry(&h.clients()).unwrap();
    let result = Pipeline::new(&registry)
        .execute(
            &h.context(),
            &[StepSpec::new(
                "helm-template",
                json!({"path": "charts/app", "outPath": "out/app.yaml"}),
            )],
        )
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Errored);
    let message = result.steps[0].message.clone().unwrap_or_default();
    assert!(message.contains("missing in charts/ directory: redis, common"));
    assert!(h.helm.templates().is_empty());
}

// ---------------------------------------------------------------------------
// argocd-desired-revisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_argocd_desired_revisions() {
    let h = Harness::new();
    let argocd = Arc::new(MemoryArgoCd::new());
    argocd.insert(Application {
        namespace: "argocd".to_string(),
        name: "guestbook".to_string(),
        source: None,
        sources: vec![
            ApplicationSource::helm("registry.example.com/charts", "guestbook"),
            ApplicationSource::git("https://github.com/org/config"),
            ApplicationSource::git("https://github.com/org/unrelated"),
        ],
    });

    let origin = FreightOrigin::warehouse("w");
    let freight = FreightCollection::new().with(
        FreightReference::new("f", origin.clone())
            .with_chart(Chart::new(
                "oci://registry.example.com/charts/guestbook",
                "",
                "0.4.0",
            ))
            .with_commit(
                GitCommit::new("https://github.com/org/config", "abc123")
                    .with_health_check_commit("def456"),
            ),
    );
    let ctx = h
        .context()
        .with_argocd(argocd)
        .with_freight(freight)
        .with_freight_requests(vec![FreightRequest::direct(origin)]);

    let registry = builtin_registry(&h.clients()).unwrap();
    let steps = vec![StepSpec::new(
        "argocd-desired-revisions",
        json!({"apps": [{"name": "guestbook"}, {"name": "missing"}]}),
    )
    .with_alias("revisions")];
    let result = Pipeline::new(&registry).execute(&ctx, &steps).await.unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(
        result.state.output("revisions", "revisions"),
        Some(&json!({
            "guestbook": ["0.4.0", "def456", ""],
            "missing": []
        }))
    );
}
