//! Promotion and step contexts, shared state and step results.

use std::collections::BTreeMap;
use std::sync::Arc;

use promoter_state::{ArgoCdClient, CredentialsDb, FreightCollection, FreightRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::registry::Capability;
use crate::error::DirectiveError;
use crate::workdir::WorkDir;

/// Outputs of completed steps, keyed by step alias.
///
/// Entries are only ever added; a step never edits another step's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, Map<String, Value>>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, alias: &str) -> Option<&Map<String, Value>> {
        self.0.get(alias)
    }

    pub fn output(&self, alias: &str, key: &str) -> Option<&Value> {
        self.0.get(alias).and_then(|o| o.get(key))
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.0.contains_key(alias)
    }

    /// Record the output of `alias`. Returns `false` without touching the
    /// existing entry if `alias` already has one.
    pub(crate) fn record(&mut self, alias: &str, output: Map<String, Value>) -> bool {
        if self.0.contains_key(alias) {
            return false;
        }
        self.0.insert(alias.to_string(), output);
        true
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Outcome class of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    /// The step ran and determined the promotion cannot proceed.
    Failure,
    /// The step could not do its job.
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failure => write!(f, "failure"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Map<String, Value>,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            status: StepStatus::Success,
            message: None,
            output: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            message: Some(message.into()),
            output: Map::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }
}

/// Cancellation signal for a promotion run.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Sending half of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Cancellation {
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, cancellation) = Self::new();
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

/// Everything a promotion run shares across its steps.
#[derive(Clone)]
pub struct PromotionContext {
    /// Project namespace.
    pub project: String,
    pub promotion: String,
    pub stage: String,
    pub work_dir: WorkDir,
    pub freight: FreightCollection,
    pub freight_requests: Vec<FreightRequest>,
    pub credentials: Option<Arc<dyn CredentialsDb>>,
    pub argocd: Option<Arc<dyn ArgoCdClient>>,
    pub cancellation: Cancellation,
}

impl std::fmt::Debug for PromotionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionContext")
            .field("project", &self.project)
            .field("promotion", &self.promotion)
            .field("stage", &self.stage)
            .field("work_dir", &self.work_dir)
            .field("freight", &self.freight)
            .field("freight_requests", &self.freight_requests)
            .field("credentials", &self.credentials.is_some())
            .field("argocd", &self.argocd.is_some())
            .finish()
    }
}

impl PromotionContext {
    pub fn new(
        project: impl Into<String>,
        promotion: impl Into<String>,
        stage: impl Into<String>,
        work_dir: WorkDir,
    ) -> Self {
        Self {
            project: project.into(),
            promotion: promotion.into(),
            stage: stage.into(),
            work_dir,
            freight: FreightCollection::default(),
            freight_requests: Vec::new(),
            credentials: None,
            argocd: None,
            cancellation: Cancellation::never(),
        }
    }

    pub fn with_freight(mut self, freight: FreightCollection) -> Self {
        self.freight = freight;
        self
    }

    pub fn with_freight_requests(mut self, requests: Vec<FreightRequest>) -> Self {
        self.freight_requests = requests;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsDb>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_argocd(mut self, argocd: Arc<dyn ArgoCdClient>) -> Self {
        self.argocd = Some(argocd);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// View of the promotion handed to a single step.
///
/// Optional collaborators are only present when the step's directive is
/// granted the matching capability.
pub struct StepContext<'a> {
    pub promotion: &'a PromotionContext,
    pub alias: &'a str,
    /// Outputs of the steps that ran before this one.
    pub state: &'a State,
    credentials: Option<&'a dyn CredentialsDb>,
    argocd: Option<&'a dyn ArgoCdClient>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        promotion: &'a PromotionContext,
        alias: &'a str,
        state: &'a State,
        credentials: Option<&'a dyn CredentialsDb>,
        argocd: Option<&'a dyn ArgoCdClient>,
    ) -> Self {
        Self {
            promotion,
            alias,
            state,
            credentials,
            argocd,
        }
    }

    pub fn project(&self) -> &str {
        &self.promotion.project
    }

    pub fn work_dir(&self) -> &WorkDir {
        &self.promotion.work_dir
    }

    pub fn freight(&self) -> &FreightCollection {
        &self.promotion.freight
    }

    pub fn freight_requests(&self) -> &[FreightRequest] {
        &self.promotion.freight_requests
    }

    /// Credential lookup, if granted to this step.
    pub fn credentials(&self) -> Option<&'a dyn CredentialsDb> {
        self.credentials
    }

    pub fn require_credentials(&self) -> Result<&'a dyn CredentialsDb, DirectiveError> {
        self.credentials
            .ok_or(DirectiveError::MissingCollaborator(Capability::CredentialsDb))
    }

    pub fn require_argocd(&self) -> Result<&'a dyn ArgoCdClient, DirectiveError> {
        self.argocd
            .ok_or(DirectiveError::MissingCollaborator(Capability::ArgoCdClient))
    }
}
