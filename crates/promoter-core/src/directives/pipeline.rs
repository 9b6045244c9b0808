//! Step execution pipeline.
//!
//! Runs an ordered list of steps against a shared [`PromotionContext`]:
//! - pre-flight checks every step names a registered directive, aliases are
//!   unique, and every output reference points at an earlier step
//! - steps run strictly in order; each one's output is merged into the
//!   shared [`State`] under its alias
//! - the first `Failure` or error stops the run
//! - cancellation is checked before each step and raced against each run

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::context::{PromotionContext, State, StepContext, StepStatus};
use super::registry::{Capability, DirectiveRegistry, Registration, StepReference};
use crate::error::{DirectiveError, PipelineError};
use crate::obs;

/// One step of a promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Directive name.
    pub uses: String,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl StepSpec {
    pub fn new(uses: impl Into<String>, config: Value) -> Self {
        Self {
            uses: uses.into(),
            alias: None,
            config,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn effective_alias(&self, index: usize) -> String {
        match self.alias.as_deref() {
            Some(alias) if !alias.is_empty() => alias.to_string(),
            _ => format!("step-{index}"),
        }
    }
}

/// Final status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    /// A step reported `Failure`.
    Failed,
    /// A step errored or could not be started.
    Errored,
    Cancelled,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Succeeded => write!(f, "succeeded"),
            PipelineStatus::Failed => write!(f, "failed"),
            PipelineStatus::Errored => write!(f, "errored"),
            PipelineStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of a step that ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub alias: String,
    pub directive: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Output the step returned, including partial progress on failure.
    #[serde(default)]
    pub output: Map<String, Value>,
    pub duration_ms: u64,
}

/// Result of a complete pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: String,
    pub status: PipelineStatus,
    /// Exactly the steps that ran to completion, in order.
    pub steps: Vec<StepRecord>,
    /// Outputs of every successful step.
    pub state: State,
    /// Set when `status` is `Errored`.
    pub error: Option<PipelineError>,
    pub duration_ms: u64,
    /// Digest of the step list that was executed.
    pub steps_digest: String,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    pub fn succeeded_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count()
    }

    /// The step that stopped the run, if it ran.
    pub fn last_step(&self) -> Option<&StepRecord> {
        self.steps.last()
    }
}

/// SHA-256 over the canonical JSON encoding of `steps`.
pub fn compute_steps_digest(steps: &[StepSpec]) -> String {
    let bytes = serde_json::to_vec(steps).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Parse `${{ outputs.<alias>.<key> }}`. The key is the last segment, so
/// aliases may contain dots.
fn parse_output_reference(s: &str) -> Option<StepReference> {
    let inner = s.trim().strip_prefix("${{")?.strip_suffix("}}")?.trim();
    let path = inner.strip_prefix("outputs.")?;
    let (alias, key) = path.rsplit_once('.')?;
    if alias.is_empty() || key.is_empty() {
        return None;
    }
    Some(StepReference::new(alias, key))
}

fn collect_output_references(value: &Value, out: &mut Vec<StepReference>) {
    match value {
        Value::String(s) => out.extend(parse_output_reference(s)),
        Value::Array(items) => items
            .iter()
            .for_each(|v| collect_output_references(v, out)),
        Value::Object(map) => map
            .values()
            .for_each(|v| collect_output_references(v, out)),
        _ => {}
    }
}

/// Replace every output reference in `value` with the referenced output.
fn substitute_output_references(value: &Value, state: &State) -> Result<Value, StepReference> {
    match value {
        Value::String(s) => match parse_output_reference(s) {
            Some(reference) => state
                .output(&reference.alias, &reference.key)
                .cloned()
                .ok_or(reference),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|v| substitute_output_references(v, state))
            .collect::<Result<Vec<Value>, StepReference>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), substitute_output_references(v, state)?)))
            .collect::<Result<Map<String, Value>, StepReference>>()
            .map(Value::Object),
        _ => Ok(value.clone()),
    }
}

fn describe(reference: &StepReference) -> String {
    format!("outputs.{}.{}", reference.alias, reference.key)
}

struct PlannedStep<'p> {
    index: usize,
    alias: String,
    spec: &'p StepSpec,
    registration: &'p Registration,
}

/// Executes step lists against a directive registry.
pub struct Pipeline<'r> {
    registry: &'r DirectiveRegistry,
}

impl<'r> Pipeline<'r> {
    pub fn new(registry: &'r DirectiveRegistry) -> Self {
        Self { registry }
    }

    fn plan<'p>(&'p self, steps: &'p [StepSpec]) -> Result<Vec<PlannedStep<'p>>, PipelineError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut planned = Vec::with_capacity(steps.len());
        for (index, spec) in steps.iter().enumerate() {
            let alias = spec.effective_alias(index);
            let registration =
                self.registry
                    .lookup(&spec.uses)
                    .ok_or_else(|| PipelineError::UnknownDirective {
                        index,
                        alias: alias.clone(),
                        directive: spec.uses.clone(),
                    })?;

            let mut references = Vec::new();
            collect_output_references(&spec.config, &mut references);
            references.extend(registration.directive.step_references(&spec.config));
            if let Some(dangling) = references.iter().find(|r| !seen.contains(&r.alias)) {
                return Err(PipelineError::UnresolvedReference {
                    index,
                    alias,
                    reference: describe(dangling),
                });
            }

            if !seen.insert(alias.clone()) {
                return Err(PipelineError::DuplicateAlias { index, alias });
            }
            planned.push(PlannedStep {
                index,
                alias,
                spec,
                registration,
            });
        }
        Ok(planned)
    }

    /// Resolve references, validate config and check capabilities for one
    /// step, producing the config the directive will run with.
    fn prepare(&self, step: &PlannedStep<'_>, state: &State) -> Result<Value, PipelineError> {
        let directive = &step.registration.directive;
        let config = substitute_output_references(&step.spec.config, state).map_err(|r| {
            PipelineError::UnresolvedReference {
                index: step.index,
                alias: step.alias.clone(),
                reference: describe(&r),
            }
        })?;
        if let Some(missing) = directive
            .step_references(&config)
            .into_iter()
            .find(|r| state.output(&r.alias, &r.key).is_none())
        {
            return Err(PipelineError::UnresolvedReference {
                index: step.index,
                alias: step.alias.clone(),
                reference: describe(&missing),
            });
        }

        directive
            .schema()
            .validate(&config)
            .map_err(|source| PipelineError::ConfigInvalid {
                index: step.index,
                alias: step.alias.clone(),
                source,
            })?;

        for capability in directive.required_capabilities(&config) {
            if !step.registration.permissions.allows(&capability) {
                return Err(PipelineError::CapabilityDenied {
                    index: step.index,
                    alias: step.alias.clone(),
                    directive: directive.name().to_string(),
                    capability,
                });
            }
        }
        Ok(config)
    }

    /// Run `steps` in order.
    ///
    /// Pre-flight problems are returned as `Err` before any step runs.
    /// Everything after that is reported through the result's status.
    #[instrument(skip_all, fields(promotion = %ctx.promotion, stage = %ctx.stage))]
    pub async fn execute(
        &self,
        ctx: &PromotionContext,
        steps: &[StepSpec],
    ) -> Result<PipelineResult, PipelineError> {
        let planned = self.plan(steps)?;

        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let steps_digest = compute_steps_digest(steps);
        obs::emit_promotion_started(&run_id, &ctx.promotion, &ctx.stage, planned.len());

        let mut state = State::new();
        let mut records: Vec<StepRecord> = Vec::new();
        let mut status = PipelineStatus::Succeeded;
        let mut error: Option<PipelineError> = None;

        for step in &planned {
            if ctx.cancellation.is_cancelled() {
                status = PipelineStatus::Cancelled;
                break;
            }

            let config = match self.prepare(step, &state) {
                Ok(config) => config,
                Err(e) => {
                    obs::emit_step_rejected(&run_id, &step.alias, &e);
                    status = PipelineStatus::Errored;
                    error = Some(e);
                    break;
                }
            };

            let permissions = &step.registration.permissions;
            let credentials = ctx
                .credentials
                .as_deref()
                .filter(|_| permissions.allows(&Capability::CredentialsDb));
            let argocd = ctx
                .argocd
                .as_deref()
                .filter(|_| permissions.allows(&Capability::ArgoCdClient));

            let step_start = Instant::now();
            let outcome = {
                let step_ctx = StepContext::new(ctx, &step.alias, &state, credentials, argocd);
                debug!(alias = %step.alias, directive = %step.spec.uses, "running step");
                tokio::select! {
                    biased;
                    _ = ctx.cancellation.cancelled() => None,
                    result = step.registration.directive.run(&step_ctx, &config) => Some(result),
                }
            };
            let duration_ms = step_start.elapsed().as_millis() as u64;

            let Some(outcome) = outcome else {
                status = PipelineStatus::Cancelled;
                break;
            };

            let (record, step_error) = match outcome {
                Ok(result) => {
                    let step_error = match result.status {
                        StepStatus::Error => Some(DirectiveError::Reported(
                            result
                                .message
                                .clone()
                                .unwrap_or_else(|| "step reported an error".to_string()),
                        )),
                        _ => None,
                    };
                    (
                        StepRecord {
                            index: step.index,
                            alias: step.alias.clone(),
                            directive: step.spec.uses.clone(),
                            status: result.status,
                            message: result.message,
                            output: result.output,
                            duration_ms,
                        },
                        step_error,
                    )
                }
                Err(e) => (
                    StepRecord {
                        index: step.index,
                        alias: step.alias.clone(),
                        directive: step.spec.uses.clone(),
                        status: StepStatus::Error,
                        message: Some(e.to_string()),
                        output: Map::new(),
                        duration_ms,
                    },
                    Some(e),
                ),
            };
            obs::emit_step_finished(&run_id, &record);

            match record.status {
                StepStatus::Success => {
                    state.record(&record.alias, record.output.clone());
                    records.push(record);
                }
                StepStatus::Failure => {
                    records.push(record);
                    status = PipelineStatus::Failed;
                    break;
                }
                StepStatus::Error => {
                    records.push(record);
                    status = PipelineStatus::Errored;
                    error = step_error.map(|source| PipelineError::Step {
                        index: step.index,
                        alias: step.alias.clone(),
                        source,
                    });
                    break;
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_promotion_finished(&run_id, status, records.len(), duration_ms);

        Ok(PipelineResult {
            run_id,
            status,
            steps: records,
            state,
            error,
            duration_ms,
            steps_digest,
        })
    }
}
