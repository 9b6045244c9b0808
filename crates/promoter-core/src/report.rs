use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::directives::context::{State, StepStatus};
use crate::directives::pipeline::{PipelineResult, PipelineStatus, StepRecord};

/// Persisted summary of one pipeline run, for callers that surface promotion
/// results outside the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineReport {
    pub schema_version: String,
    pub run_id: String,
    pub promotion: String,
    pub stage: String,
    pub status: PipelineStatus,
    pub steps_digest: String,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn from_result(promotion: &str, stage: &str, result: &PipelineResult) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            run_id: result.run_id.clone(),
            promotion: promotion.to_string(),
            stage: stage.to_string(),
            status: result.status,
            steps_digest: result.steps_digest.clone(),
            duration_ms: result.duration_ms,
            steps: result.steps.clone(),
            state: result.state.clone(),
            error: result.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Write the report as pretty JSON.
pub fn write_pipeline_report(path: &Path, report: &PipelineReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize pipeline report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Markdown summary for PR comments and check output.
pub fn render_pipeline_summary_md(report: &PipelineReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Promotion {} to {}\n\n",
        report.promotion, report.stage
    ));
    out.push_str(&format!(
        "- status: {}\n- steps run: {}\n- duration: {}ms\n\n",
        report.status,
        report.steps.len(),
        report.duration_ms
    ));

    if !report.steps.is_empty() {
        out.push_str("## Steps\n");
        for step in &report.steps {
            let mark = match step.status {
                StepStatus::Success => "ok",
                StepStatus::Failure => "failed",
                StepStatus::Error => "error",
            };
            out.push_str(&format!("- `{}` ({}): {}", step.alias, step.directive, mark));
            if let Some(message) = &step.message {
                out.push_str(&format!(" - {message}"));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(error) = &report.error {
        out.push_str("## Error\n");
        out.push_str(&format!("{error}\n"));
    }
    out
}
