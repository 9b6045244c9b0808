//! Structured observability hooks for promotion lifecycle events.
//!
//! Pipeline runs carry their own `promotion`/`stage` span; the functions
//! here emit the start, step and finish events inside it.
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output, set `PROMOTER_LOG_FORMAT=json`.

use tracing::{info, warn};

use crate::directives::context::StepStatus;
use crate::directives::pipeline::{PipelineStatus, StepRecord};
use crate::error::PipelineError;

/// Emit event: pipeline run started.
pub fn emit_promotion_started(run_id: &str, promotion: &str, stage: &str, steps: usize) {
    info!(
        event = "promotion.started",
        run_id = %run_id,
        promotion = %promotion,
        stage = %stage,
        steps = steps,
    );
}

/// Emit event: a step finished with the given status.
pub fn emit_step_finished(run_id: &str, record: &StepRecord) {
    match record.status {
        StepStatus::Success => info!(
            event = "step.finished",
            run_id = %run_id,
            alias = %record.alias,
            directive = %record.directive,
            status = %record.status,
            duration_ms = record.duration_ms,
        ),
        _ => warn!(
            event = "step.finished",
            run_id = %run_id,
            alias = %record.alias,
            directive = %record.directive,
            status = %record.status,
            message = record.message.as_deref().unwrap_or(""),
            duration_ms = record.duration_ms,
        ),
    }
}

/// Emit event: a step was rejected before it could run (warning level).
pub fn emit_step_rejected(run_id: &str, alias: &str, error: &PipelineError) {
    warn!(
        event = "step.rejected",
        run_id = %run_id,
        alias = %alias,
        kind = %error.kind(),
        error = %error,
    );
}

/// Emit event: pipeline run finished.
pub fn emit_promotion_finished(
    run_id: &str,
    status: PipelineStatus,
    steps_run: usize,
    duration_ms: u64,
) {
    info!(
        event = "promotion.finished",
        run_id = %run_id,
        status = %status,
        steps_run = steps_run,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        emit_promotion_started("run-1", "p1", "dev", 2);
        emit_step_finished(
            "run-1",
            &StepRecord {
                index: 0,
                alias: "push".to_string(),
                directive: "git-push".to_string(),
                status: StepStatus::Failure,
                message: Some("rejected".to_string()),
                output: Map::new(),
                duration_ms: 3,
            },
        );
        emit_promotion_finished("run-1", PipelineStatus::Failed, 1, 5);
    }
}
