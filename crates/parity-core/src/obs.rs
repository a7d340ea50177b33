//! Structured lifecycle events for a verification run.
//!
//! Every event carries an `event` field (`run.started`, `item.started`,
//! `stage.finished`, `item.finished`, `run.finished`) so log pipelines can
//! filter on it. Filtering is controlled by `PARITY_LOG`.

use tracing::{info, warn};

use crate::domain::{StageOutcome, Verdict};

/// RAII guard that enters an item-scoped span for the duration of one
/// pipeline run.
///
/// ```ignore
/// let _span = ItemSpan::enter("nested/add.py");
/// // every log line now carries item = "nested/add.py"
/// ```
pub struct ItemSpan {
    _span: tracing::span::EnteredSpan,
}

impl ItemSpan {
    pub fn enter(item_id: &str) -> Self {
        let span = tracing::info_span!("parity.item", item = %item_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, corpus_root: &str, items: usize, workers: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        corpus_root = %corpus_root,
        items = items,
        workers = workers,
    );
}

/// Emit event: an item entered the pipeline.
pub fn emit_item_started(item_id: &str) {
    info!(event = "item.started", item = %item_id);
}

/// Emit event: one stage produced its outcome.
pub fn emit_stage_finished(item_id: &str, outcome: &StageOutcome) {
    info!(
        event = "stage.finished",
        item = %item_id,
        stage = %outcome.stage,
        status = ?outcome.status,
        exit_code = ?outcome.exit_code,
        duration_ms = outcome.duration_ms,
    );
}

/// Emit event: an item reached its verdict.
pub fn emit_item_finished(item_id: &str, verdict: Verdict, duration_ms: u64) {
    info!(
        event = "item.finished",
        item = %item_id,
        verdict = %verdict.label(),
        duration_ms = duration_ms,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, checked: u64, success: u64, passed: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        checked = checked,
        success = success,
        gate_passed = passed,
    );
}

/// Emit event: an item's worker died and the item was recorded as an internal error.
pub fn emit_worker_lost(item_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "item.worker_lost", item = %item_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;

    #[test]
    fn test_item_span_and_events() {
        let _span = ItemSpan::enter("a.py");
        emit_item_started("a.py");
        emit_stage_finished("a.py", &StageOutcome::skipped(Stage::Transpile));
        emit_item_finished("a.py", Verdict::Success, 3);
    }
}
