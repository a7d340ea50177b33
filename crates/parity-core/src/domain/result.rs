//! Per-item pipeline results.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::corpus::CorpusItem;
use super::stage::{Stage, StageOutcome};
use super::tier::TierAssessment;
use super::verdict::Verdict;

/// Taxonomy labels and diagnostic codes extracted from a failed stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedError {
    /// Category labels, in rule-table order. Never empty once classified.
    pub categories: Vec<String>,

    /// Distinct compiler diagnostic codes (e.g. `E0425`), in order of appearance.
    pub error_codes: Vec<String>,

    /// First meaningful error line.
    pub message: String,
}

/// Category for failures of the harness rather than of the tools.
pub const HARNESS_ERROR: &str = "HarnessError";

impl ClassifiedError {
    pub fn harness(message: impl Into<String>) -> Self {
        Self {
            categories: vec![HARNESS_ERROR.to_string()],
            error_codes: Vec::new(),
            message: message.into(),
        }
    }
}

/// Bounded previews of both sides of a semantic mismatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputMismatch {
    /// Oracle stdout (bounded).
    pub expected: String,

    /// Candidate stdout (bounded).
    pub actual: String,

    /// 1-based line of the first difference, after normalization.
    pub first_difference_line: Option<usize>,
}

/// The single structured result for one corpus item.
///
/// Created once by the pipeline controller and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The item this result belongs to.
    pub item: Arc<CorpusItem>,

    /// One outcome per attempted stage, in canonical order.
    pub stages: Vec<StageOutcome>,

    /// Terminal verdict.
    pub verdict: Verdict,

    /// Classification of the failing stage's stderr, if it failed.
    pub error: Option<ClassifiedError>,

    /// Output previews for semantic mismatches.
    pub mismatch: Option<OutputMismatch>,

    /// Tier assessment, when tiering is enabled.
    pub tier: Option<TierAssessment>,

    /// End-to-end duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Result for an item the harness could not process.
    ///
    /// The failure is recorded against the transpile stage so the stage list
    /// stays a non-empty canonical prefix.
    pub fn internal_error(item: Arc<CorpusItem>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            item,
            stages: vec![StageOutcome::harness_failure(Stage::Transpile, message.clone(), 0)],
            verdict: Verdict::InternalError,
            error: Some(ClassifiedError::harness(message)),
            mismatch: None,
            tier: None,
            duration_ms: 0,
        }
    }

    /// Item identifier.
    pub fn id(&self) -> &str {
        &self.item.id
    }

    /// Last stage attempted.
    pub fn stage_reached(&self) -> Option<Stage> {
        self.stages.last().map(|o| o.stage)
    }

    /// Outcome for a stage, if it was attempted.
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|o| o.stage == stage)
    }

    /// Whether a stage was attempted and passed.
    pub fn passed(&self, stage: Stage) -> bool {
        self.outcome(stage).is_some_and(|o| o.passed())
    }

    /// Category labels of the failing stage (empty on success).
    pub fn error_categories(&self) -> &[String] {
        self.error
            .as_ref()
            .map(|e| e.categories.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `stages` is a non-empty prefix of the canonical order in which
    /// every stage but the last passed.
    pub fn is_canonical_prefix(&self) -> bool {
        if self.stages.is_empty() {
            return false;
        }
        let in_order = self
            .stages
            .iter()
            .enumerate()
            .all(|(i, o)| o.stage == Stage::ORDER[i]);
        let gated = self.stages[..self.stages.len() - 1]
            .iter()
            .all(|o| o.passed());
        in_order && gated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageStatus;

    fn outcome(stage: Stage, status: StageStatus) -> StageOutcome {
        StageOutcome {
            stage,
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        }
    }

    fn item() -> Arc<CorpusItem> {
        Arc::new(CorpusItem::new("a.py", "/a.py", "print(7)\n"))
    }

    #[test]
    fn test_internal_error_is_canonical_prefix() {
        let result = PipelineResult::internal_error(item(), "worker panicked");
        assert!(result.is_canonical_prefix());
        assert_eq!(result.verdict, Verdict::InternalError);
        assert_eq!(result.stage_reached(), Some(Stage::Transpile));
        assert_eq!(result.error_categories(), [HARNESS_ERROR.to_string()]);
    }

    #[test]
    fn test_out_of_order_stages_rejected() {
        let result = PipelineResult {
            item: item(),
            stages: vec![
                outcome(Stage::Compile, StageStatus::Success),
                outcome(Stage::Transpile, StageStatus::Success),
            ],
            verdict: Verdict::Success,
            error: None,
            mismatch: None,
            tier: None,
            duration_ms: 2,
        };
        assert!(!result.is_canonical_prefix());
    }

    #[test]
    fn test_failure_before_last_stage_rejected() {
        let result = PipelineResult {
            item: item(),
            stages: vec![
                outcome(Stage::Transpile, StageStatus::Failure),
                outcome(Stage::Compile, StageStatus::Success),
            ],
            verdict: Verdict::TranspileFailure,
            error: None,
            mismatch: None,
            tier: None,
            duration_ms: 2,
        };
        assert!(!result.is_canonical_prefix());
    }

    #[test]
    fn test_skipped_transpile_passes_gate() {
        let result = PipelineResult {
            item: item(),
            stages: vec![
                outcome(Stage::Transpile, StageStatus::Skipped),
                outcome(Stage::Compile, StageStatus::Failure),
            ],
            verdict: Verdict::CompileFailure,
            error: None,
            mismatch: None,
            tier: None,
            duration_ms: 2,
        };
        assert!(result.is_canonical_prefix());
        assert!(result.passed(Stage::Transpile));
        assert!(!result.passed(Stage::Compile));
    }
}
