//! Verification gate evaluation for pass/fail criteria.

use parity_core::{AggregateReport, VerificationMode, Verdict};
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Verification gate rules.
pub struct ParityGate;

impl ParityGate {
    /// Evaluate a completed run.
    ///
    /// Gate rule:
    /// - `Hard`: at least one item was checked and every checked item reached
    ///   `Success`; each non-success verdict class is one violation
    /// - `Survey`: passes whenever the run completed
    pub fn evaluate(report: &AggregateReport, mode: VerificationMode) -> GateVerdict {
        let mut violations = Vec::new();

        if mode == VerificationMode::Hard {
            if report.checked == 0 {
                violations.push("No corpus items were checked".to_string());
            }
            for verdict in Verdict::PIPELINE.iter().filter(|v| !v.is_success()) {
                let count = report.verdict_count(*verdict);
                if count > 0 {
                    violations.push(format!("{count} item(s) ended in {verdict}"));
                }
            }
        }

        let passed = violations.is_empty();
        let message = if !passed {
            format!("Gate failed with {} violation(s)", violations.len())
        } else if mode == VerificationMode::Survey {
            format!(
                "Survey complete: {}/{} items reached Success",
                report.success, report.checked
            )
        } else {
            format!("All {} items reached Success", report.checked)
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_core::{CorpusItem, PipelineResult, Stage, StageOutcome, StageStatus};
    use std::sync::Arc;

    fn result(id: &str, verdict: Verdict, stages: Vec<StageOutcome>) -> PipelineResult {
        PipelineResult {
            item: Arc::new(CorpusItem::new(id, id, "")),
            stages,
            verdict,
            error: None,
            mismatch: None,
            tier: None,
            duration_ms: 1,
        }
    }

    fn passing(stage: Stage) -> StageOutcome {
        StageOutcome {
            stage,
            status: StageStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        }
    }

    fn success(id: &str) -> PipelineResult {
        result(id, Verdict::Success, Stage::ORDER.iter().map(|s| passing(*s)).collect())
    }

    fn transpile_timeout(id: &str) -> PipelineResult {
        let mut outcome = passing(Stage::Transpile);
        outcome.status = StageStatus::Timeout;
        outcome.exit_code = None;
        result(id, Verdict::TranspileTimeout, vec![outcome])
    }

    #[test]
    fn test_hard_mode_all_success_passes() {
        let report = AggregateReport::from_results(&[success("a.py"), success("b.py")], 0);
        let verdict = ParityGate::evaluate(&report, VerificationMode::Hard);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.message, "All 2 items reached Success");
    }

    #[test]
    fn test_hard_mode_failure_lists_violations() {
        let report = AggregateReport::from_results(
            &[success("a.py"), transpile_timeout("b.py"), transpile_timeout("c.py")],
            0,
        );
        let verdict = ParityGate::evaluate(&report, VerificationMode::Hard);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].starts_with("2 item(s)"));
    }

    #[test]
    fn test_hard_mode_empty_run_fails() {
        let report = AggregateReport::from_results(&[], 3);
        let verdict = ParityGate::evaluate(&report, VerificationMode::Hard);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations, vec!["No corpus items were checked"]);
    }

    #[test]
    fn test_survey_mode_always_passes() {
        let report = AggregateReport::from_results(&[transpile_timeout("a.py")], 0);
        let verdict = ParityGate::evaluate(&report, VerificationMode::Survey);
        assert!(verdict.passed);
        assert_eq!(verdict.message, "Survey complete: 0/1 items reached Success");
    }
}
