//! Aggregation over hand-built pipeline results.

use parity_core::{
    AggregateReport, Aggregator, ClassifiedError, CorpusItem, ErrorClassifier, OutputMismatch,
    PipelineResult, Stage, StageOutcome, StageStatus, Verdict,
};
use std::sync::Arc;

fn outcome(stage: Stage, status: StageStatus, stdout: &str, stderr: &str) -> StageOutcome {
    StageOutcome {
        stage,
        status,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: match (stage, status) {
            (Stage::Compare, _) => None,
            (_, StageStatus::Success) => Some(0),
            _ => Some(1),
        },
        duration_ms: 10,
    }
}

fn item(id: &str) -> Arc<CorpusItem> {
    Arc::new(CorpusItem::new(id, format!("/corpus/{id}"), "print(7)\n"))
}

/// A: matches; B: unresolved symbol at compile; C: output mismatch.
fn three_item_scenario() -> Vec<PipelineResult> {
    let classifier = ErrorClassifier::with_default_rules().expect("rules");

    let a = PipelineResult {
        item: item("a.py"),
        stages: vec![
            outcome(Stage::Transpile, StageStatus::Success, "", ""),
            outcome(Stage::Compile, StageStatus::Success, "", ""),
            outcome(Stage::RunReference, StageStatus::Success, "7\n", ""),
            outcome(Stage::RunCandidate, StageStatus::Success, "7\n", ""),
            outcome(Stage::Compare, StageStatus::Success, "", ""),
        ],
        verdict: Verdict::Success,
        error: None,
        mismatch: None,
        tier: None,
        duration_ms: 40,
    };

    let stderr = "error[E0425]: cannot find value `total` in this scope";
    let b = PipelineResult {
        item: item("b.py"),
        stages: vec![
            outcome(Stage::Transpile, StageStatus::Success, "", ""),
            outcome(Stage::Compile, StageStatus::Failure, "", stderr),
        ],
        verdict: Verdict::CompileFailure,
        error: Some(classifier.classify(Stage::Compile, stderr)),
        mismatch: None,
        tier: None,
        duration_ms: 20,
    };

    let c = PipelineResult {
        item: item("c.py"),
        stages: vec![
            outcome(Stage::Transpile, StageStatus::Success, "", ""),
            outcome(Stage::Compile, StageStatus::Success, "", ""),
            outcome(Stage::RunReference, StageStatus::Success, "1,2,3", ""),
            outcome(Stage::RunCandidate, StageStatus::Success, "1,2,4", ""),
            outcome(Stage::Compare, StageStatus::Failure, "", ""),
        ],
        verdict: Verdict::SemanticMismatch,
        error: None,
        mismatch: Some(OutputMismatch {
            expected: "1,2,3".to_string(),
            actual: "1,2,4".to_string(),
            first_difference_line: Some(1),
        }),
        tier: None,
        duration_ms: 40,
    };

    vec![a, b, c]
}

#[test]
fn three_item_scenario_counts_and_rates() {
    let results = three_item_scenario();
    assert!(results.iter().all(|r| r.is_canonical_prefix()));

    let report = AggregateReport::from_results(&results, 0);
    assert_eq!(report.checked, 3);
    assert_eq!(report.transpile_success, 3);
    assert_eq!(report.compile_attempts, 3);
    assert_eq!(report.compile_success, 2);
    assert_eq!(report.success, 1);
    assert_eq!(report.semantic_mismatch, 1);
    assert_eq!(report.verdict_count(Verdict::CompileFailure), 1);
    assert_eq!(report.categories["UnresolvedSymbol"].count, 1);
    assert_eq!(report.error_codes["E0425"], 1);

    assert!((report.semantic_parity_rate.percent() - 50.0).abs() < 1e-9);
    assert!((report.compile_rate.percent() - 66.666_666).abs() < 1e-3);
    assert!((report.true_success_rate.value - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn true_success_rate_matches_product_of_rates() {
    let report = AggregateReport::from_results(&three_item_scenario(), 0);
    assert!(report.compile_rate.defined && report.semantic_parity_rate.defined);
    let product = report.compile_rate.value * report.semantic_parity_rate.value;
    assert!((report.true_success_rate.value - product).abs() < 1e-6);
    assert!(report.rates_consistent(1e-6));
}

#[test]
fn accounting_and_ordering_invariants() {
    let report = AggregateReport::from_results(&three_item_scenario(), 2);
    assert!(report.accounting_balanced());
    assert!(report.pipeline_ordering_holds());
    assert_eq!(report.total_items, 5);
    assert_eq!(report.failures(), 2);
}

#[test]
fn fold_is_idempotent_and_order_independent() {
    let results = three_item_scenario();
    let first = serde_json::to_string(&AggregateReport::from_results(&results, 0)).expect("json");
    let second = serde_json::to_string(&AggregateReport::from_results(&results, 0)).expect("json");
    assert_eq!(first, second);

    let mut aggregator = Aggregator::new();
    for result in results.into_iter().rev() {
        aggregator.push(result);
    }
    let (report, ordered) = aggregator.finalize();
    assert_eq!(serde_json::to_string(&report).expect("json"), first);
    let ids: Vec<&str> = ordered.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["a.py", "b.py", "c.py"]);
}

#[test]
fn zero_denominators_are_flagged() {
    let failed = PipelineResult {
        item: item("x.py"),
        stages: vec![outcome(Stage::Transpile, StageStatus::Timeout, "", "")],
        verdict: Verdict::TranspileTimeout,
        error: None,
        mismatch: None,
        tier: None,
        duration_ms: 1000,
    };
    let report = AggregateReport::from_results(&[failed], 0);
    assert_eq!(report.compile_rate.value, 0.0);
    assert!(!report.compile_rate.defined);
    assert!(!report.semantic_parity_rate.defined);
    assert!(report.true_success_rate.defined);
    assert_eq!(report.timeouts, 1);

    let json = serde_json::to_value(&report).expect("json");
    assert_eq!(json["compile_rate"]["defined"], serde_json::json!(false));
}

#[test]
fn internal_errors_are_counted_as_failures() {
    let mut results = three_item_scenario();
    results.push(PipelineResult::internal_error(item("d.py"), "worker panicked"));
    let report = AggregateReport::from_results(&results, 0);
    assert_eq!(report.checked, 4);
    assert_eq!(report.internal_error, 1);
    assert_eq!(report.transpile_failure, 1);
    assert_eq!(report.categories["HarnessError"].count, 1);
    assert!(report.accounting_balanced());
    assert!(report.pipeline_ordering_holds());
}

#[test]
fn classified_error_message_feeds_samples() {
    let results = three_item_scenario();
    let report = AggregateReport::from_results(&results, 0);
    let samples = &report.categories["UnresolvedSymbol"].samples;
    assert_eq!(samples.len(), 1);
    assert!(samples[0].starts_with("b.py: error[E0425]"));

    let manual = ClassifiedError {
        categories: vec!["UnresolvedSymbol".to_string()],
        error_codes: vec!["E0425".to_string()],
        message: "error[E0425]: cannot find value `total` in this scope".to_string(),
    };
    assert_eq!(results[1].error.as_ref(), Some(&manual));
}
