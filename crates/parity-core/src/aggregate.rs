//! Aggregator: folds per-item results into corpus-level counts and rates.
//!
//! Results are collected in completion order and folded once, sorted by item
//! id, so the same set of results always yields the same report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{PipelineResult, Stage, StageStatus, Verdict};

/// Samples kept per error category.
pub const MAX_CATEGORY_SAMPLES: usize = 3;

/// Tier key for items without a tier (tiering disabled or parse failure).
pub const UNCLASSIFIED_TIER: &str = "unclassified";

/// A ratio that records whether it was defined.
///
/// A zero denominator yields `value == 0.0` with `defined == false`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateMetric {
    pub value: f64,
    pub numerator: u64,
    pub denominator: u64,
    pub defined: bool,
}

impl RateMetric {
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self {
                value: 0.0,
                numerator,
                denominator,
                defined: false,
            };
        }
        Self {
            value: numerator as f64 / denominator as f64,
            numerator,
            denominator,
            defined: true,
        }
    }

    pub fn percent(&self) -> f64 {
        self.value * 100.0
    }
}

/// Outcome counts for one stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCounts {
    /// Outcomes recorded for the stage, skipped ones included.
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl StageCounts {
    pub fn passed(&self) -> u64 {
        self.succeeded + self.skipped
    }
}

/// Histogram entry for one error category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryStats {
    pub count: u64,

    /// Up to [`MAX_CATEGORY_SAMPLES`] `"<item>: <message>"` strings.
    pub samples: Vec<String>,
}

/// Pass counts for one annotation tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierBreakdown {
    pub checked: u64,
    pub compile_success: u64,
    pub success: u64,
    pub true_success_rate: RateMetric,
}

impl Default for TierBreakdown {
    fn default() -> Self {
        Self {
            checked: 0,
            compile_success: 0,
            success: 0,
            true_success_rate: RateMetric::ratio(0, 0),
        }
    }
}

/// Corpus-level counts and derived rates for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateReport {
    /// Items enumerated, including excluded ones.
    pub total_items: u64,
    /// Items that entered the pipeline.
    pub checked: u64,
    /// Items that could not be loaded.
    pub excluded: u64,

    pub transpile_success: u64,
    pub transpile_failure: u64,
    pub compile_attempts: u64,
    pub compile_success: u64,
    pub compile_failure: u64,
    pub reference_failure: u64,
    pub candidate_failure: u64,
    pub semantic_mismatch: u64,
    pub internal_error: u64,
    pub success: u64,
    pub timeouts: u64,

    pub stages: BTreeMap<Stage, StageCounts>,
    pub verdicts: BTreeMap<Verdict, u64>,
    pub categories: BTreeMap<String, CategoryStats>,
    pub error_codes: BTreeMap<String, u64>,
    pub tiers: BTreeMap<String, TierBreakdown>,

    /// transpile_success / checked
    pub transpile_rate: RateMetric,
    /// compile_success / transpile_success
    pub compile_rate: RateMetric,
    /// success / compile_success
    pub semantic_parity_rate: RateMetric,
    /// success / checked
    pub true_success_rate: RateMetric,
}

impl AggregateReport {
    /// Fold a result list. The input order does not matter.
    pub fn from_results(results: &[PipelineResult], excluded: usize) -> Self {
        let mut ordered: Vec<&PipelineResult> = results.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));

        let mut report = Self::empty(excluded as u64);
        for result in ordered {
            report.fold(result);
        }
        report.finalize();
        report
    }

    fn empty(excluded: u64) -> Self {
        Self {
            total_items: excluded,
            checked: 0,
            excluded,
            transpile_success: 0,
            transpile_failure: 0,
            compile_attempts: 0,
            compile_success: 0,
            compile_failure: 0,
            reference_failure: 0,
            candidate_failure: 0,
            semantic_mismatch: 0,
            internal_error: 0,
            success: 0,
            timeouts: 0,
            stages: BTreeMap::new(),
            verdicts: BTreeMap::new(),
            categories: BTreeMap::new(),
            error_codes: BTreeMap::new(),
            tiers: BTreeMap::new(),
            transpile_rate: RateMetric::ratio(0, 0),
            compile_rate: RateMetric::ratio(0, 0),
            semantic_parity_rate: RateMetric::ratio(0, 0),
            true_success_rate: RateMetric::ratio(0, 0),
        }
    }

    fn fold(&mut self, result: &PipelineResult) {
        self.total_items += 1;
        self.checked += 1;

        for outcome in &result.stages {
            let counts = self.stages.entry(outcome.stage).or_default();
            counts.attempted += 1;
            match outcome.status {
                StageStatus::Success => counts.succeeded += 1,
                StageStatus::Skipped => counts.skipped += 1,
                StageStatus::Failure => counts.failed += 1,
                StageStatus::Timeout => counts.timed_out += 1,
            }
        }

        if result.passed(Stage::Transpile) {
            self.transpile_success += 1;
        } else {
            self.transpile_failure += 1;
        }
        if let Some(compile) = result.outcome(Stage::Compile) {
            self.compile_attempts += 1;
            if compile.passed() {
                self.compile_success += 1;
            } else {
                self.compile_failure += 1;
            }
        }
        if result.outcome(Stage::RunReference).is_some_and(|o| !o.passed()) {
            self.reference_failure += 1;
        }
        if result.outcome(Stage::RunCandidate).is_some_and(|o| !o.passed()) {
            self.candidate_failure += 1;
        }

        match result.verdict {
            Verdict::Success => self.success += 1,
            Verdict::SemanticMismatch => self.semantic_mismatch += 1,
            Verdict::InternalError => self.internal_error += 1,
            _ => {}
        }
        if result.verdict.is_timeout() {
            self.timeouts += 1;
        }
        *self.verdicts.entry(result.verdict).or_default() += 1;

        if let Some(error) = &result.error {
            for category in &error.categories {
                let stats = self.categories.entry(category.clone()).or_default();
                stats.count += 1;
                if stats.samples.len() < MAX_CATEGORY_SAMPLES {
                    stats.samples.push(format!("{}: {}", result.id(), error.message));
                }
            }
            for code in &error.error_codes {
                *self.error_codes.entry(code.clone()).or_default() += 1;
            }
        }

        let tier_key = result
            .tier
            .as_ref()
            .and_then(|t| t.tier())
            .map(|t| t.key())
            .unwrap_or(UNCLASSIFIED_TIER);
        let tier = self.tiers.entry(tier_key.to_string()).or_default();
        tier.checked += 1;
        if result.passed(Stage::Compile) {
            tier.compile_success += 1;
        }
        if result.verdict.is_success() {
            tier.success += 1;
        }
    }

    fn finalize(&mut self) {
        self.transpile_rate = RateMetric::ratio(self.transpile_success, self.checked);
        self.compile_rate = RateMetric::ratio(self.compile_success, self.transpile_success);
        self.semantic_parity_rate = RateMetric::ratio(self.success, self.compile_success);
        self.true_success_rate = RateMetric::ratio(self.success, self.checked);
        for tier in self.tiers.values_mut() {
            tier.true_success_rate = RateMetric::ratio(tier.success, tier.checked);
        }
    }

    /// Items that did not reach `Success`.
    pub fn failures(&self) -> u64 {
        self.checked - self.success
    }

    /// Count for one verdict.
    pub fn verdict_count(&self, verdict: Verdict) -> u64 {
        self.verdicts.get(&verdict).copied().unwrap_or(0)
    }

    /// `checked == success + Σ failure verdicts` and
    /// `checked == transpile_success + transpile_failure`.
    pub fn accounting_balanced(&self) -> bool {
        let failures: u64 = self
            .verdicts
            .iter()
            .filter(|(v, _)| !v.is_success())
            .map(|(_, n)| n)
            .sum();
        self.checked == self.success + failures
            && self.checked == self.transpile_success + self.transpile_failure
            && self.total_items == self.checked + self.excluded
    }

    /// Each stage was attempted exactly as often as the previous one passed.
    pub fn pipeline_ordering_holds(&self) -> bool {
        if self.compile_attempts != self.transpile_success {
            return false;
        }
        Stage::ORDER.windows(2).all(|pair| {
            let previous = self.stages.get(&pair[0]).map(|c| c.passed()).unwrap_or(0);
            let attempted = self.stages.get(&pair[1]).map(|c| c.attempted).unwrap_or(0);
            attempted == previous
        }) && self.stages.get(&Stage::Transpile).map(|c| c.attempted).unwrap_or(0) == self.checked
    }

    /// `true_success_rate == transpile_rate × compile_rate × semantic_parity_rate`
    /// within `tolerance`, whenever all three factors are defined.
    pub fn rates_consistent(&self, tolerance: f64) -> bool {
        if !(self.transpile_rate.defined
            && self.compile_rate.defined
            && self.semantic_parity_rate.defined)
        {
            return true;
        }
        let product =
            self.transpile_rate.value * self.compile_rate.value * self.semantic_parity_rate.value;
        (self.true_success_rate.value - product).abs() <= tolerance
    }
}

/// Append-only collector; the single aggregation point of a run.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: Vec<PipelineResult>,
    excluded: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: PipelineResult) {
        self.results.push(result);
    }

    pub fn record_excluded(&mut self, count: usize) {
        self.excluded += count;
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Fold everything collected and hand back the results sorted by id.
    pub fn finalize(mut self) -> (AggregateReport, Vec<PipelineResult>) {
        let report = AggregateReport::from_results(&self.results, self.excluded);
        self.results.sort_by(|a, b| a.id().cmp(b.id()));
        (report, self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassifiedError, CorpusItem, StageOutcome, Tier, TierAssessment};
    use std::sync::Arc;

    fn outcome(stage: Stage, status: StageStatus) -> StageOutcome {
        StageOutcome {
            stage,
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(if status == StageStatus::Success { 0 } else { 1 }),
            duration_ms: 1,
        }
    }

    fn result(id: &str, statuses: &[StageStatus], verdict: Verdict) -> PipelineResult {
        PipelineResult {
            item: Arc::new(CorpusItem::new(id, id, "print(1)\n")),
            stages: statuses
                .iter()
                .zip(Stage::ORDER)
                .map(|(status, stage)| outcome(stage, *status))
                .collect(),
            verdict,
            error: None,
            mismatch: None,
            tier: None,
            duration_ms: 5,
        }
    }

    use StageStatus::{Failure, Skipped, Success, Timeout};

    #[test]
    fn test_rate_metric_zero_denominator() {
        let rate = RateMetric::ratio(0, 0);
        assert_eq!(rate.value, 0.0);
        assert!(!rate.defined);
        assert!(RateMetric::ratio(1, 2).defined);
    }

    #[test]
    fn test_empty_run() {
        let report = AggregateReport::from_results(&[], 0);
        assert_eq!(report.checked, 0);
        assert!(!report.compile_rate.defined);
        assert!(!report.true_success_rate.defined);
        assert!(report.accounting_balanced());
        assert!(report.pipeline_ordering_holds());
    }

    #[test]
    fn test_counts_for_mixed_run() {
        let results = vec![
            result("a.py", &[Success; 5], Verdict::Success),
            result("b.py", &[Failure], Verdict::TranspileFailure),
            result("c.py", &[Success, Timeout], Verdict::CompileTimeout),
            result("d.py", &[Success, Success, Failure], Verdict::ReferenceRuntimeError),
            result("e.py", &[Skipped, Success, Success, Failure], Verdict::CandidateRuntimeError),
        ];
        let report = AggregateReport::from_results(&results, 1);
        assert_eq!(report.total_items, 6);
        assert_eq!(report.checked, 5);
        assert_eq!(report.transpile_success, 4);
        assert_eq!(report.transpile_failure, 1);
        assert_eq!(report.compile_attempts, 4);
        assert_eq!(report.compile_success, 3);
        assert_eq!(report.compile_failure, 1);
        assert_eq!(report.reference_failure, 1);
        assert_eq!(report.candidate_failure, 1);
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.stages[&Stage::Transpile].skipped, 1);
        assert_eq!(report.verdict_count(Verdict::CompileTimeout), 1);
        assert!(report.accounting_balanced());
        assert!(report.pipeline_ordering_holds());
        assert!(report.rates_consistent(1e-9));
    }

    #[test]
    fn test_category_samples_bounded() {
        let results: Vec<PipelineResult> = (0..5)
            .map(|i| {
                let mut r = result(&format!("item{i}.py"), &[Success, Failure], Verdict::CompileFailure);
                r.error = Some(ClassifiedError {
                    categories: vec!["TypeMismatch".to_string()],
                    error_codes: vec!["E0308".to_string()],
                    message: "error[E0308]: mismatched types".to_string(),
                });
                r
            })
            .collect();
        let report = AggregateReport::from_results(&results, 0);
        let stats = &report.categories["TypeMismatch"];
        assert_eq!(stats.count, 5);
        assert_eq!(stats.samples.len(), MAX_CATEGORY_SAMPLES);
        assert_eq!(stats.samples[0], "item0.py: error[E0308]: mismatched types");
        assert_eq!(report.error_codes["E0308"], 5);
    }

    #[test]
    fn test_tier_breakdown() {
        let mut a = result("a.py", &[Success; 5], Verdict::Success);
        a.tier = Some(TierAssessment::Tagged { tier: Tier::Annotated });
        let mut b = result("b.py", &[Success, Failure], Verdict::CompileFailure);
        b.tier = Some(TierAssessment::Tagged { tier: Tier::Unannotated });
        let mut c = result("c.py", &[Success, Success, Success, Success, Failure], Verdict::SemanticMismatch);
        c.tier = Some(TierAssessment::ParseError {
            message: "bad".to_string(),
        });

        let report = AggregateReport::from_results(&[a, b, c], 0);
        assert_eq!(report.tiers["tier1"].success, 1);
        assert_eq!(report.tiers["tier1"].true_success_rate.value, 1.0);
        assert_eq!(report.tiers["tier2"].compile_success, 0);
        assert_eq!(report.tiers[UNCLASSIFIED_TIER].checked, 1);
        assert_eq!(report.tiers[UNCLASSIFIED_TIER].compile_success, 1);
    }

    #[test]
    fn test_aggregator_sorts_completion_order() {
        let mut agg = Aggregator::new();
        agg.push(result("z.py", &[Failure], Verdict::TranspileFailure));
        agg.push(result("a.py", &[Success; 5], Verdict::Success));
        agg.record_excluded(2);
        assert_eq!(agg.len(), 2);

        let (report, results) = agg.finalize();
        assert_eq!(results[0].id(), "a.py");
        assert_eq!(report.total_items, 4);
        assert_eq!(report.excluded, 2);
    }
}
