//! Per-item pipeline controller.
//!
//! Runs `Transpile -> Compile -> RunReference -> RunCandidate -> Compare` for
//! one corpus item, stopping at the first stage that does not pass. Every
//! path, including harness failures, ends in exactly one [`PipelineResult`].

use parity_core::obs::{emit_item_started, emit_stage_finished};
use parity_core::{
    bounded_preview, ClassifiedError, CorpusItem, ErrorClassifier, OutputMismatch, ParityConfig,
    PipelineResult, RuleError, Stage, StageOutcome, StageStatus, TierClassifier, Verdict,
    WhitespacePolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::driver::{ItemWorkspace, StageArtifacts, StageDrivers};
use crate::runner::StreamCapture;

/// Shared, immutable pipeline state; cloned cheaply into every worker.
#[derive(Clone)]
pub struct ParityPipeline {
    drivers: StageDrivers,
    classifier: Arc<ErrorClassifier>,
    tiers: Option<TierClassifier>,
    whitespace: WhitespacePolicy,
    preview_bytes: usize,
    scratch_root: Option<PathBuf>,
}

impl ParityPipeline {
    pub fn new(drivers: StageDrivers, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            drivers,
            classifier,
            tiers: None,
            whitespace: WhitespacePolicy::default(),
            preview_bytes: 2048,
            scratch_root: None,
        }
    }

    /// Build drivers, classifier and tiering from the run configuration.
    pub fn from_config(config: &ParityConfig) -> Result<Self, RuleError> {
        let mut classifier = if config.classifier.replace_defaults {
            ErrorClassifier::empty()?
        } else {
            ErrorClassifier::with_default_rules()?
        };
        if let Some(path) = &config.classifier.rules_file {
            classifier.extend_from_file(path)?;
        }

        let mut pipeline = Self::new(StageDrivers::from_config(config), Arc::new(classifier))
            .with_whitespace(config.compare.whitespace)
            .with_preview_bytes(config.compare.preview_bytes);
        if config.tier.enabled {
            pipeline = pipeline.with_tiers(TierClassifier::new(config.tier.thresholds.clone()));
        }
        if let Some(root) = &config.scratch_dir {
            pipeline = pipeline.with_scratch_root(root.clone());
        }
        Ok(pipeline)
    }

    pub fn with_tiers(mut self, tiers: TierClassifier) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn with_whitespace(mut self, policy: WhitespacePolicy) -> Self {
        self.whitespace = policy;
        self
    }

    pub fn with_preview_bytes(mut self, bytes: usize) -> Self {
        self.preview_bytes = bytes;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn drivers(&self) -> &StageDrivers {
        &self.drivers
    }

    /// Run every stage for one item and produce its terminal result.
    #[instrument(name = "parity.pipeline", skip_all, fields(item = %item.id))]
    pub async fn run_item(&self, item: Arc<CorpusItem>) -> PipelineResult {
        let start = Instant::now();
        emit_item_started(&item.id);

        let tier = self.tiers.as_ref().map(|t| t.assess(&item));

        let workspace = match ItemWorkspace::create(&item, self.scratch_root.as_deref()) {
            Ok(ws) => ws,
            Err(e) => {
                let mut result = PipelineResult::internal_error(
                    item.clone(),
                    format!("failed to prepare scratch directory: {e}"),
                );
                result.tier = tier;
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        let mut artifacts = StageArtifacts::default();
        let mut stages: Vec<StageOutcome> = Vec::with_capacity(Stage::ORDER.len());
        let mut terminal: Option<(Verdict, Option<ClassifiedError>)> = None;

        for driver in self.drivers.iter() {
            let stage = driver.stage();
            let outcome = driver.execute(&item, &workspace, &mut artifacts).await;
            emit_stage_finished(&item.id, &outcome);

            if let Some(verdict) = Verdict::for_stage(stage, outcome.status) {
                let error = self.classify(&outcome);
                stages.push(outcome);
                terminal = Some((verdict, error));
                break;
            }
            stages.push(outcome);
        }

        let (verdict, error, mismatch) = match terminal {
            Some((verdict, error)) => (verdict, error, None),
            None => {
                let (outcome, mismatch) = self.compare(&artifacts);
                emit_stage_finished(&item.id, &outcome);
                stages.push(outcome);
                let verdict = if mismatch.is_some() {
                    Verdict::SemanticMismatch
                } else {
                    Verdict::Success
                };
                (verdict, None, mismatch)
            }
        };

        let scratch = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!(path = %scratch.display(), error = %e, "failed to remove scratch directory");
        }

        PipelineResult {
            item,
            stages,
            verdict,
            error,
            mismatch,
            tier,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Classification for a failed stage; timeouts carry none.
    fn classify(&self, outcome: &StageOutcome) -> Option<ClassifiedError> {
        match outcome.status {
            StageStatus::Failure if outcome.is_harness_failure() => {
                Some(ClassifiedError::harness(outcome.stderr.clone()))
            }
            StageStatus::Failure => Some(self.classifier.classify(outcome.stage, &outcome.stderr)),
            _ => None,
        }
    }

    /// In-process comparison of oracle and candidate stdout.
    fn compare(&self, artifacts: &StageArtifacts) -> (StageOutcome, Option<OutputMismatch>) {
        let start = Instant::now();
        let missing = StreamCapture::default();
        let expected = artifacts.reference_stdout.as_ref().unwrap_or(&missing);
        let actual = artifacts.candidate_stdout.as_ref().unwrap_or(&missing);

        let left = self.whitespace.normalize(&expected.bytes);
        let right = self.whitespace.normalize(&actual.bytes);
        // A partial capture cannot be normalized; only identical full streams match.
        let equal = if expected.is_truncated() || actual.is_truncated() {
            expected.same_stream(actual)
        } else {
            left == right
        };

        let mismatch = if equal {
            None
        } else {
            let line = first_difference_line(&left, &right);
            debug!(
                first_difference_line = ?line,
                truncated = expected.is_truncated() || actual.is_truncated(),
                "outputs differ"
            );
            Some(OutputMismatch {
                expected: bounded_preview(&expected.to_text("stdout"), self.preview_bytes),
                actual: bounded_preview(&actual.to_text("stdout"), self.preview_bytes),
                first_difference_line: line,
            })
        };

        let outcome = StageOutcome {
            stage: Stage::Compare,
            status: if mismatch.is_some() {
                StageStatus::Failure
            } else {
                StageStatus::Success
            },
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (outcome, mismatch)
    }
}

/// 1-based line where two outputs first differ, compared as raw bytes.
///
/// An output that is a strict prefix of the other differs at the first line
/// past its end. `None` when the outputs are line-wise equal (e.g. they differ
/// only in a trailing newline, or only past a truncation point).
pub fn first_difference_line(left: impl AsRef<[u8]>, right: impl AsRef<[u8]>) -> Option<usize> {
    let mut a = byte_lines(left.as_ref());
    let mut b = byte_lines(right.as_ref());
    let mut line = 1;
    loop {
        match (a.next(), b.next()) {
            (None, None) => return None,
            (x, y) if x != y => return Some(line),
            _ => line += 1,
        }
    }
}

/// Lines split on `\n` with a trailing `\r` dropped, like `str::lines`.
fn byte_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let mut lines = body.split(|b| *b == b'\n');
    if bytes.is_empty() {
        lines.next();
    }
    lines.map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}
