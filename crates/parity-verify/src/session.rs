//! One complete verification run: load, verify, aggregate, report, gate.

use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use parity_core::obs::{emit_item_finished, emit_run_finished, emit_run_started, ItemSpan};
use parity_core::{
    load_corpus, write_report_json, Aggregator, ParityConfig, ParityReport, RunMetadata, VERSION,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::gate::{GateVerdict, ParityGate};
use crate::pipeline::ParityPipeline;
use crate::pool::WorkerPool;

/// Outcome of [`run_verification`].
#[derive(Debug, Clone)]
pub struct VerificationRun {
    pub report: ParityReport,
    pub gate: GateVerdict,
    /// Where the report was written.
    pub report_path: PathBuf,
}

/// Run every corpus item through the pipeline and persist the report.
///
/// Errors are fatal conditions only: invalid configuration, an unloadable
/// corpus, or an unwritable report. Item-level failures are data in the
/// returned report.
pub async fn run_verification(config: &ParityConfig) -> anyhow::Result<VerificationRun> {
    config.validate().context("invalid configuration")?;
    let pipeline = ParityPipeline::from_config(config).context("failed to load classifier rules")?;

    let source = config.corpus.source();
    let corpus = load_corpus(&source, config.corpus.max_items)
        .with_context(|| format!("failed to load corpus from {}", source.root().display()))?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let clock = Instant::now();
    let corpus_root = corpus.root.display().to_string();
    emit_run_started(
        &run_id.to_string(),
        &corpus_root,
        corpus.items.len(),
        config.pool.workers,
    );

    let pool = WorkerPool::new(pipeline, config.pool.workers);
    let mut aggregator = Aggregator::new();
    aggregator.record_excluded(corpus.excluded.len());

    let mut results = pool.spawn(corpus.items.clone());
    while let Some(result) = results.next().await {
        let _span = ItemSpan::enter(result.id());
        emit_item_finished(result.id(), result.verdict, result.duration_ms);
        aggregator.push(result);
    }
    pool.metrics().flush();

    let (summary, ordered) = aggregator.finalize();
    let gate = ParityGate::evaluate(&summary, config.mode);
    let duration_ms = clock.elapsed().as_millis() as u64;
    emit_run_finished(
        &run_id.to_string(),
        duration_ms,
        summary.checked,
        summary.success,
        gate.passed,
    );

    let run = RunMetadata {
        run_id,
        tool_version: VERSION.to_string(),
        corpus_root,
        started_at,
        finished_at: Utc::now(),
        mode: config.mode,
        workers: pool.workers(),
        config_digest: config.digest(),
    };
    let report = ParityReport::new(
        run,
        summary,
        &ordered,
        &corpus.excluded,
        config.compare.preview_bytes,
    );

    let report_path = config.report.output.clone();
    write_report_json(&report_path, &report)?;
    info!(path = %report_path.display(), passed = gate.passed, "report written");

    Ok(VerificationRun {
        report,
        gate,
        report_path,
    })
}
