//! Persisted parity report: run metadata, aggregate summary, per-item list.
//!
//! The JSON document is a serialization boundary only; in memory the run is
//! carried by [`PipelineResult`] and [`AggregateReport`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::aggregate::AggregateReport;
use crate::config::VerificationMode;
use crate::domain::{
    ExcludedItem, PipelineResult, Stage, StageOutcome, StageStatus, TierAssessment, Verdict,
};

/// Version of the report document layout.
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Attached to every report whose items were tiered.
pub const TIER_NOTE: &str = "Tiers come from a heuristic annotation count (ratio of observed to \
expected annotations). They stratify results coarsely and say nothing definite about an item.";

/// Identity and settings of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub tool_version: String,
    pub corpus_root: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: VerificationMode,
    pub workers: usize,
    /// SHA-256 of the effective configuration.
    pub config_digest: String,
}

/// Condensed view of one stage outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: Stage,
    pub status: StageStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl From<&StageOutcome> for StageSummary {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            stage: outcome.stage,
            status: outcome.status,
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
        }
    }
}

/// Bounded output excerpts for debugging a failed item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPreviews {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_difference_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ItemPreviews {
    pub fn is_empty(&self) -> bool {
        self.expected.is_none()
            && self.actual.is_none()
            && self.first_difference_line.is_none()
            && self.stderr.is_none()
    }
}

/// One entry of the per-item array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportItem {
    pub identifier: String,
    pub verdict: Verdict,
    pub stage_reached: Option<Stage>,
    pub error_categories: Vec<String>,
    pub error_codes: Vec<String>,
    pub message: Option<String>,
    pub tier: Option<TierAssessment>,
    pub source_digest: Option<String>,
    pub duration_ms: u64,
    pub stages: Vec<StageSummary>,
    #[serde(default, skip_serializing_if = "ItemPreviews::is_empty")]
    pub previews: ItemPreviews,
}

impl ReportItem {
    pub fn from_result(result: &PipelineResult, preview_limit: usize) -> Self {
        let mut previews = ItemPreviews::default();
        if let Some(mismatch) = &result.mismatch {
            previews.expected = Some(bounded_preview(&mismatch.expected, preview_limit));
            previews.actual = Some(bounded_preview(&mismatch.actual, preview_limit));
            previews.first_difference_line = mismatch.first_difference_line;
        }
        if let Some(last) = result.stages.last().filter(|o| !o.passed()) {
            if !last.stderr.is_empty() {
                previews.stderr = Some(bounded_preview(&last.stderr, preview_limit));
            }
        }

        let error = result.error.as_ref();
        Self {
            identifier: result.id().to_string(),
            verdict: result.verdict,
            stage_reached: result.stage_reached(),
            error_categories: result.error_categories().to_vec(),
            error_codes: error.map(|e| e.error_codes.clone()).unwrap_or_default(),
            message: error.map(|e| e.message.clone()).filter(|m| !m.is_empty()),
            tier: result.tier.clone(),
            source_digest: Some(result.item.digest.clone()),
            duration_ms: result.duration_ms,
            stages: result.stages.iter().map(StageSummary::from).collect(),
            previews,
        }
    }

    pub fn excluded(item: &ExcludedItem) -> Self {
        Self {
            identifier: item.id.clone(),
            verdict: Verdict::ParseOrLoadError,
            stage_reached: None,
            error_categories: Vec::new(),
            error_codes: Vec::new(),
            message: Some(item.reason.clone()),
            tier: None,
            source_digest: None,
            duration_ms: 0,
            stages: Vec::new(),
            previews: ItemPreviews::default(),
        }
    }
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParityReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run: RunMetadata,
    pub summary: AggregateReport,
    pub tier_note: Option<String>,
    /// Every input item exactly once, sorted by identifier.
    pub items: Vec<ReportItem>,
}

impl ParityReport {
    pub fn new(
        run: RunMetadata,
        summary: AggregateReport,
        results: &[PipelineResult],
        excluded: &[ExcludedItem],
        preview_limit: usize,
    ) -> Self {
        let mut items: Vec<ReportItem> = results
            .iter()
            .map(|r| ReportItem::from_result(r, preview_limit))
            .chain(excluded.iter().map(ReportItem::excluded))
            .collect();
        items.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let tiered = results.iter().any(|r| r.tier.is_some());
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run,
            summary,
            tier_note: tiered.then(|| TIER_NOTE.to_string()),
            items,
        }
    }

    pub fn item(&self, identifier: &str) -> Option<&ReportItem> {
        self.items.iter().find(|i| i.identifier == identifier)
    }
}

/// Write the report as pretty JSON, creating parent directories.
pub fn write_report_json(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report directory {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(report).context("serialize parity report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a report written by [`write_report_json`].
pub fn read_report_json(path: &Path) -> Result<ParityReport> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse {:?}", path))
}

/// At most `limit` bytes of `text`, cut on a char boundary, with a marker
/// naming how much was dropped.
pub fn bounded_preview(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[{} more bytes]", &text[..cut], text.len() - cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassifiedError, CorpusItem, OutputMismatch};
    use serde_json::json;
    use std::sync::Arc;

    fn metadata() -> RunMetadata {
        RunMetadata {
            run_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").expect("valid UUID"),
            tool_version: "0.4.0".to_string(),
            corpus_root: "corpus".to_string(),
            started_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            finished_at: DateTime::parse_from_rfc3339("2026-01-01T00:01:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            mode: VerificationMode::Hard,
            workers: 4,
            config_digest: "abc".to_string(),
        }
    }

    fn mismatch_result() -> PipelineResult {
        let stage = |s: Stage, status: StageStatus, stdout: &str| StageOutcome {
            stage: s,
            status,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: if s == Stage::Compare { None } else { Some(0) },
            duration_ms: 1,
        };
        PipelineResult {
            item: Arc::new(CorpusItem::new("c.py", "/c.py", "print('1,2,3')\n")),
            stages: vec![
                stage(Stage::Transpile, StageStatus::Success, ""),
                stage(Stage::Compile, StageStatus::Success, ""),
                stage(Stage::RunReference, StageStatus::Success, "1,2,3"),
                stage(Stage::RunCandidate, StageStatus::Success, "1,2,4"),
                stage(Stage::Compare, StageStatus::Failure, ""),
            ],
            verdict: Verdict::SemanticMismatch,
            error: None,
            mismatch: Some(OutputMismatch {
                expected: "1,2,3".to_string(),
                actual: "1,2,4".to_string(),
                first_difference_line: Some(1),
            }),
            tier: None,
            duration_ms: 4,
        }
    }

    #[test]
    fn test_bounded_preview() {
        assert_eq!(bounded_preview("short", 10), "short");
        assert_eq!(bounded_preview("abcdef", 3), "abc...[3 more bytes]");
        // 'é' is two bytes; the cut must not split it.
        assert_eq!(bounded_preview("aé", 2), "a...[2 more bytes]");
    }

    #[test]
    fn test_report_item_from_mismatch() {
        let item = ReportItem::from_result(&mismatch_result(), 100);
        assert_eq!(item.verdict, Verdict::SemanticMismatch);
        assert_eq!(item.stage_reached, Some(Stage::Compare));
        assert_eq!(item.previews.expected.as_deref(), Some("1,2,3"));
        assert_eq!(item.previews.actual.as_deref(), Some("1,2,4"));
        assert_eq!(item.previews.first_difference_line, Some(1));
        assert!(item.error_categories.is_empty());
    }

    #[test]
    fn test_report_item_failure_carries_stderr_preview() {
        let mut result = mismatch_result();
        result.mismatch = None;
        result.stages.truncate(2);
        result.stages[1].status = StageStatus::Failure;
        result.stages[1].stderr = "error[E0425]: cannot find value `x` in this scope".repeat(10);
        result.verdict = Verdict::CompileFailure;
        result.error = Some(ClassifiedError {
            categories: vec!["UnresolvedSymbol".to_string()],
            error_codes: vec!["E0425".to_string()],
            message: "error[E0425]: cannot find value `x` in this scope".to_string(),
        });

        let item = ReportItem::from_result(&result, 16);
        assert_eq!(item.error_categories, vec!["UnresolvedSymbol".to_string()]);
        assert_eq!(item.error_codes, vec!["E0425".to_string()]);
        let stderr = item.previews.stderr.expect("stderr preview");
        assert!(stderr.starts_with("error[E0425]: ca..."));
    }

    #[test]
    fn test_report_schema_has_expected_keys() {
        let results = vec![mismatch_result()];
        let excluded = vec![ExcludedItem {
            id: "a_missing.py".to_string(),
            reason: "failed to read".to_string(),
        }];
        let summary = AggregateReport::from_results(&results, excluded.len());
        let report = ParityReport::new(metadata(), summary, &results, &excluded, 64);

        let raw = serde_json::to_value(&report).expect("serialize report");
        let obj = raw.as_object().expect("report object");
        for key in ["schema_version", "generated_at", "run", "summary", "items"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(raw["summary"]["checked"], json!(1));
        assert_eq!(raw["summary"]["excluded"], json!(1));
        assert_eq!(raw["items"][0]["identifier"], json!("a_missing.py"));
        assert_eq!(raw["items"][0]["verdict"], json!("parse_or_load_error"));
        assert_eq!(raw["items"][1]["verdict"], json!("semantic_mismatch"));
        assert_eq!(raw["run"]["mode"], json!("hard"));
        assert!(report.tier_note.is_none());
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out/nested/report.json");
        let results = vec![mismatch_result()];
        let summary = AggregateReport::from_results(&results, 0);
        let report = ParityReport::new(metadata(), summary, &results, &[], 64);

        write_report_json(&path, &report).expect("write");
        let loaded = read_report_json(&path).expect("read");
        assert_eq!(loaded, report);
    }
}
