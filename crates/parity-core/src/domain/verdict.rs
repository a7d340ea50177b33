//! Terminal classification of one corpus item.

use serde::{Deserialize, Serialize};

use super::stage::{Stage, StageStatus};

/// The single verdict assigned to an item after its pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Transpiled, compiled, ran, and matched the oracle.
    Success,
    TranspileFailure,
    TranspileTimeout,
    CompileFailure,
    CompileTimeout,
    ReferenceRuntimeError,
    ReferenceTimeout,
    CandidateRuntimeError,
    CandidateTimeout,
    /// Both sides ran but their stdout differed.
    SemanticMismatch,
    /// The harness itself failed while processing the item (worker panic,
    /// scratch directory could not be created).
    InternalError,
    /// Item could not be read; excluded from the pipeline and from `checked`.
    ParseOrLoadError,
}

impl Verdict {
    /// Every verdict the pipeline controller can produce.
    pub const PIPELINE: [Verdict; 11] = [
        Verdict::Success,
        Verdict::TranspileFailure,
        Verdict::TranspileTimeout,
        Verdict::CompileFailure,
        Verdict::CompileTimeout,
        Verdict::ReferenceRuntimeError,
        Verdict::ReferenceTimeout,
        Verdict::CandidateRuntimeError,
        Verdict::CandidateTimeout,
        Verdict::SemanticMismatch,
        Verdict::InternalError,
    ];

    /// Map a non-passing stage status to its verdict.
    ///
    /// Returns `None` for passing statuses. A failed `Compare` is always a
    /// [`Verdict::SemanticMismatch`].
    pub fn for_stage(stage: Stage, status: StageStatus) -> Option<Verdict> {
        let timed_out = match status {
            StageStatus::Success | StageStatus::Skipped => return None,
            StageStatus::Failure => false,
            StageStatus::Timeout => true,
        };

        let verdict = match (stage, timed_out) {
            (Stage::Transpile, false) => Verdict::TranspileFailure,
            (Stage::Transpile, true) => Verdict::TranspileTimeout,
            (Stage::Compile, false) => Verdict::CompileFailure,
            (Stage::Compile, true) => Verdict::CompileTimeout,
            (Stage::RunReference, false) => Verdict::ReferenceRuntimeError,
            (Stage::RunReference, true) => Verdict::ReferenceTimeout,
            (Stage::RunCandidate, false) => Verdict::CandidateRuntimeError,
            (Stage::RunCandidate, true) => Verdict::CandidateTimeout,
            (Stage::Compare, _) => Verdict::SemanticMismatch,
        };
        Some(verdict)
    }

    /// Verdict label as it appears in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::TranspileFailure => "transpile_failure",
            Verdict::TranspileTimeout => "transpile_timeout",
            Verdict::CompileFailure => "compile_failure",
            Verdict::CompileTimeout => "compile_timeout",
            Verdict::ReferenceRuntimeError => "reference_runtime_error",
            Verdict::ReferenceTimeout => "reference_timeout",
            Verdict::CandidateRuntimeError => "candidate_runtime_error",
            Verdict::CandidateTimeout => "candidate_timeout",
            Verdict::SemanticMismatch => "semantic_mismatch",
            Verdict::InternalError => "internal_error",
            Verdict::ParseOrLoadError => "parse_or_load_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Verdict::TranspileTimeout
                | Verdict::CompileTimeout
                | Verdict::ReferenceTimeout
                | Verdict::CandidateTimeout
        )
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
