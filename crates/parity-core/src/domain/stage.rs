//! Pipeline stages and per-stage outcomes.

use serde::{Deserialize, Serialize};

/// One step of the fixed verification pipeline.
///
/// Declaration order is the canonical execution order; `Ord` follows it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source item -> target-language text via the transpiler.
    Transpile,

    /// Target-language text -> executable via the target compiler.
    Compile,

    /// Original item under its native interpreter (the oracle).
    RunReference,

    /// Compiled executable (the candidate).
    RunCandidate,

    /// In-process comparison of oracle and candidate stdout.
    Compare,
}

impl Stage {
    /// All stages in canonical order.
    pub const ORDER: [Stage; 5] = [
        Stage::Transpile,
        Stage::Compile,
        Stage::RunReference,
        Stage::RunCandidate,
        Stage::Compare,
    ];

    /// Stages backed by an external process.
    pub const EXTERNAL: [Stage; 4] = [
        Stage::Transpile,
        Stage::Compile,
        Stage::RunReference,
        Stage::RunCandidate,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Transpile => "transpile",
            Stage::Compile => "compile",
            Stage::RunReference => "run_reference",
            Stage::RunCandidate => "run_candidate",
            Stage::Compare => "compare",
        }
    }

    /// Position in the canonical order.
    pub fn index(&self) -> usize {
        match self {
            Stage::Transpile => 0,
            Stage::Compile => 1,
            Stage::RunReference => 2,
            Stage::RunCandidate => 3,
            Stage::Compare => 4,
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        Stage::ORDER.get(self.index() + 1).copied()
    }

    /// Whether this stage spawns a child process.
    pub fn is_external(&self) -> bool {
        !matches!(self, Stage::Compare)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal status of one stage for one item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not executed because its artifact was supplied up front.
    Skipped,
    Success,
    Failure,
    Timeout,
}

impl StageStatus {
    /// Whether the pipeline may advance past a stage with this status.
    pub fn passed(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::Skipped)
    }
}

/// Captured result of one (item, stage) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    /// Stage this outcome belongs to.
    pub stage: Stage,

    /// Terminal status.
    pub status: StageStatus,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Exit code, absent when the process was killed or never spawned.
    pub exit_code: Option<i32>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl StageOutcome {
    /// An outcome for a stage whose artifact already existed.
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms: 0,
        }
    }

    /// A failure that never produced process output (spawn error, setup error).
    pub fn harness_failure(stage: Stage, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Failure,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            duration_ms,
        }
    }

    /// Whether the pipeline may advance past this outcome.
    pub fn passed(&self) -> bool {
        self.status.passed()
    }

    /// An external stage that failed without an exit code never ran its tool.
    pub fn is_harness_failure(&self) -> bool {
        self.stage.is_external() && self.status == StageStatus::Failure && self.exit_code.is_none()
    }
}
