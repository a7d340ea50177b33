//! Stage drivers: the four external stages behind one contract.
//!
//! A driver renders its command, runs it through [`CommandRunner`], and maps
//! the result onto a [`StageOutcome`]. Drivers never retry and never return
//! errors; a runner error becomes a `Failure` outcome carrying the message.

use async_trait::async_trait;
use parity_core::{CorpusItem, ParityConfig, Stage, StageOutcome, StageStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

use crate::runner::{CommandOutcome, CommandRunner, StreamCapture};
use crate::stage::{Placeholders, StageConfig};

/// Scratch directory owned by one worker for one item.
///
/// Removed by [`ItemWorkspace::close`], or on drop if the worker unwinds.
#[derive(Debug)]
pub struct ItemWorkspace {
    dir: TempDir,
    source: PathBuf,
    stem: String,
}

impl ItemWorkspace {
    /// Create the directory and materialise the item's source in it.
    pub fn create(item: &CorpusItem, scratch_root: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("parity-");
        let dir = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                // Tools run inside the workspace, so its paths must not be relative.
                builder.tempdir_in(root.canonicalize()?)?
            }
            None => builder.tempdir()?,
        };
        let source = dir.path().join(item.file_name());
        std::fs::write(&source, &item.source)?;
        Ok(Self {
            dir,
            source,
            stem: item.file_stem(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The item's source as written into the workspace.
    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// Where the transpiler is asked to write.
    pub fn transpiled_path(&self) -> PathBuf {
        self.dir.path().join(format!("{}.rs", self.stem))
    }

    /// Where the compiler is asked to write.
    pub fn binary_path(&self) -> PathBuf {
        self.dir
            .path()
            .join(format!("{}_bin{}", self.stem, std::env::consts::EXE_SUFFIX))
    }

    /// Remove the directory, reporting failures.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Artifacts handed from one stage to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageArtifacts {
    pub transpiled: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    /// Undecoded stdout of a successful reference run.
    pub reference_stdout: Option<StreamCapture>,
    /// Undecoded stdout of a successful candidate run.
    pub candidate_stdout: Option<StreamCapture>,
}

/// One pipeline stage backed by an external process.
#[async_trait]
pub trait StageDriver: Send + Sync {
    fn stage(&self) -> Stage;

    /// Run the stage for `item`, reading and recording artifacts.
    async fn execute(
        &self,
        item: &CorpusItem,
        workspace: &ItemWorkspace,
        artifacts: &mut StageArtifacts,
    ) -> StageOutcome;
}

/// Run a rendered stage command and map it onto an outcome plus raw stdout.
async fn run_command(
    config: &StageConfig,
    placeholders: &Placeholders,
) -> (StageOutcome, StreamCapture) {
    let start = Instant::now();
    let spec = config.render(placeholders);
    match CommandRunner::run(&spec).await {
        Ok(CommandOutcome::Completed(output)) => {
            let status = if output.success() {
                StageStatus::Success
            } else {
                StageStatus::Failure
            };
            let outcome = StageOutcome {
                stage: config.stage,
                status,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                duration_ms: output.duration_ms,
            };
            (outcome, output.stdout_capture)
        }
        Ok(CommandOutcome::TimedOut(output)) => {
            let outcome = StageOutcome {
                stage: config.stage,
                status: StageStatus::Timeout,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: None,
                duration_ms: output.duration_ms,
            };
            (outcome, output.stdout_capture)
        }
        Err(err) => {
            let outcome = StageOutcome::harness_failure(
                config.stage,
                format!("{} failed to start: {err}", config.stage),
                start.elapsed().as_millis() as u64,
            );
            (outcome, StreamCapture::default())
        }
    }
}

fn missing_artifact(stage: Stage, what: &str) -> StageOutcome {
    StageOutcome::harness_failure(stage, format!("no {what} available for {stage}"), 0)
}

/// Invokes the transpiler; success also requires the output file to exist.
///
/// Items carrying a precompiled artifact skip the transpiler entirely.
pub struct TranspileDriver {
    config: StageConfig,
}

impl TranspileDriver {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageDriver for TranspileDriver {
    fn stage(&self) -> Stage {
        Stage::Transpile
    }

    async fn execute(
        &self,
        item: &CorpusItem,
        workspace: &ItemWorkspace,
        artifacts: &mut StageArtifacts,
    ) -> StageOutcome {
        if let Some(precompiled) = &item.precompiled {
            artifacts.transpiled = Some(precompiled.clone());
            return StageOutcome::skipped(Stage::Transpile);
        }

        let output = workspace.transpiled_path();
        let placeholders =
            Placeholders::new(workspace.source_path(), workspace.path()).with_output(&output);
        let (mut outcome, _) = run_command(&self.config, &placeholders).await;

        if outcome.status == StageStatus::Success {
            if output.is_file() {
                artifacts.transpiled = Some(output);
            } else {
                outcome.status = StageStatus::Failure;
                if !outcome.stderr.is_empty() && !outcome.stderr.ends_with('\n') {
                    outcome.stderr.push('\n');
                }
                outcome.stderr.push_str(&format!(
                    "transpiler exited 0 but wrote no output at {}",
                    output.display()
                ));
            }
        }
        outcome
    }
}

/// Invokes the target compiler on the transpiled artifact.
pub struct CompileDriver {
    config: StageConfig,
}

impl CompileDriver {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageDriver for CompileDriver {
    fn stage(&self) -> Stage {
        Stage::Compile
    }

    async fn execute(
        &self,
        _item: &CorpusItem,
        workspace: &ItemWorkspace,
        artifacts: &mut StageArtifacts,
    ) -> StageOutcome {
        let Some(input) = artifacts.transpiled.clone() else {
            return missing_artifact(Stage::Compile, "transpiled source");
        };
        let binary = workspace.binary_path();
        let placeholders = Placeholders::new(input, workspace.path()).with_output(&binary);
        let (outcome, _) = run_command(&self.config, &placeholders).await;
        if outcome.status == StageStatus::Success {
            artifacts.binary = Some(binary);
        }
        outcome
    }
}

/// Runs the original source under its interpreter; stdout is the oracle.
pub struct ReferenceDriver {
    config: StageConfig,
}

impl ReferenceDriver {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageDriver for ReferenceDriver {
    fn stage(&self) -> Stage {
        Stage::RunReference
    }

    async fn execute(
        &self,
        _item: &CorpusItem,
        workspace: &ItemWorkspace,
        artifacts: &mut StageArtifacts,
    ) -> StageOutcome {
        let placeholders = Placeholders::new(workspace.source_path(), workspace.path());
        let (outcome, stdout) = run_command(&self.config, &placeholders).await;
        if outcome.status == StageStatus::Success {
            artifacts.reference_stdout = Some(stdout);
        }
        outcome
    }
}

/// Runs the compiled binary; stdout is the candidate.
pub struct CandidateDriver {
    config: StageConfig,
}

impl CandidateDriver {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageDriver for CandidateDriver {
    fn stage(&self) -> Stage {
        Stage::RunCandidate
    }

    async fn execute(
        &self,
        _item: &CorpusItem,
        workspace: &ItemWorkspace,
        artifacts: &mut StageArtifacts,
    ) -> StageOutcome {
        let Some(binary) = artifacts.binary.clone() else {
            return missing_artifact(Stage::RunCandidate, "compiled binary");
        };
        let placeholders = Placeholders::new(binary, workspace.path());
        let (outcome, stdout) = run_command(&self.config, &placeholders).await;
        if outcome.status == StageStatus::Success {
            artifacts.candidate_stdout = Some(stdout);
        }
        outcome
    }
}

/// The four external drivers in canonical order.
#[derive(Clone)]
pub struct StageDrivers {
    drivers: Vec<Arc<dyn StageDriver>>,
}

impl StageDrivers {
    pub fn new(
        transpile: StageConfig,
        compile: StageConfig,
        reference: StageConfig,
        candidate: StageConfig,
    ) -> Self {
        Self {
            drivers: vec![
                Arc::new(TranspileDriver::new(transpile)),
                Arc::new(CompileDriver::new(compile)),
                Arc::new(ReferenceDriver::new(reference)),
                Arc::new(CandidateDriver::new(candidate)),
            ],
        }
    }

    pub fn from_config(config: &ParityConfig) -> Self {
        let drivers = Stage::EXTERNAL
            .into_iter()
            .filter_map(|stage| StageConfig::from_config(stage, config))
            .filter_map(driver_for)
            .collect();
        Self { drivers }
    }

    /// Replace the driver for `driver.stage()`.
    pub fn with_driver(mut self, driver: Arc<dyn StageDriver>) -> Self {
        if let Some(slot) = self.drivers.iter_mut().find(|d| d.stage() == driver.stage()) {
            *slot = driver;
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StageDriver>> {
        self.drivers.iter()
    }
}

/// Driver for an external stage's configuration.
fn driver_for(config: StageConfig) -> Option<Arc<dyn StageDriver>> {
    let driver: Arc<dyn StageDriver> = match config.stage {
        Stage::Transpile => Arc::new(TranspileDriver::new(config)),
        Stage::Compile => Arc::new(CompileDriver::new(config)),
        Stage::RunReference => Arc::new(ReferenceDriver::new(config)),
        Stage::RunCandidate => Arc::new(CandidateDriver::new(config)),
        Stage::Compare => return None,
    };
    Some(driver)
}
