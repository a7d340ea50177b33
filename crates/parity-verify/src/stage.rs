//! Stage command templates and budgets.

use parity_core::{ParityConfig, Stage, ToolCommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::CommandSpec;

/// Values substituted into a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    /// `{input}`
    pub input: PathBuf,
    /// `{output}`; empty when the stage writes no artifact.
    pub output: Option<PathBuf>,
    /// `{workdir}`, also the process working directory.
    pub workdir: PathBuf,
}

impl Placeholders {
    pub fn new(input: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            workdir: workdir.into(),
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    fn substitute(&self, template: &str) -> String {
        let output = self
            .output
            .as_deref()
            .map(path_text)
            .unwrap_or_default();
        template
            .replace("{input}", &path_text(&self.input))
            .replace("{output}", &output)
            .replace("{workdir}", &path_text(&self.workdir))
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Configuration for one external stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Which stage this drives.
    pub stage: Stage,

    /// Command template.
    pub command: ToolCommand,

    /// Timeout in milliseconds.
    pub timeout_ms: u64,

    /// Bytes kept per captured stream.
    pub max_output_bytes: usize,
}

impl StageConfig {
    pub fn new(stage: Stage, command: ToolCommand, timeout: Duration) -> Self {
        Self {
            stage,
            command,
            timeout_ms: timeout.as_millis() as u64,
            max_output_bytes: 1024 * 1024,
        }
    }

    /// Stage configuration from the run configuration; `None` for `Compare`.
    pub fn from_config(stage: Stage, config: &ParityConfig) -> Option<Self> {
        let command = config.tools.for_stage(stage)?.clone();
        let timeout_secs = config.timeouts.for_stage(stage)?;
        Some(
            Self::new(stage, command, Duration::from_secs(timeout_secs))
                .with_output_limit(config.pool.max_output_bytes),
        )
    }

    /// Create a custom stage configuration.
    pub fn custom<I, S>(stage: Stage, program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stage, ToolCommand::new(program, args), timeout)
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Substitute placeholders into a runnable command.
    pub fn render(&self, placeholders: &Placeholders) -> CommandSpec {
        let program = placeholders.substitute(&self.command.program);
        let args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|a| placeholders.substitute(a))
            .collect();
        CommandSpec::new(program, args)
            .in_dir(&placeholders.workdir)
            .with_timeout(self.timeout())
            .with_output_limit(self.max_output_bytes)
    }
}
