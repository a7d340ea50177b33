//! Run configuration loaded from TOML and overridden by CLI flags.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::corpus::{CorpusSource, DEFAULT_SKIP_DIRS};
use crate::domain::{ConfigError, Stage};
use crate::tier::TierThresholds;

/// Result alias for configuration handling.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// An external command template.
///
/// Arguments may contain `{input}`, `{output}` and `{workdir}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Whether a verification failure fails the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Any non-success verdict fails the run.
    #[default]
    Hard,
    /// The run passes whenever it completes; rates are informational.
    Survey,
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMode::Hard => write!(f, "hard"),
            VerificationMode::Survey => write!(f, "survey"),
        }
    }
}

impl FromStr for VerificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hard" => Ok(VerificationMode::Hard),
            "survey" => Ok(VerificationMode::Survey),
            other => Err(ConfigError::Invalid(format!(
                "unknown mode '{other}' (expected 'hard' or 'survey')"
            ))),
        }
    }
}

/// How stdout is normalised before comparison.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WhitespacePolicy {
    /// Byte-for-byte.
    #[default]
    Exact,
    /// Trailing whitespace on every line and trailing blank lines ignored.
    TrimTrailing,
}

impl WhitespacePolicy {
    /// Normalize raw output bytes; undecodable bytes are kept as they are.
    pub fn normalize<'a>(&self, output: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            WhitespacePolicy::Exact => Cow::Borrowed(output),
            WhitespacePolicy::TrimTrailing => {
                let mut normalized = Vec::with_capacity(output.len());
                for line in output.split(|b| *b == b'\n') {
                    normalized.extend_from_slice(trim_ascii_end(line));
                    normalized.push(b'\n');
                }
                let end = trim_ascii_end(&normalized).len();
                normalized.truncate(end);
                Cow::Owned(normalized)
            }
        }
    }
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorpusConfig {
    pub root: PathBuf,
    /// Ordered manifest; when set, no scan happens.
    pub manifest: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub max_items: Option<usize>,
    pub skip_dirs: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("corpus"),
            manifest: None,
            extensions: vec!["py".to_string()],
            max_items: None,
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CorpusConfig {
    pub fn source(&self) -> CorpusSource {
        match &self.manifest {
            Some(manifest) => CorpusSource::Manifest {
                root: self.root.clone(),
                manifest: manifest.clone(),
            },
            None => CorpusSource::Scan {
                root: self.root.clone(),
                extensions: self.extensions.clone(),
                skip_dirs: self.skip_dirs.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub transpiler: ToolCommand,
    pub compiler: ToolCommand,
    pub reference: ToolCommand,
    pub candidate: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            transpiler: ToolCommand::new("depyler", ["transpile", "{input}", "-o", "{output}"]),
            compiler: ToolCommand::new(
                "rustc",
                ["--edition", "2021", "-O", "{input}", "-o", "{output}"],
            ),
            reference: ToolCommand::new("python3", ["{input}"]),
            candidate: ToolCommand::new("{input}", Vec::<String>::new()),
        }
    }
}

impl ToolsConfig {
    /// Command template for an external stage; `None` for `Compare`.
    pub fn for_stage(&self, stage: Stage) -> Option<&ToolCommand> {
        match stage {
            Stage::Transpile => Some(&self.transpiler),
            Stage::Compile => Some(&self.compiler),
            Stage::RunReference => Some(&self.reference),
            Stage::RunCandidate => Some(&self.candidate),
            Stage::Compare => None,
        }
    }
}

/// Per-stage wall-clock budgets, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub transpile_secs: u64,
    pub compile_secs: u64,
    pub reference_secs: u64,
    pub candidate_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transpile_secs: 30,
            compile_secs: 60,
            reference_secs: 10,
            candidate_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn for_stage(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Transpile => Some(self.transpile_secs),
            Stage::Compile => Some(self.compile_secs),
            Stage::RunReference => Some(self.reference_secs),
            Stage::RunCandidate => Some(self.candidate_secs),
            Stage::Compare => None,
        }
    }

    /// Apply one budget to both run stages.
    pub fn set_run_secs(&mut self, secs: u64) {
        self.reference_secs = secs;
        self.candidate_secs = secs;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    /// Bytes kept per captured stream; the rest is drained and dropped.
    pub max_output_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompareConfig {
    pub whitespace: WhitespacePolicy,
    /// Bytes kept for each output or stderr preview in the report.
    pub preview_bytes: usize,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            whitespace: WhitespacePolicy::Exact,
            preview_bytes: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub thresholds: TierThresholds,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: TierThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub output: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("parity_report.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Extra `[[rule]]` table appended to the built-in rules.
    pub rules_file: Option<PathBuf>,
    /// Drop the built-in rules and use `rules_file` alone.
    pub replace_defaults: bool,
}

/// Complete configuration for one verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParityConfig {
    pub corpus: CorpusConfig,
    pub tools: ToolsConfig,
    pub timeouts: TimeoutConfig,
    pub pool: PoolConfig,
    pub compare: CompareConfig,
    pub tier: TierConfig,
    pub report: ReportConfig,
    pub classifier: ClassifierConfig,
    pub mode: VerificationMode,
    /// Parent for per-item scratch directories; the system temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl ParityConfig {
    /// Load a TOML config file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid("pool.workers must be at least 1".into()));
        }
        for stage in Stage::EXTERNAL {
            if self.timeouts.for_stage(stage) == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "timeout for stage '{stage}' must be positive"
                )));
            }
            if let Some(tool) = self.tools.for_stage(stage) {
                if tool.program.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "command for stage '{stage}' has an empty program"
                    )));
                }
            }
        }
        if self.corpus.manifest.is_none() && self.corpus.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "corpus.extensions must not be empty when scanning".into(),
            ));
        }
        if self.classifier.replace_defaults && self.classifier.rules_file.is_none() {
            return Err(ConfigError::Invalid(
                "classifier.replace_defaults requires classifier.rules_file".into(),
            ));
        }
        if !(self.tier.thresholds.min_ratio.is_finite() && self.tier.thresholds.min_ratio >= 0.0) {
            return Err(ConfigError::Invalid("tier.min_ratio must be a non-negative number".into()));
        }
        Ok(())
    }

    /// SHA-256 over the canonical JSON form of the effective configuration.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = ParityConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.mode, VerificationMode::Hard);
        assert_eq!(config.tools.transpiler.to_string(), "depyler transpile {input} -o {output}");
        assert_eq!(config.compare.whitespace, WhitespacePolicy::Exact);
        assert!(config.tier.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ParityConfig = toml::from_str(
            r#"
            mode = "survey"

            [corpus]
            root = "examples/corpus"
            max_items = 10

            [timeouts]
            compile_secs = 120

            [tier]
            min_ratio = 0.75

            [tools.reference]
            program = "python3.12"
            args = ["-I", "{input}"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.mode, VerificationMode::Survey);
        assert_eq!(config.corpus.root, PathBuf::from("examples/corpus"));
        assert_eq!(config.corpus.max_items, Some(10));
        assert_eq!(config.corpus.extensions, vec!["py".to_string()]);
        assert_eq!(config.timeouts.compile_secs, 120);
        assert_eq!(config.timeouts.transpile_secs, 30);
        assert_eq!(config.tier.thresholds.min_ratio, 0.75);
        assert!(config.tier.thresholds.accept_param_and_return);
        assert_eq!(config.tools.reference.program, "python3.12");
        assert_eq!(config.tools.compiler.program, "rustc");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[pool]\nworkers = 3").expect("write");
        let config = ParityConfig::load(file.path()).expect("load");
        assert_eq!(config.pool.workers, 3);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[pool\nworkers = ").expect("write");
        let err = ParityConfig::load(file.path()).expect_err("malformed");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = ParityConfig::default();
        config.pool.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ParityConfig::default();
        config.timeouts.candidate_secs = 0;
        let err = config.validate().expect_err("zero timeout");
        assert!(err.to_string().contains("run_candidate"));
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = ParityConfig::default();
        config.tools.compiler.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("HARD".parse::<VerificationMode>().expect("hard"), VerificationMode::Hard);
        assert_eq!("survey".parse::<VerificationMode>().expect("survey"), VerificationMode::Survey);
        assert!("lenient".parse::<VerificationMode>().is_err());
    }

    #[test]
    fn test_whitespace_policy() {
        let exact = WhitespacePolicy::Exact;
        assert_eq!(exact.normalize(b"7  \n").as_ref(), b"7  \n");

        let trim = WhitespacePolicy::TrimTrailing;
        assert_eq!(trim.normalize(b"1 2  \n3\t\r\n\n").as_ref(), b"1 2\n3");
        assert_eq!(trim.normalize(b"1 2\n3"), trim.normalize(b"1 2   \n3\n"));
        assert_ne!(trim.normalize(b" 1"), trim.normalize(b"1"));
        assert_ne!(trim.normalize(b"\xff \n"), trim.normalize(b"\xfe\n"));
        assert_eq!(trim.normalize(b"\xff \n").as_ref(), b"\xff");
    }

    #[test]
    fn test_digest_tracks_changes() {
        let a = ParityConfig::default();
        let mut b = ParityConfig::default();
        assert_eq!(a.digest(), b.digest());
        b.timeouts.set_run_secs(5);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
