//! Error taxonomy for the harness itself.
//!
//! Stage failures are data (`StageOutcome`), not errors. These types cover
//! the conditions that abort a run or reject its inputs.

use std::path::PathBuf;

/// Fatal corpus-loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("corpus root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("failed to scan corpus root {root}: {reason}")]
    Scan { root: PathBuf, reason: String },
}

/// Invalid run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Invalid error-classifier rule table.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule '{label}' has an invalid pattern: {source}")]
    InvalidPattern {
        label: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule with pattern '{0}' has an empty label")]
    EmptyLabel(String),

    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule table: {0}")]
    Parse(String),
}

/// Failure to tier one item.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}
