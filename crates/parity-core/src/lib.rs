//! Parity Core Library
//!
//! Domain types, classifiers, corpus loading, aggregation and report
//! persistence for differential verification of a Python-to-Rust transpiler.

pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod domain;
pub mod obs;
pub mod reporting;
pub mod telemetry;
pub mod tier;

pub use aggregate::{
    AggregateReport, Aggregator, CategoryStats, RateMetric, StageCounts, TierBreakdown,
};
pub use classifier::{ClassifierRule, ErrorClassifier, UNCLASSIFIED};
pub use config::{ParityConfig, ToolCommand, VerificationMode, WhitespacePolicy};
pub use corpus::{load_corpus, CorpusSource, LoadedCorpus};
pub use domain::{
    content_digest, ClassifiedError, ConfigError, CorpusError, CorpusItem, ExcludedItem,
    OutputMismatch, PipelineResult, RuleError, Stage, StageOutcome, StageStatus, Tier,
    TierAssessment, TierError, TierProfile, Verdict, HARNESS_ERROR,
};
pub use reporting::{
    bounded_preview, read_report_json, write_report_json, ParityReport, ReportItem, RunMetadata,
    REPORT_SCHEMA_VERSION,
};
pub use telemetry::init_tracing;
pub use tier::{TierClassifier, TierThresholds};

/// Crate version recorded in run metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
