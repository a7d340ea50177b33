//! Parity - differential verification of a Python-to-Rust transpiler
//!
//! The `parity` command runs every corpus item through transpile, compile,
//! reference run, candidate run and compare, writes a JSON report, and exits
//! with the verification gate's verdict.
//!
//! ## Exit status
//!
//! - `0`: the run completed and the gate passed
//! - `1`: the run completed and the gate failed
//! - `2`: configuration or corpus could not be loaded, or the report could not
//!   be written

use anyhow::{Context, Result};
use clap::Parser;
use parity_core::{ParityConfig, VerificationMode, WhitespacePolicy};
use parity_verify::{run_verification, VerificationRun};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "parity")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Differential semantic verification for transpiler output", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "PARITY_CONFIG")]
    config: Option<PathBuf>,

    /// Corpus root directory
    #[arg(long, env = "PARITY_CORPUS")]
    corpus: Option<PathBuf>,

    /// Manifest listing corpus items (JSON or TOML); disables scanning
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Report output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Check at most this many items
    #[arg(long)]
    max_items: Option<usize>,

    /// Concurrent pipelines
    #[arg(short, long, env = "PARITY_WORKERS")]
    workers: Option<usize>,

    /// Transpile timeout in seconds
    #[arg(long)]
    transpile_timeout: Option<u64>,

    /// Compile timeout in seconds
    #[arg(long)]
    compile_timeout: Option<u64>,

    /// Timeout in seconds for both the reference and candidate runs
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Gate mode: hard or survey
    #[arg(long)]
    mode: Option<VerificationMode>,

    /// Ignore trailing whitespace when comparing outputs
    #[arg(long)]
    trim_trailing_whitespace: bool,

    /// Skip tier classification
    #[arg(long)]
    no_tier: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides.
    fn resolve_config(&self) -> Result<ParityConfig> {
        let mut config = match &self.config {
            Some(path) => ParityConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ParityConfig::default(),
        };

        if let Some(root) = &self.corpus {
            config.corpus.root = root.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.corpus.manifest = Some(manifest.clone());
        }
        if let Some(output) = &self.output {
            config.report.output = output.clone();
        }
        if self.max_items.is_some() {
            config.corpus.max_items = self.max_items;
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if let Some(secs) = self.transpile_timeout {
            config.timeouts.transpile_secs = secs;
        }
        if let Some(secs) = self.compile_timeout {
            config.timeouts.compile_secs = secs;
        }
        if let Some(secs) = self.run_timeout {
            config.timeouts.set_run_secs(secs);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.trim_trailing_whitespace {
            config.compare.whitespace = WhitespacePolicy::TrimTrailing;
        }
        if self.no_tier {
            config.tier.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    parity_core::init_tracing(cli.json, level);

    let run = match cli.resolve_config() {
        Ok(config) => run_verification(&config).await,
        Err(e) => Err(e),
    };

    match run {
        Ok(run) => {
            print_summary(&run);
            if run.gate.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "verification aborted");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn print_summary(run: &VerificationRun) {
    let summary = &run.report.summary;
    let rate = |label: &str, metric: &parity_core::RateMetric| {
        let note = if metric.defined { "" } else { " (undefined)" };
        println!(
            "  {label:<22} {:>6.1}% ({}/{}){note}",
            metric.percent(),
            metric.numerator,
            metric.denominator
        );
    };

    println!("Run ID: {}", run.report.run.run_id);
    println!("Corpus: {}", run.report.run.corpus_root);
    println!("Checked: {} ({} excluded)", summary.checked, summary.excluded);
    println!();
    rate("Transpile rate", &summary.transpile_rate);
    rate("Compile rate", &summary.compile_rate);
    rate("Semantic parity rate", &summary.semantic_parity_rate);
    rate("True success rate", &summary.true_success_rate);

    if summary.failures() > 0 {
        println!();
        println!("Verdicts:");
        for (verdict, count) in &summary.verdicts {
            println!("  {:<24} {count}", verdict.label());
        }
    }
    if !summary.categories.is_empty() {
        println!();
        println!("Error categories:");
        for (label, stats) in &summary.categories {
            println!("  {label:<24} {}", stats.count);
        }
    }

    println!();
    println!("Report: {}", run.report_path.display());
    println!("Gate: {}", if run.gate.passed { "✓ PASSED" } else { "✗ FAILED" });
    println!("  {}", run.gate.message);
    for violation in &run.gate.violations {
        println!("  - {violation}");
    }
}
